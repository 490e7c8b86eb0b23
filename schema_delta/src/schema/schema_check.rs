//! Existence check for the schemas every other object lives in

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::engine::Engine;
use crate::error::Result;
use crate::migrator::Migrator;
use crate::schema::command::{CommandBatch, SliceReader};
use crate::schema::difference::SchemaPatchDifference;
use crate::schema::object::{SchemaDelta, SchemaObjectDefinition, SchemaObjectDelta};
use crate::schema::types::DbObjectName;

/// A set of schemas that must exist
///
/// The orchestrator adds the schemas of every other object in the same
/// migration after the live schema list has been read.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaExistenceCheck {
    identifier: DbObjectName,
    pub schemas: BTreeSet<String>,
}

impl Default for SchemaExistenceCheck {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

impl SchemaExistenceCheck {
    pub fn new<S: Into<String>>(schemas: impl IntoIterator<Item = S>) -> Self {
        Self {
            identifier: DbObjectName::unqualified("schemas"),
            schemas: schemas.into_iter().map(Into::into).collect(),
        }
    }

    fn schema_list(&self) -> Vec<String> {
        self.schemas.iter().cloned().collect()
    }
}

impl SchemaObjectDefinition for SchemaExistenceCheck {
    fn identifier(&self) -> &DbObjectName {
        &self.identifier
    }

    /// The schema names themselves; the check has no identifier of its own
    fn all_names(&self) -> Vec<DbObjectName> {
        self.schemas
            .iter()
            .map(|s| DbObjectName::unqualified(s))
            .collect()
    }

    fn configure_query_command(&self, batch: &mut CommandBatch) -> Result<()> {
        let sql = match batch.engine() {
            Engine::Postgres => "SELECT nspname::text AS name FROM pg_namespace",
            Engine::Sqlite => "SELECT name FROM pragma_database_list",
            Engine::Generic => "SELECT CAST(schema_name AS TEXT) AS name FROM information_schema.schemata",
        };
        batch.statement().set_sql(sql);
        Ok(())
    }

    fn create_delta(
        &self,
        engine: Engine,
        reader: &mut SliceReader<'_>,
    ) -> Result<SchemaObjectDelta> {
        let existing: Vec<String> = reader
            .next_result()?
            .rows()
            .filter_map(|row| row.text("name"))
            .collect();

        let mut delta = SchemaCheckDelta {
            engine,
            requested: self.clone(),
            pending: SchemaExistenceCheck::default(),
            existing,
        };
        delta.refresh();
        Ok(SchemaObjectDelta::SchemaExistenceCheck(delta))
    }

    fn write_create_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        migrator.write_schema_creation_sql(&self.schema_list(), w)
    }

    fn write_drop_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        migrator.write_schema_drop_sql(&self.schema_list(), w)
    }
}

/// Which of the requested schemas are missing
#[derive(Debug, Clone)]
pub struct SchemaCheckDelta {
    engine: Engine,
    pub requested: SchemaExistenceCheck,
    /// The missing schemas, as a check of their own
    pub pending: SchemaExistenceCheck,
    pub existing: Vec<String>,
}

impl SchemaCheckDelta {
    /// Add schemas referenced elsewhere in the migration
    pub fn absorb<S: Into<String>>(&mut self, schemas: impl IntoIterator<Item = S>) {
        self.requested
            .schemas
            .extend(schemas.into_iter().map(Into::into));
        self.refresh();
    }

    pub fn missing(&self) -> Vec<String> {
        self.pending.schema_list()
    }

    fn refresh(&mut self) {
        let default = self.engine.default_schema();
        self.pending.schemas = self
            .requested
            .schemas
            .iter()
            .filter(|s| !s.eq_ignore_ascii_case(default))
            .filter(|s| !self.existing.iter().any(|e| e.eq_ignore_ascii_case(s)))
            .cloned()
            .collect();
    }
}

impl SchemaDelta for SchemaCheckDelta {
    fn expected(&self) -> &dyn SchemaObjectDefinition {
        &self.pending
    }

    fn difference(&self) -> SchemaPatchDifference {
        if self.pending.schemas.is_empty() {
            SchemaPatchDifference::None
        } else {
            SchemaPatchDifference::Create
        }
    }

    fn write_update(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        self.pending.write_create_statement(migrator, w)
    }

    fn write_rollback(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        self.pending.write_drop_statement(migrator, w)
    }

    fn write_restoration_of_previous_state(
        &self,
        _migrator: &Migrator,
        _w: &mut dyn Write,
    ) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn delta(engine: Engine, existing: &[&str]) -> SchemaCheckDelta {
        let mut delta = SchemaCheckDelta {
            engine,
            requested: SchemaExistenceCheck::default(),
            pending: SchemaExistenceCheck::default(),
            existing: existing.iter().map(|s| s.to_string()).collect(),
        };
        delta.refresh();
        delta
    }

    #[test]
    fn default_and_existing_schemas_are_never_pending() {
        let mut delta = delta(Engine::Postgres, &["public", "Billing"]);
        assert_eq!(delta.difference(), SchemaPatchDifference::None);

        delta.absorb(["public", "billing", "audit"]);
        assert_eq!(delta.missing(), vec!["audit".to_string()]);
        assert_eq!(delta.difference(), SchemaPatchDifference::Create);
    }

    #[test]
    fn writes_creation_and_drop_for_missing_schemas_only() {
        let mut delta = delta(Engine::Postgres, &["public", "billing"]);
        delta.absorb(["billing", "audit"]);
        let migrator = Migrator::postgresql();

        let mut update = String::new();
        delta.write_update(&migrator, &mut update).unwrap();
        let mut rollback = String::new();
        delta.write_rollback(&migrator, &mut rollback).unwrap();

        assert_eq!(update, "CREATE SCHEMA IF NOT EXISTS audit;\n");
        assert_eq!(rollback, "DROP SCHEMA IF EXISTS audit CASCADE;\n");
    }
}

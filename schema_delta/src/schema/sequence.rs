//! PostgreSQL sequences

use std::fmt::Write;
use tokio_util::sync::CancellationToken;

use crate::db::DatabaseConnection;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::migrator::Migrator;
use crate::schema::command::{CommandBatch, SliceReader};
use crate::schema::migration::SchemaMigration;
use crate::schema::object::{PresenceDelta, SchemaObjectDefinition, SchemaObjectDelta};
use crate::schema::types::DbObjectName;
use crate::utils::naming::quote_if_needed;

/// A standalone sequence, optionally owned by a table column
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub identifier: DbObjectName,
    pub start: i64,
    /// `(table, column)` the sequence is dropped together with
    pub owner: Option<(DbObjectName, String)>,
}

impl Sequence {
    pub fn new(name: &str) -> Self {
        Self {
            identifier: DbObjectName::parse(name),
            start: 1,
            owner: None,
        }
    }

    pub fn starting_at(mut self, start: i64) -> Self {
        self.start = start;
        self
    }

    pub fn owned_by(mut self, table: DbObjectName, column: &str) -> Self {
        self.owner = Some((table, column.to_string()));
        self
    }

    /// Look this sequence up over its own pooled connection
    pub async fn fetch_delta(
        &self,
        connection: &DatabaseConnection,
        cancel: &CancellationToken,
    ) -> Result<SchemaObjectDelta> {
        let mut executor = connection.acquire().await?;
        let migration =
            SchemaMigration::determine(&mut executor, cancel, &[self.clone().into()]).await?;
        migration
            .into_deltas()
            .pop()
            .ok_or_else(|| Error::DatabaseError(format!("No delta for sequence {}", self.identifier)))
    }
}

impl SchemaObjectDefinition for Sequence {
    fn identifier(&self) -> &DbObjectName {
        &self.identifier
    }

    fn configure_query_command(&self, batch: &mut CommandBatch) -> Result<()> {
        let engine = batch.engine();
        engine.require_postgres("sequences")?;

        let statement = batch.statement();
        let schema = statement.parameter(self.identifier.schema_or_default(engine));
        let name = statement.parameter(self.identifier.name.as_str());
        statement.set_sql(format!(
            "SELECT c.relname::text AS name FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE c.relkind = 'S' AND n.nspname = {} AND c.relname = {}",
            schema, name
        ));
        Ok(())
    }

    fn create_delta(
        &self,
        _engine: Engine,
        reader: &mut SliceReader<'_>,
    ) -> Result<SchemaObjectDelta> {
        let exists = !reader.next_result()?.is_empty();
        Ok(SchemaObjectDelta::Sequence(PresenceDelta::new(
            self.clone(),
            exists,
        )))
    }

    fn write_create_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        migrator.engine().require_postgres("sequences")?;
        let name = migrator.qualified(&self.identifier);
        writeln!(w, "CREATE SEQUENCE {} START {};", name, self.start)?;
        if let Some((table, column)) = &self.owner {
            writeln!(
                w,
                "ALTER SEQUENCE {} OWNED BY {}.{};",
                name,
                migrator.qualified(table),
                quote_if_needed(column)
            )?;
        }
        Ok(())
    }

    fn write_drop_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        migrator.engine().require_postgres("sequences")?;
        writeln!(
            w,
            "DROP SEQUENCE IF EXISTS {};",
            migrator.qualified(&self.identifier)
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn writes_owned_sequences() {
        let sequence = Sequence::new("billing.invoice_numbers")
            .starting_at(1000)
            .owned_by(DbObjectName::parse("billing.invoices"), "number");

        let mut sql = String::new();
        sequence
            .write_create_statement(&Migrator::postgresql(), &mut sql)
            .unwrap();
        assert_eq!(
            sql,
            "CREATE SEQUENCE billing.invoice_numbers START 1000;\n\
             ALTER SEQUENCE billing.invoice_numbers OWNED BY billing.invoices.number;\n"
        );
    }

    #[test]
    fn sequences_are_postgres_only() {
        let sequence = Sequence::new("ids");
        let mut batch = CommandBatch::new(Engine::Sqlite);
        assert!(matches!(
            sequence.configure_query_command(&mut batch),
            Err(Error::UnsupportedError { .. })
        ));

        let mut sql = String::new();
        assert!(sequence
            .write_drop_statement(&Migrator::sqlite(), &mut sql)
            .is_err());
    }
}

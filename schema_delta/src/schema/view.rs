//! Views, compared by their canonical body text
//!
//! PostgreSQL returns view bodies through `pg_get_viewdef`, which rewrites
//! the query; an expected body only compares equal when it is written the
//! way the server prints it.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::migrator::Migrator;
use crate::schema::command::{CommandBatch, SliceReader};
use crate::schema::difference::SchemaPatchDifference;
use crate::schema::object::{SchemaDelta, SchemaObjectDefinition, SchemaObjectDelta};
use crate::schema::types::DbObjectName;
use crate::utils::naming::{normalize_whitespace, quote_if_needed};

static SQLITE_VIEW_BODY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*create\s+(?:temp(?:orary)?\s+)?view\s+(?:if\s+not\s+exists\s+)?.+?\s+as\s+(.*)$")
        .expect("valid view regex")
});

#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub identifier: DbObjectName,
    pub body: String,
    pub materialized: bool,
}

impl View {
    pub fn new(name: &str, body: &str) -> Self {
        Self {
            identifier: DbObjectName::parse(name),
            body: body.trim().trim_end_matches(';').to_string(),
            materialized: false,
        }
    }

    pub fn materialized(mut self) -> Self {
        self.materialized = true;
        self
    }

    fn kind(&self) -> &'static str {
        if self.materialized {
            "MATERIALIZED VIEW"
        } else {
            "VIEW"
        }
    }

    fn check_engine(&self, engine: Engine) -> Result<()> {
        if self.materialized && engine != Engine::Postgres {
            return Err(Error::unsupported(engine, "materialized views"));
        }
        Ok(())
    }
}

/// Case, whitespace, quoting and trailing semicolon insensitive form
fn canonical_body(body: &str) -> String {
    normalize_whitespace(body).replace('"', "")
}

impl SchemaObjectDefinition for View {
    fn identifier(&self) -> &DbObjectName {
        &self.identifier
    }

    fn configure_query_command(&self, batch: &mut CommandBatch) -> Result<()> {
        let engine = batch.engine();
        self.check_engine(engine)?;
        let schema = self.identifier.schema_or_default(engine);

        let statement = batch.statement();
        match engine {
            Engine::Postgres => {
                let schema = statement.parameter(schema);
                let name = statement.parameter(self.identifier.name.as_str());
                statement.set_sql(format!(
                    "SELECT pg_get_viewdef(c.oid, true)::text AS body, (c.relkind = 'm') AS materialized \
                     FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
                     WHERE c.relkind IN ('v', 'm') AND n.nspname = {} AND c.relname = {}",
                    schema, name
                ));
            }
            Engine::Sqlite => {
                let name = statement.parameter(self.identifier.name.as_str());
                statement.set_sql(format!(
                    "SELECT sql AS body FROM {}.sqlite_master WHERE type = 'view' AND name = {}",
                    quote_if_needed(&schema),
                    name
                ));
            }
            Engine::Generic => {
                let schema = statement.parameter(schema);
                let name = statement.parameter(self.identifier.name.as_str());
                statement.set_sql(format!(
                    "SELECT CAST(view_definition AS TEXT) AS body FROM information_schema.views \
                     WHERE table_schema = {} AND table_name = {}",
                    schema, name
                ));
            }
        }
        Ok(())
    }

    fn create_delta(
        &self,
        engine: Engine,
        reader: &mut SliceReader<'_>,
    ) -> Result<SchemaObjectDelta> {
        let set = reader.next_result()?;
        let actual = set.rows().next().map(|row| {
            let body = row.text("body").unwrap_or_default();
            let body = match engine {
                Engine::Sqlite => SQLITE_VIEW_BODY
                    .captures(&body)
                    .map(|c| c[1].to_string())
                    .unwrap_or(body),
                _ => body,
            };
            View {
                identifier: self.identifier.clone(),
                body: body.trim().trim_end_matches(';').to_string(),
                materialized: row.flag("materialized"),
            }
        });

        Ok(SchemaObjectDelta::View(ViewDelta {
            expected: self.clone(),
            actual,
        }))
    }

    fn write_create_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        self.check_engine(migrator.engine())?;
        writeln!(
            w,
            "CREATE {} {} AS {};",
            self.kind(),
            migrator.qualified(&self.identifier),
            self.body
        )?;
        Ok(())
    }

    fn write_drop_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        self.check_engine(migrator.engine())?;
        writeln!(
            w,
            "DROP {} IF EXISTS {};",
            self.kind(),
            migrator.qualified(&self.identifier)
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ViewDelta {
    pub expected: View,
    pub actual: Option<View>,
}

impl SchemaDelta for ViewDelta {
    fn expected(&self) -> &dyn SchemaObjectDefinition {
        &self.expected
    }

    fn difference(&self) -> SchemaPatchDifference {
        match &self.actual {
            None => SchemaPatchDifference::Create,
            Some(actual)
                if actual.materialized == self.expected.materialized
                    && canonical_body(&actual.body) == canonical_body(&self.expected.body) =>
            {
                SchemaPatchDifference::None
            }
            Some(_) => SchemaPatchDifference::Update,
        }
    }

    fn write_update(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        if let Some(actual) = &self.actual {
            actual.write_drop_statement(migrator, w)?;
        }
        self.expected.write_create_statement(migrator, w)
    }

    fn write_rollback(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        self.expected.write_drop_statement(migrator, w)?;
        self.write_restoration_of_previous_state(migrator, w)
    }

    fn write_restoration_of_previous_state(
        &self,
        migrator: &Migrator,
        w: &mut dyn Write,
    ) -> Result<()> {
        match &self.actual {
            Some(actual) => actual.write_create_statement(migrator, w),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn delta(expected: View, actual: Option<View>) -> ViewDelta {
        ViewDelta { expected, actual }
    }

    #[test]
    fn bodies_compare_loosely() {
        let expected = View::new("adults", "SELECT id, name FROM people WHERE age >= 18");
        let actual = View::new("adults", "select id,  name\n  from people where age >= 18;");
        assert_eq!(
            delta(expected, Some(actual)).difference(),
            SchemaPatchDifference::None
        );
    }

    #[test]
    fn changed_body_is_drop_then_create() {
        let expected = View::new("adults", "SELECT id FROM people WHERE age >= 21");
        let actual = View::new("adults", "SELECT id FROM people WHERE age >= 18");
        let delta = delta(expected, Some(actual));
        assert_eq!(delta.difference(), SchemaPatchDifference::Update);

        let mut sql = String::new();
        delta.write_update(&Migrator::sqlite(), &mut sql).unwrap();
        assert_eq!(
            sql,
            "DROP VIEW IF EXISTS adults;\nCREATE VIEW adults AS SELECT id FROM people WHERE age >= 21;\n"
        );

        let mut sql = String::new();
        delta.write_rollback(&Migrator::sqlite(), &mut sql).unwrap();
        assert_eq!(
            sql,
            "DROP VIEW IF EXISTS adults;\nCREATE VIEW adults AS SELECT id FROM people WHERE age >= 18;\n"
        );
    }

    #[test]
    fn sqlite_bodies_are_extracted_from_the_stored_statement() {
        let captures = SQLITE_VIEW_BODY
            .captures("CREATE VIEW \"adults\" AS SELECT id FROM people")
            .unwrap();
        assert_eq!(&captures[1], "SELECT id FROM people");
    }

    #[test]
    fn materialized_views_are_postgres_only() {
        let view = View::new("totals", "SELECT 1").materialized();
        let mut sql = String::new();
        view.write_create_statement(&Migrator::postgresql(), &mut sql)
            .unwrap();
        assert_eq!(sql, "CREATE MATERIALIZED VIEW public.totals AS SELECT 1;\n");
        assert!(view
            .write_create_statement(&Migrator::sqlite(), &mut String::new())
            .is_err());
    }
}

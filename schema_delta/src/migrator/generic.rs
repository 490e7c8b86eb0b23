use std::fmt::Write;

use super::{write_per_schema, ApplyMode, Migrator, MigratorDialect};
use crate::engine::Engine;
use crate::error::{Error, Result};

const MAX_IDENTIFIER_CHARS: usize = 128;

/// ANSI-flavoured rules for providers reached through `sqlx::Any`
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericDialect;

impl MigratorDialect for GenericDialect {
    fn engine(&self) -> Engine {
        Engine::Generic
    }

    fn write_script(&self, migrator: &Migrator, w: &mut dyn Write, body: &str) -> Result<()> {
        if migrator.is_transactional {
            writeln!(w, "BEGIN TRANSACTION;")?;
        }
        w.write_str(body)?;
        if !body.is_empty() && !body.ends_with('\n') {
            writeln!(w)?;
        }
        if migrator.is_transactional {
            writeln!(w, "COMMIT;")?;
        }
        Ok(())
    }

    fn write_schema_creation_sql(&self, schemas: &[String], w: &mut dyn Write) -> Result<()> {
        write_per_schema(w, schemas, "CREATE SCHEMA {schema};")
    }

    fn write_schema_drop_sql(&self, schemas: &[String], w: &mut dyn Write) -> Result<()> {
        write_per_schema(w, schemas, "DROP SCHEMA {schema};")
    }

    fn assert_valid_identifier(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_identifier(name, "identifier is empty"));
        }
        if name.chars().count() > MAX_IDENTIFIER_CHARS {
            return Err(Error::invalid_identifier(
                name,
                format!("longer than {} characters", MAX_IDENTIFIER_CHARS),
            ));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(Error::invalid_identifier(name, "contains whitespace"));
        }
        Ok(())
    }

    fn to_execute_script_line(&self, file: &str) -> String {
        format!("@{}", file)
    }

    fn apply_mode(&self) -> ApplyMode {
        ApplyMode::WholeScript
    }
}

use std::fmt::Write;

use super::{script_argument, write_per_schema, ApplyMode, Migrator, MigratorDialect};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::utils::naming::quote_if_needed;

/// PostgreSQL truncates identifiers longer than this many bytes
const MAX_IDENTIFIER_BYTES: usize = 63;

#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl MigratorDialect for PostgresDialect {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn write_script(&self, migrator: &Migrator, w: &mut dyn Write, body: &str) -> Result<()> {
        if migrator.is_transactional {
            writeln!(w, "BEGIN;")?;
        }
        if let Some(role) = &migrator.role {
            writeln!(w, "SET ROLE {};", quote_if_needed(role))?;
        }
        w.write_str(body)?;
        if !body.is_empty() && !body.ends_with('\n') {
            writeln!(w)?;
        }
        if migrator.role.is_some() {
            writeln!(w, "RESET ROLE;")?;
        }
        if migrator.is_transactional {
            writeln!(w, "COMMIT;")?;
        }
        Ok(())
    }

    fn write_schema_creation_sql(&self, schemas: &[String], w: &mut dyn Write) -> Result<()> {
        write_per_schema(w, schemas, "CREATE SCHEMA IF NOT EXISTS {schema};")
    }

    fn write_schema_drop_sql(&self, schemas: &[String], w: &mut dyn Write) -> Result<()> {
        write_per_schema(w, schemas, "DROP SCHEMA IF EXISTS {schema} CASCADE;")
    }

    fn assert_valid_identifier(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_identifier(name, "identifier is empty"));
        }
        if name.len() > MAX_IDENTIFIER_BYTES {
            return Err(Error::invalid_identifier(
                name,
                format!(
                    "longer than {} bytes and would be truncated",
                    MAX_IDENTIFIER_BYTES
                ),
            ));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(Error::invalid_identifier(name, "contains whitespace"));
        }
        Ok(())
    }

    fn to_execute_script_line(&self, file: &str) -> String {
        format!("\\i {}", script_argument(file))
    }

    fn apply_mode(&self) -> ApplyMode {
        ApplyMode::WholeScript
    }

    fn cascade_clause(&self) -> &'static str {
        " CASCADE"
    }
}

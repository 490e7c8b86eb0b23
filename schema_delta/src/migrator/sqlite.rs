use std::fmt::Write;

use super::{script_argument, ApplyMode, Migrator, MigratorDialect};
use crate::engine::Engine;
use crate::error::{Error, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl MigratorDialect for SqliteDialect {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    // Table renames must not re-check views over the table being rebuilt
    fn write_script(&self, migrator: &Migrator, w: &mut dyn Write, body: &str) -> Result<()> {
        writeln!(w, "PRAGMA foreign_keys = OFF;")?;
        writeln!(w, "PRAGMA legacy_alter_table = ON;")?;
        if migrator.is_transactional {
            writeln!(w, "BEGIN;")?;
        }
        w.write_str(body)?;
        if !body.is_empty() && !body.ends_with('\n') {
            writeln!(w)?;
        }
        if migrator.is_transactional {
            writeln!(w, "COMMIT;")?;
        }
        writeln!(w, "PRAGMA legacy_alter_table = OFF;")?;
        writeln!(w, "PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    /// Schemas are attached databases and cannot be created with DDL
    fn write_schema_creation_sql(&self, _schemas: &[String], _w: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    fn write_schema_drop_sql(&self, _schemas: &[String], _w: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    fn assert_valid_identifier(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_identifier(name, "identifier is empty"));
        }
        if name.contains('\0') {
            return Err(Error::invalid_identifier(name, "contains a NUL character"));
        }
        if name.to_lowercase().starts_with("sqlite_") {
            return Err(Error::invalid_identifier(
                name,
                "names beginning with sqlite_ are reserved",
            ));
        }
        Ok(())
    }

    fn to_execute_script_line(&self, file: &str) -> String {
        format!(".read {}", script_argument(file))
    }

    fn apply_mode(&self) -> ApplyMode {
        ApplyMode::PerDelta
    }
}

//! Per-engine script formatting and live application
//!
//! A [`Migrator`] pairs an engine's [`MigratorDialect`] with the settings
//! that shape every script it writes: transaction wrapping, an optional
//! role switch and the style used to create tables. It is passed
//! explicitly to every DDL writer.

mod generic;
mod postgres;
mod sqlite;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::schema::command::CommandRunner;
use crate::schema::difference::{AutoCreate, SchemaPatchDifference};
use crate::schema::migration::SchemaMigration;
use crate::schema::object::SchemaObjectDelta;
use crate::schema::types::DbObjectName;
use crate::utils::naming::quote_if_needed;

pub use generic::GenericDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

/// How `CREATE TABLE` statements are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationStyle {
    /// `DROP TABLE IF EXISTS` followed by `CREATE TABLE`
    #[default]
    DropThenCreate,
    /// `CREATE TABLE IF NOT EXISTS`
    CreateIfNotExists,
}

/// How a migration is sent to the database when applied live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// One script holding every delta
    WholeScript,
    /// One script per delta
    PerDelta,
}

/// Engine-specific hooks used by [`Migrator`]
pub trait MigratorDialect: fmt::Debug + Send + Sync {
    fn engine(&self) -> Engine;

    /// Wrap `body` in the engine's transaction and role handling
    fn write_script(&self, migrator: &Migrator, w: &mut dyn Write, body: &str) -> Result<()>;

    fn write_schema_creation_sql(&self, schemas: &[String], w: &mut dyn Write) -> Result<()>;

    fn write_schema_drop_sql(&self, schemas: &[String], w: &mut dyn Write) -> Result<()>;

    /// Reject identifiers the engine would truncate or refuse
    fn assert_valid_identifier(&self, name: &str) -> Result<()>;

    /// Client command that runs the script stored in `file`
    fn to_execute_script_line(&self, file: &str) -> String;

    fn apply_mode(&self) -> ApplyMode;

    /// Suffix for `DROP TABLE` that also removes dependent objects
    fn cascade_clause(&self) -> &'static str {
        ""
    }
}

/// Receives every script the migrator executes
pub trait MigrationLogger: Send + Sync {
    fn schema_change(&self, sql: &str) {
        info!(sql, "Applying schema change");
    }

    /// Called when a script fails; returning `Ok` swallows the failure
    fn on_failure(&self, sql: &str, error: Error) -> Result<()> {
        error!(sql, error = %error, "Schema change failed");
        Err(error)
    }
}

/// Logs through `tracing` and rethrows failures
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMigrationLogger;

impl MigrationLogger for DefaultMigrationLogger {}

/// Formatting and execution rules for one engine
#[derive(Debug, Clone)]
pub struct Migrator {
    dialect: Arc<dyn MigratorDialect>,
    pub role: Option<String>,
    pub is_transactional: bool,
    pub table_creation: CreationStyle,
}

impl Migrator {
    pub fn new(dialect: Arc<dyn MigratorDialect>) -> Self {
        Self {
            dialect,
            role: None,
            is_transactional: true,
            table_creation: CreationStyle::default(),
        }
    }

    pub fn postgresql() -> Self {
        Self::new(Arc::new(PostgresDialect))
    }

    pub fn sqlite() -> Self {
        Self::new(Arc::new(SqliteDialect))
    }

    pub fn generic() -> Self {
        Self::new(Arc::new(GenericDialect))
    }

    pub fn for_engine(engine: Engine) -> Self {
        match engine {
            Engine::Postgres => Self::postgresql(),
            Engine::Sqlite => Self::sqlite(),
            Engine::Generic => Self::generic(),
        }
    }

    /// Build a migrator from the `[database]` and `[migrator]` sections
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = Engine::from_driver(&config.database.driver)?;
        let settings = &config.migrator;
        let mut migrator = Self::for_engine(engine);
        migrator.role = settings.role.clone();
        migrator.is_transactional = settings.transactional;
        migrator.table_creation = settings.table_creation;
        Ok(migrator)
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn transactional(mut self, is_transactional: bool) -> Self {
        self.is_transactional = is_transactional;
        self
    }

    pub fn with_table_creation(mut self, style: CreationStyle) -> Self {
        self.table_creation = style;
        self
    }

    pub fn engine(&self) -> Engine {
        self.dialect.engine()
    }

    pub fn dialect(&self) -> &dyn MigratorDialect {
        self.dialect.as_ref()
    }

    /// Qualified, quoted name for this engine
    pub fn qualified(&self, name: &DbObjectName) -> String {
        name.qualified_name(self.engine())
    }

    pub fn write_script(&self, w: &mut dyn Write, body: &str) -> Result<()> {
        self.dialect.write_script(self, w, body)
    }

    pub fn write_schema_creation_sql(&self, schemas: &[String], w: &mut dyn Write) -> Result<()> {
        self.dialect.write_schema_creation_sql(schemas, w)
    }

    pub fn write_schema_drop_sql(&self, schemas: &[String], w: &mut dyn Write) -> Result<()> {
        self.dialect.write_schema_drop_sql(schemas, w)
    }

    pub fn assert_valid_identifier(&self, name: &str) -> Result<()> {
        self.dialect.assert_valid_identifier(name)
    }

    pub fn to_execute_script_line(&self, file: &str) -> String {
        self.dialect.to_execute_script_line(file)
    }

    /// `DROP TABLE IF EXISTS` including any cascade the engine needs
    pub fn write_drop_table(&self, table: &DbObjectName, w: &mut dyn Write) -> Result<()> {
        writeln!(
            w,
            "DROP TABLE IF EXISTS {}{};",
            self.qualified(table),
            self.dialect.cascade_clause()
        )?;
        Ok(())
    }

    /// Every forward statement wrapped as one script
    pub fn update_script(&self, migration: &SchemaMigration) -> Result<String> {
        let mut body = String::new();
        migration.write_all_updates(self, &mut body)?;
        let mut script = String::new();
        self.write_script(&mut script, &body)?;
        Ok(script)
    }

    /// Every rollback statement wrapped as one script
    pub fn rollback_script(&self, migration: &SchemaMigration) -> Result<String> {
        let mut body = String::new();
        migration.write_all_rollbacks(self, &mut body)?;
        let mut script = String::new();
        self.write_script(&mut script, &body)?;
        Ok(script)
    }

    /// Timestamped file name for a script, e.g. `20240101120000_add_people.sql`
    pub fn script_path(directory: impl AsRef<Path>, description: &str) -> PathBuf {
        let timestamp = Utc::now().format("%Y%m%d%H%M%S");
        let slug: String = description
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        directory
            .as_ref()
            .join(format!("{}_{}.sql", timestamp, slug))
    }

    /// Write the forward script to `path`, creating parent directories
    pub fn write_migration_file(
        &self,
        path: impl AsRef<Path>,
        migration: &SchemaMigration,
    ) -> Result<()> {
        let script = self.update_script(migration)?;
        write_file(path.as_ref(), &script)
    }

    /// Write the rollback script to `path`, creating parent directories
    pub fn write_rollback_file(
        &self,
        path: impl AsRef<Path>,
        migration: &SchemaMigration,
    ) -> Result<()> {
        let script = self.rollback_script(migration)?;
        write_file(path.as_ref(), &script)
    }

    /// Apply a migration over `runner`
    ///
    /// The policy is checked first and [`AutoCreate::None`] applies nothing.
    /// Schema existence checks run ahead of every other delta.
    pub async fn apply_all<R>(
        &self,
        runner: &mut R,
        migration: &SchemaMigration,
        auto_create: AutoCreate,
        logger: &dyn MigrationLogger,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        R: CommandRunner + ?Sized,
    {
        migration.assert_patching_is_valid(auto_create)?;
        if auto_create == AutoCreate::None {
            info!("AutoCreate::None, no schema changes applied");
            return Ok(());
        }

        let pending: Vec<&SchemaObjectDelta> = ordered_for_apply(migration.deltas());
        if pending.is_empty() {
            info!("Database schema already matches, nothing to apply");
            return Ok(());
        }

        for delta in &pending {
            for name in delta.delta().expected().all_names() {
                if let Some(schema) = &name.schema {
                    self.assert_valid_identifier(schema)?;
                }
                self.assert_valid_identifier(&name.name)?;
            }
        }

        match self.dialect.apply_mode() {
            ApplyMode::WholeScript => {
                let mut body = String::new();
                for delta in &pending {
                    delta.write_update(self, &mut body)?;
                }
                self.run_script(runner, &body, logger, cancel).await?;
            }
            ApplyMode::PerDelta => {
                for delta in &pending {
                    let body = delta.update_sql(self)?;
                    debug!(object = %delta.identifier(), "Applying delta");
                    self.run_script(runner, &body, logger, cancel).await?;
                }
            }
        }

        info!(changes = pending.len(), "Schema changes applied");
        Ok(())
    }

    async fn run_script<R>(
        &self,
        runner: &mut R,
        body: &str,
        logger: &dyn MigrationLogger,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        R: CommandRunner + ?Sized,
    {
        if body.trim().is_empty() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut script = String::new();
        self.write_script(&mut script, body)?;
        logger.schema_change(&script);

        match runner.execute(&script, cancel).await {
            Ok(_) => Ok(()),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => logger.on_failure(&script, e),
        }
    }
}

fn ordered_for_apply(deltas: &[SchemaObjectDelta]) -> Vec<&SchemaObjectDelta> {
    let (checks, others): (Vec<&SchemaObjectDelta>, Vec<&SchemaObjectDelta>) = deltas
        .iter()
        .filter(|d| d.difference() != SchemaPatchDifference::None)
        .partition(|d| matches!(d, SchemaObjectDelta::SchemaExistenceCheck(_)));
    checks.into_iter().chain(others).collect()
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, contents)?;
    info!(path = %path.display(), "Wrote migration script");
    Ok(())
}

/// Quote a script path for client commands when it contains whitespace
pub(crate) fn script_argument(file: &str) -> String {
    if file.chars().any(char::is_whitespace) {
        format!("'{}'", file.replace('\'', "''"))
    } else {
        file.to_string()
    }
}

/// One `CREATE SCHEMA`-style statement per schema
pub(crate) fn write_per_schema(
    w: &mut dyn Write,
    schemas: &[String],
    template: &str,
) -> Result<()> {
    for schema in schemas {
        writeln!(w, "{}", template.replace("{schema}", &quote_if_needed(schema)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn postgres_script_switches_role_inside_the_transaction() {
        let migrator = Migrator::postgresql().with_role("app_owner");
        let mut script = String::new();
        migrator
            .write_script(&mut script, "CREATE TABLE public.t (id integer);\n")
            .unwrap();
        assert_eq!(
            script,
            "BEGIN;\nSET ROLE app_owner;\nCREATE TABLE public.t (id integer);\nRESET ROLE;\nCOMMIT;\n"
        );
    }

    #[test]
    fn non_transactional_postgres_script_is_bare() {
        let migrator = Migrator::postgresql().transactional(false);
        let mut script = String::new();
        migrator.write_script(&mut script, "SELECT 1;\n").unwrap();
        assert_eq!(script, "SELECT 1;\n");
    }

    #[test]
    fn sqlite_script_brackets_the_transaction_with_pragmas() {
        let mut script = String::new();
        Migrator::sqlite()
            .write_script(&mut script, "DROP TABLE t;\n")
            .unwrap();
        assert_eq!(
            script,
            "PRAGMA foreign_keys = OFF;\n\
             PRAGMA legacy_alter_table = ON;\n\
             BEGIN;\n\
             DROP TABLE t;\n\
             COMMIT;\n\
             PRAGMA legacy_alter_table = OFF;\n\
             PRAGMA foreign_keys = ON;\n"
        );
    }

    #[test]
    fn generic_script_uses_begin_transaction() {
        let mut script = String::new();
        Migrator::generic()
            .write_script(&mut script, "DROP TABLE t;\n")
            .unwrap();
        assert_eq!(script, "BEGIN TRANSACTION;\nDROP TABLE t;\nCOMMIT;\n");
    }

    #[rstest]
    #[case(Engine::Postgres, "CREATE SCHEMA IF NOT EXISTS sales;\n")]
    #[case(Engine::Sqlite, "")]
    #[case(Engine::Generic, "CREATE SCHEMA sales;\n")]
    fn schema_creation_per_engine(#[case] engine: Engine, #[case] expected: &str) {
        let mut sql = String::new();
        Migrator::for_engine(engine)
            .write_schema_creation_sql(&["sales".to_string()], &mut sql)
            .unwrap();
        assert_eq!(sql, expected);
    }

    #[rstest]
    #[case(Engine::Postgres, "\\i up.sql")]
    #[case(Engine::Sqlite, ".read up.sql")]
    #[case(Engine::Generic, "@up.sql")]
    fn execute_script_lines(#[case] engine: Engine, #[case] expected: &str) {
        assert_eq!(
            Migrator::for_engine(engine).to_execute_script_line("up.sql"),
            expected
        );
    }

    #[test]
    fn identifier_rules_differ_per_engine() {
        let long = "x".repeat(64);
        assert!(Migrator::postgresql().assert_valid_identifier(&long).is_err());
        assert!(Migrator::generic().assert_valid_identifier(&long).is_ok());
        assert!(Migrator::sqlite().assert_valid_identifier(&long).is_ok());

        assert!(Migrator::postgresql().assert_valid_identifier("has space").is_err());
        assert!(Migrator::sqlite().assert_valid_identifier("sqlite_stat1").is_err());
        assert!(Migrator::generic().assert_valid_identifier("").is_err());
    }

    #[test]
    fn drop_table_cascades_on_postgres_only() {
        let name = DbObjectName::unqualified("people");
        let mut pg = String::new();
        Migrator::postgresql().write_drop_table(&name, &mut pg).unwrap();
        assert_eq!(pg, "DROP TABLE IF EXISTS public.people CASCADE;\n");

        let mut sqlite = String::new();
        Migrator::sqlite().write_drop_table(&name, &mut sqlite).unwrap();
        assert_eq!(sqlite, "DROP TABLE IF EXISTS people;\n");
    }

    #[test]
    fn builds_from_config() {
        let config = crate::config::parse(
            r#"
            [database]
            driver = "postgres"
            url = "postgres://localhost/app"

            [migrator]
            role = "owner"
            transactional = false
            table_creation = "create_if_not_exists"
            "#,
        )
        .unwrap();
        let migrator = Migrator::from_config(&config).unwrap();
        assert_eq!(migrator.engine(), Engine::Postgres);
        assert_eq!(migrator.role.as_deref(), Some("owner"));
        assert!(!migrator.is_transactional);
        assert_eq!(migrator.table_creation, CreationStyle::CreateIfNotExists);
    }

    #[test]
    fn script_paths_are_timestamped() {
        let path = Migrator::script_path("migrations", "Add people");
        let file = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file.ends_with("_add_people.sql"));
        assert_eq!(file.len(), "20240101120000_add_people.sql".len());
    }
}

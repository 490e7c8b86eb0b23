//! schema_delta: schema delta detection and DDL synthesis for PostgreSQL,
//! SQLite and generic `information_schema` databases
//!
//! Declare the tables, views, functions and other objects you want, let
//! schema_delta compare them with the live database, and either write the
//! forward and rollback scripts or apply the changes directly under an
//! [`AutoCreate`] policy.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod migrator;
pub mod partition;
pub mod schema;
pub mod utils;

use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

// Re-export main types for easier access
pub use config::Config;
pub use db::{DatabaseConnection, SqlExecutor};
pub use engine::Engine;
pub use error::{Error, Result};
pub use migrator::{
    CreationStyle, DefaultMigrationLogger, MigrationLogger, Migrator, MigratorDialect,
};
pub use partition::{ManagedListPartitions, PartitionStrategy};
pub use schema::{
    AutoCreate, SchemaMigration, SchemaObject, SchemaObjectDelta, SchemaPatchDifference, Table,
};

/// Initialize schema_delta with the specified configuration file
pub async fn init(config_path: &str) -> Result<SchemaDeltaClient> {
    let config = config::load_from_file(config_path)?;
    utils::logging::init_logging(&config.logging)?;
    SchemaDeltaClient::new(config).await
}

/// The main client tying configuration, connection pool and migrator together
pub struct SchemaDeltaClient {
    config: Config,
    connection: DatabaseConnection,
    migrator: Migrator,
}

impl SchemaDeltaClient {
    /// Create a new client from configuration
    pub async fn new(config: Config) -> Result<Self> {
        let migrator = Migrator::from_config(&config)?;
        let connection = DatabaseConnection::connect(&config.database).await?;

        Ok(Self {
            config,
            connection,
            migrator,
        })
    }

    pub fn migrator(&self) -> &Migrator {
        &self.migrator
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Compare `objects` with the database
    pub async fn determine(
        &self,
        objects: &[SchemaObject],
        cancel: &CancellationToken,
    ) -> Result<SchemaMigration> {
        let mut executor = self.connection.acquire().await?;
        SchemaMigration::determine(&mut executor, cancel, objects).await
    }

    /// Write forward and rollback scripts into the configured script directory
    pub fn write_scripts(
        &self,
        migration: &SchemaMigration,
        description: &str,
    ) -> Result<(PathBuf, PathBuf)> {
        let directory = self
            .config
            .migrator
            .script_directory
            .as_deref()
            .ok_or_else(|| Error::ConfigError("migrator.script_directory is not set".to_string()))?;

        let forward = Migrator::script_path(directory, description);
        let rollback = forward.with_extension("rollback.sql");
        self.migrator.write_migration_file(&forward, migration)?;
        self.migrator.write_rollback_file(&rollback, migration)?;
        Ok((forward, rollback))
    }

    /// Determine and apply in one pass over a single connection, under the
    /// configured [`AutoCreate`] policy
    pub async fn sync(
        &self,
        objects: &[SchemaObject],
        cancel: &CancellationToken,
    ) -> Result<SchemaMigration> {
        let mut executor = self.connection.acquire().await?;
        let migration = SchemaMigration::determine(&mut executor, cancel, objects).await?;

        if migration.difference() == SchemaPatchDifference::None {
            tracing::info!("Database schema already matches the declared objects");
            return Ok(migration);
        }

        self.migrator
            .apply_all(
                &mut executor,
                &migration,
                self.config.migrator.auto_create,
                &DefaultMigrationLogger,
                cancel,
            )
            .await?;
        Ok(migration)
    }
}

//! Database connection handling
//!
//! This module establishes the connection pools the executor draws from.

use sqlx::{
    any::AnyPoolOptions, postgres::PgPoolOptions, sqlite::SqlitePoolOptions, AnyPool, Pool,
    Postgres, Sqlite,
};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::db::executor::SqlExecutor;
use crate::engine::Engine;
use crate::error::Result;

/// A pool for one of the supported engines
#[derive(Debug, Clone)]
pub enum DatabaseConnection {
    Postgres(Pool<Postgres>),
    Sqlite(Pool<Sqlite>),
    Any(AnyPool),
}

impl DatabaseConnection {
    /// Create a new connection pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let engine = Engine::from_driver(&config.driver)?;
        let pool_size = config.pool_size.unwrap_or(10);
        let timeout = Duration::from_secs(config.timeout_seconds.unwrap_or(30));

        let connection = match engine {
            Engine::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await?;

                DatabaseConnection::Postgres(pool)
            }
            Engine::Sqlite => {
                let pool = SqlitePoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await?;

                DatabaseConnection::Sqlite(pool)
            }
            Engine::Generic => {
                sqlx::any::install_default_drivers();
                let pool = AnyPoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await?;

                DatabaseConnection::Any(pool)
            }
        };

        info!(engine = %engine, pool_size, "Connected to database");
        Ok(connection)
    }

    pub fn engine(&self) -> Engine {
        match self {
            DatabaseConnection::Postgres(_) => Engine::Postgres,
            DatabaseConnection::Sqlite(_) => Engine::Sqlite,
            DatabaseConnection::Any(_) => Engine::Generic,
        }
    }

    /// Check out one pooled connection for a determine-plus-apply run
    ///
    /// The connection returns to the pool when the executor is dropped.
    pub async fn acquire(&self) -> Result<SqlExecutor> {
        let executor = match self {
            DatabaseConnection::Postgres(pool) => SqlExecutor::postgres(pool.acquire().await?),
            DatabaseConnection::Sqlite(pool) => SqlExecutor::sqlite(pool.acquire().await?),
            DatabaseConnection::Any(pool) => SqlExecutor::any(pool.acquire().await?),
        };
        Ok(executor)
    }

    pub async fn close(&self) {
        match self {
            DatabaseConnection::Postgres(pool) => pool.close().await,
            DatabaseConnection::Sqlite(pool) => pool.close().await,
            DatabaseConnection::Any(pool) => pool.close().await,
        }
    }
}

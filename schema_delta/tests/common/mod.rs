//! Helpers shared by the integration tests

#![allow(dead_code)]

use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;

use schema_delta::schema::{CommandBatch, CommandRunner, ResultSet};
use schema_delta::{DatabaseConnection, Engine, SqlExecutor};

/// A private in-memory SQLite database behind a single pooled connection
pub async fn memory_database() -> DatabaseConnection {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    DatabaseConnection::Sqlite(pool)
}

pub async fn run(executor: &mut SqlExecutor, sql: &str) {
    executor
        .execute(sql, &CancellationToken::new())
        .await
        .unwrap_or_else(|e| panic!("failed to run {}: {}", sql, e));
}

pub async fn query(executor: &mut SqlExecutor, sql: &str) -> ResultSet {
    let mut batch = CommandBatch::new(Engine::Sqlite);
    batch.statement().set_sql(sql);
    executor
        .fetch_results(&batch, &CancellationToken::new())
        .await
        .expect("query")
        .remove(0)
}

/// Every row of `sql` rendered as `a|b|c` strings
pub async fn rows(executor: &mut SqlExecutor, sql: &str) -> Vec<String> {
    query(executor, sql)
        .await
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|value| value.as_text().unwrap_or_else(|| "NULL".to_string()))
                .collect::<Vec<_>>()
                .join("|")
        })
        .collect()
}

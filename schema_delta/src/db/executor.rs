//! SQL executor
//!
//! [`SqlExecutor`] holds one pooled connection and runs both the batched
//! existence queries and the migration scripts over it.

use async_trait::async_trait;
use sqlx::AnyConnection;
use sqlx::pool::PoolConnection;
use sqlx::{Any, Column as _, Executor, Postgres, Row, Sqlite, ValueRef};
use std::borrow::Cow;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::schema::command::{CommandBatch, CommandRunner, ResultSet, SqlValue, Statement};

enum PooledConnection {
    Postgres(PoolConnection<Postgres>),
    Sqlite(PoolConnection<Sqlite>),
    Any(PoolConnection<Any>),
}

/// Runs statements over a single connection checked out of a pool
pub struct SqlExecutor {
    connection: PooledConnection,
}

/// Bind every parameter of a statement, in order
macro_rules! bind_parameters {
    ($query:expr, $parameters:expr) => {{
        let mut query = $query;
        for value in $parameters {
            query = match value {
                SqlValue::Null => query.bind(Option::<String>::None),
                SqlValue::Bool(b) => query.bind(*b),
                SqlValue::Int(i) => query.bind(*i),
                SqlValue::Float(f) => query.bind(*f),
                SqlValue::Text(s) => query.bind(s.clone()),
            };
        }
        query
    }};
}

/// Decode driver rows into a [`ResultSet`], trying the types the catalog
/// queries produce
macro_rules! decode_rows {
    ($rows:expr) => {{
        let rows = $rows;
        let mut set = ResultSet::new(
            rows.first()
                .map(|row| {
                    row.columns()
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default(),
        );
        for row in &rows {
            let mut values = Vec::with_capacity(row.len());
            for index in 0..row.len() {
                if row.try_get_raw(index)?.is_null() {
                    values.push(SqlValue::Null);
                    continue;
                }
                let value = if let Ok(v) = row.try_get::<String, _>(index) {
                    SqlValue::Text(v)
                } else if let Ok(v) = row.try_get::<i64, _>(index) {
                    SqlValue::Int(v)
                } else if let Ok(v) = row.try_get::<i32, _>(index) {
                    SqlValue::Int(i64::from(v))
                } else if let Ok(v) = row.try_get::<i16, _>(index) {
                    SqlValue::Int(i64::from(v))
                } else if let Ok(v) = row.try_get::<bool, _>(index) {
                    SqlValue::Bool(v)
                } else if let Ok(v) = row.try_get::<f64, _>(index) {
                    SqlValue::Float(v)
                } else {
                    return Err(Error::DatabaseError(format!(
                        "Unsupported value type in column {}",
                        row.columns()[index].name()
                    )));
                };
                values.push(value);
            }
            set.rows.push(values);
        }
        set
    }};
}

/// Statement text for the backend behind an `Any` connection
///
/// sqlx passes SQL through untouched, so the positional `?` placeholders of
/// generic statements are numbered for PostgreSQL backends.
fn any_sql<'a>(connection: &AnyConnection, sql: &'a str) -> Cow<'a, str> {
    if connection.backend_name().eq_ignore_ascii_case("PostgreSQL") {
        Cow::Owned(numbered_placeholders(sql))
    } else {
        Cow::Borrowed(sql)
    }
}

/// Rewrite `?` placeholders as `$1`, `$2`, ... outside quoted text
fn numbered_placeholders(sql: &str) -> String {
    let mut numbered = String::with_capacity(sql.len() + 8);
    let mut quote: Option<char> = None;
    let mut index = 0;

    for ch in sql.chars() {
        match quote {
            Some(open) => {
                if ch == open {
                    quote = None;
                }
                numbered.push(ch);
            }
            None if ch == '\'' || ch == '"' => {
                quote = Some(ch);
                numbered.push(ch);
            }
            None if ch == '?' => {
                index += 1;
                numbered.push('$');
                numbered.push_str(&index.to_string());
            }
            None => numbered.push(ch),
        }
    }

    numbered
}

impl SqlExecutor {
    pub(crate) fn postgres(connection: PoolConnection<Postgres>) -> Self {
        Self {
            connection: PooledConnection::Postgres(connection),
        }
    }

    pub(crate) fn sqlite(connection: PoolConnection<Sqlite>) -> Self {
        Self {
            connection: PooledConnection::Sqlite(connection),
        }
    }

    pub(crate) fn any(connection: PoolConnection<Any>) -> Self {
        Self {
            connection: PooledConnection::Any(connection),
        }
    }

    async fn fetch_one_set(&mut self, statement: &Statement) -> Result<ResultSet> {
        let set = match &mut self.connection {
            PooledConnection::Postgres(conn) => {
                let query = bind_parameters!(sqlx::query(statement.sql()), statement.parameters());
                decode_rows!(query.fetch_all(&mut **conn).await?)
            }
            PooledConnection::Sqlite(conn) => {
                let query = bind_parameters!(sqlx::query(statement.sql()), statement.parameters());
                decode_rows!(query.fetch_all(&mut **conn).await?)
            }
            PooledConnection::Any(conn) => {
                let sql = any_sql(conn, statement.sql());
                let query = bind_parameters!(sqlx::query(&sql), statement.parameters());
                decode_rows!(query.fetch_all(&mut **conn).await?)
            }
        };
        Ok(set)
    }

    async fn execute_script(&mut self, sql: &str) -> Result<u64> {
        let result = match &mut self.connection {
            PooledConnection::Postgres(conn) => (&mut **conn).execute(sql).await?.rows_affected(),
            PooledConnection::Sqlite(conn) => (&mut **conn).execute(sql).await?.rows_affected(),
            PooledConnection::Any(conn) => (&mut **conn).execute(sql).await?.rows_affected(),
        };
        Ok(result)
    }

    async fn execute_bound(&mut self, statement: &Statement) -> Result<u64> {
        let result = match &mut self.connection {
            PooledConnection::Postgres(conn) => {
                let query = bind_parameters!(sqlx::query(statement.sql()), statement.parameters());
                query.execute(&mut **conn).await?.rows_affected()
            }
            PooledConnection::Sqlite(conn) => {
                let query = bind_parameters!(sqlx::query(statement.sql()), statement.parameters());
                query.execute(&mut **conn).await?.rows_affected()
            }
            PooledConnection::Any(conn) => {
                let sql = any_sql(conn, statement.sql());
                let query = bind_parameters!(sqlx::query(&sql), statement.parameters());
                query.execute(&mut **conn).await?.rows_affected()
            }
        };
        Ok(result)
    }
}

#[async_trait]
impl CommandRunner for SqlExecutor {
    fn engine(&self) -> Engine {
        match self.connection {
            PooledConnection::Postgres(_) => Engine::Postgres,
            PooledConnection::Sqlite(_) => Engine::Sqlite,
            PooledConnection::Any(_) => Engine::Generic,
        }
    }

    async fn fetch_results(
        &mut self,
        batch: &CommandBatch,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResultSet>> {
        debug!(statements = batch.statements().len(), "Running command batch");
        let fetch = async {
            let mut sets = Vec::with_capacity(batch.statements().len());
            for statement in batch.statements() {
                sets.push(self.fetch_one_set(statement).await?);
            }
            Ok::<_, Error>(sets)
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = fetch => result,
        }
    }

    async fn execute(&mut self, sql: &str, cancel: &CancellationToken) -> Result<u64> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.execute_script(sql) => result,
        }
    }

    async fn execute_statement(
        &mut self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.execute_bound(statement) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn placeholders_are_numbered_outside_quotes() {
        assert_eq!(
            numbered_placeholders(
                "SELECT '?', \"a?\" FROM t WHERE x = ? AND y = 'it''s ?' AND z = ?"
            ),
            "SELECT '?', \"a?\" FROM t WHERE x = $1 AND y = 'it''s ?' AND z = $2"
        );
        assert_eq!(numbered_placeholders("SELECT 1"), "SELECT 1");
    }
}

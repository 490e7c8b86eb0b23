//! Batched existence queries and the result cursor that feeds them back
//!
//! Every schema object appends its statements to one [`CommandBatch`]
//! inside a slice opened with [`CommandBatch::begin_slice`]. After the
//! batch runs, a [`ResultCursor`] hands each object exactly the result sets
//! produced by its own slice, in order. Reading out of turn, reading past
//! the end of a slice or leaving a slice partially unread is reported as
//! [`Error::ResultSetMisalignment`] instead of silently shifting every later
//! object onto the wrong rows.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::error::{Error, Result};

/// A value bound to, or read back from, a statement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Float(f) => Some(f.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            SqlValue::Bool(b) => Some(i64::from(*b)),
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Float(f) => Some(*f as i64),
            SqlValue::Null => None,
        }
    }

    /// Truthiness the way catalogs report it: booleans, non-zero integers,
    /// and `t`/`true`/`yes`/`y`/`1` text
    pub fn as_bool(&self) -> bool {
        match self {
            SqlValue::Bool(b) => *b,
            SqlValue::Int(i) => *i != 0,
            SqlValue::Text(s) => matches!(
                s.trim().to_lowercase().as_str(),
                "t" | "true" | "yes" | "y" | "1"
            ),
            SqlValue::Float(f) => *f != 0.0,
            SqlValue::Null => false,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One SQL statement plus its positional parameters
#[derive(Debug, Clone)]
pub struct Statement {
    engine: Engine,
    sql: String,
    parameters: Vec<SqlValue>,
}

impl Statement {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            sql: String::new(),
            parameters: Vec::new(),
        }
    }

    /// Bind a value and return the placeholder that refers to it
    pub fn parameter(&mut self, value: impl Into<SqlValue>) -> String {
        self.parameters.push(value.into());
        self.engine.placeholder(self.parameters.len())
    }

    /// Set the statement text
    pub fn set_sql(&mut self, sql: impl Into<String>) -> &mut Self {
        self.sql = sql.into();
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &[SqlValue] {
        &self.parameters
    }
}

/// Identifies the slice of a batch that belongs to one schema object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceToken(usize);

impl SliceToken {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct BatchSlice {
    owner: String,
    start: usize,
    end: Option<usize>,
}

/// The statements of a single existence-check round trip
#[derive(Debug, Clone)]
pub struct CommandBatch {
    engine: Engine,
    statements: Vec<Statement>,
    slices: Vec<BatchSlice>,
}

impl CommandBatch {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            statements: Vec::new(),
            slices: Vec::new(),
        }
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Append a new statement and return it for configuration
    pub fn statement(&mut self) -> &mut Statement {
        self.statements.push(Statement::new(self.engine));
        let last = self.statements.len() - 1;
        &mut self.statements[last]
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Open the slice for `owner`; every statement appended until
    /// [`end_slice`](Self::end_slice) belongs to it
    pub fn begin_slice(&mut self, owner: impl Into<String>) -> SliceToken {
        self.slices.push(BatchSlice {
            owner: owner.into(),
            start: self.statements.len(),
            end: None,
        });
        SliceToken(self.slices.len() - 1)
    }

    pub fn end_slice(&mut self, token: SliceToken) -> Result<()> {
        let statement_count = self.statements.len();
        let slice = self.slices.get_mut(token.0).ok_or_else(|| Error::ResultSetMisalignment {
            object: format!("slice #{}", token.0),
            detail: "slice was never opened".to_string(),
        })?;
        if slice.end.is_some() {
            return Err(Error::ResultSetMisalignment {
                object: slice.owner.clone(),
                detail: "slice closed twice".to_string(),
            });
        }
        slice.end = Some(statement_count);
        Ok(())
    }
}

/// Rows returned by one statement
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Builder used by fakes and tests
    pub fn with_row(mut self, values: Vec<SqlValue>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }
}

/// A borrowed view of one row with case-insensitive column lookup
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [SqlValue],
}

static NULL: SqlValue = SqlValue::Null;

impl<'a> Row<'a> {
    pub fn value(&self, column: &str) -> &'a SqlValue {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
            .unwrap_or(&NULL)
    }

    pub fn text(&self, column: &str) -> Option<String> {
        self.value(column).as_text()
    }

    pub fn int(&self, column: &str) -> Option<i64> {
        self.value(column).as_i64()
    }

    pub fn flag(&self, column: &str) -> bool {
        self.value(column).as_bool()
    }
}

/// Forward-only access to the result sets of an executed batch
#[derive(Debug)]
pub struct ResultCursor {
    slices: Vec<BatchSlice>,
    sets: VecDeque<ResultSet>,
    consumed: usize,
    next_slice: usize,
}

impl ResultCursor {
    /// Pair a batch with the result sets it produced
    pub fn new(batch: &CommandBatch, sets: Vec<ResultSet>) -> Result<Self> {
        if sets.len() != batch.statements.len() {
            return Err(Error::ResultSetMisalignment {
                object: "command batch".to_string(),
                detail: format!(
                    "{} statements produced {} result sets",
                    batch.statements.len(),
                    sets.len()
                ),
            });
        }
        if let Some(open) = batch.slices.iter().find(|s| s.end.is_none()) {
            return Err(Error::ResultSetMisalignment {
                object: open.owner.clone(),
                detail: "slice was never closed".to_string(),
            });
        }

        Ok(Self {
            slices: batch.slices.clone(),
            sets: sets.into(),
            consumed: 0,
            next_slice: 0,
        })
    }

    /// Open the results for `token`, which must be the next slice in order
    pub fn slice(&mut self, token: SliceToken) -> Result<SliceReader<'_>> {
        let slice = self
            .slices
            .get(token.0)
            .cloned()
            .ok_or_else(|| Error::ResultSetMisalignment {
                object: format!("slice #{}", token.0),
                detail: "no such slice in this batch".to_string(),
            })?;

        if token.0 != self.next_slice {
            return Err(Error::ResultSetMisalignment {
                object: slice.owner,
                detail: format!(
                    "requested slice #{} while slice #{} is next",
                    token.0, self.next_slice
                ),
            });
        }
        if self.consumed != slice.start {
            return Err(Error::ResultSetMisalignment {
                object: slice.owner,
                detail: format!(
                    "cursor is at result set {} but the slice starts at {}",
                    self.consumed, slice.start
                ),
            });
        }

        self.next_slice += 1;
        let remaining = slice.end.unwrap_or(slice.start) - slice.start;
        Ok(SliceReader {
            owner: slice.owner,
            remaining,
            cursor: self,
        })
    }
}

/// The result sets belonging to one schema object
#[derive(Debug)]
pub struct SliceReader<'a> {
    owner: String,
    remaining: usize,
    cursor: &'a mut ResultCursor,
}

impl<'a> SliceReader<'a> {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Advance to the next result set of this slice
    pub fn next_result(&mut self) -> Result<ResultSet> {
        if self.remaining == 0 {
            return Err(Error::ResultSetMisalignment {
                object: self.owner.clone(),
                detail: "read past the end of its result sets".to_string(),
            });
        }
        let set = self
            .cursor
            .sets
            .pop_front()
            .ok_or_else(|| Error::ResultSetMisalignment {
                object: self.owner.clone(),
                detail: "result sets exhausted".to_string(),
            })?;
        self.remaining -= 1;
        self.cursor.consumed += 1;
        Ok(set)
    }

    /// Verify the slice was read completely
    pub fn finish(self) -> Result<()> {
        if self.remaining > 0 {
            return Err(Error::ResultSetMisalignment {
                object: self.owner,
                detail: format!("{} result set(s) left unread", self.remaining),
            });
        }
        Ok(())
    }
}

/// Executes statements against one open connection
#[async_trait]
pub trait CommandRunner: Send {
    /// Engine on the other end of the connection
    fn engine(&self) -> Engine;

    /// Run every statement of `batch` in order, one result set per statement
    async fn fetch_results(
        &mut self,
        batch: &CommandBatch,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResultSet>>;

    /// Execute a script of one or more statements without parameters
    async fn execute(&mut self, sql: &str, cancel: &CancellationToken) -> Result<u64>;

    /// Execute one parameterized statement
    async fn execute_statement(
        &mut self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_object_batch() -> (CommandBatch, SliceToken, SliceToken) {
        let mut batch = CommandBatch::new(Engine::Postgres);
        let first = batch.begin_slice("public.a");
        batch.statement().set_sql("select 1");
        batch.statement().set_sql("select 2");
        batch.end_slice(first).unwrap();
        let second = batch.begin_slice("public.b");
        batch.statement().set_sql("select 3");
        batch.end_slice(second).unwrap();
        (batch, first, second)
    }

    fn sets(n: usize) -> Vec<ResultSet> {
        (0..n)
            .map(|i| ResultSet::new(["n"]).with_row(vec![SqlValue::Int(i as i64)]))
            .collect()
    }

    #[test]
    fn placeholders_follow_the_engine() {
        let mut pg = Statement::new(Engine::Postgres);
        assert_eq!(pg.parameter("a"), "$1");
        assert_eq!(pg.parameter("b"), "$2");

        let mut sqlite = Statement::new(Engine::Sqlite);
        assert_eq!(sqlite.parameter("a"), "?1");
        assert_eq!(sqlite.parameters().len(), 1);
    }

    #[test]
    fn slices_are_read_in_lock_step() {
        let (batch, first, second) = two_object_batch();
        let mut cursor = ResultCursor::new(&batch, sets(3)).unwrap();

        let mut reader = cursor.slice(first).unwrap();
        assert_eq!(reader.next_result().unwrap().rows[0][0], SqlValue::Int(0));
        assert_eq!(reader.next_result().unwrap().rows[0][0], SqlValue::Int(1));
        assert!(reader.finish().is_ok());

        let mut reader = cursor.slice(second).unwrap();
        assert_eq!(reader.next_result().unwrap().rows[0][0], SqlValue::Int(2));
        assert!(reader.next_result().is_err());
    }

    #[test]
    fn out_of_order_access_is_rejected() {
        let (batch, _first, second) = two_object_batch();
        let mut cursor = ResultCursor::new(&batch, sets(3)).unwrap();
        assert!(matches!(
            cursor.slice(second),
            Err(Error::ResultSetMisalignment { .. })
        ));
    }

    #[test]
    fn partially_read_slice_is_rejected() {
        let (batch, first, second) = two_object_batch();
        let mut cursor = ResultCursor::new(&batch, sets(3)).unwrap();

        let mut reader = cursor.slice(first).unwrap();
        reader.next_result().unwrap();
        assert!(reader.finish().is_err());

        let err = cursor.slice(second).unwrap_err();
        assert!(err.to_string().contains("public.b"));
    }

    #[test]
    fn wrong_result_set_count_is_rejected() {
        let (batch, _, _) = two_object_batch();
        assert!(ResultCursor::new(&batch, sets(2)).is_err());
    }

    #[test]
    fn row_lookup_is_case_insensitive() {
        let set = ResultSet::new(["Name", "nullable"])
            .with_row(vec![SqlValue::from("id"), SqlValue::from("YES")]);
        let row = set.rows().next().unwrap();
        assert_eq!(row.text("name").as_deref(), Some("id"));
        assert!(row.flag("NULLABLE"));
        assert!(row.value("missing").is_null());
    }
}

//! Database-backed directory of list partitions
//!
//! The directory table maps each partition value to the suffix of the
//! partition table that stores it. It is read lazily, once, and every
//! mutation writes through to both the table and the in-memory map.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::partition::PartitionStrategy;
use crate::schema::command::{CommandBatch, CommandRunner, Statement};
use crate::schema::table::Table;
use crate::schema::types::{Column, DbObjectName};

const VALUE_COLUMN: &str = "partition_value";
const SUFFIX_COLUMN: &str = "suffix";

/// Persistent `value -> suffix` directory for list-partitioned tables
#[derive(Debug)]
pub struct ManagedListPartitions {
    directory: DbObjectName,
    loaded: AtomicBool,
    load_lock: Mutex<()>,
    values: RwLock<IndexMap<String, String>>,
}

impl ManagedListPartitions {
    pub fn new(directory: DbObjectName) -> Self {
        Self {
            directory,
            loaded: AtomicBool::new(false),
            load_lock: Mutex::new(()),
            values: RwLock::new(IndexMap::new()),
        }
    }

    pub fn identifier(&self) -> &DbObjectName {
        &self.directory
    }

    /// Definition of the directory table itself, to migrate with everything else
    pub fn directory_table(&self) -> Table {
        let mut table = Table::named(self.directory.clone());
        table
            .add_column(Column::new(VALUE_COLUMN, "varchar").as_primary_key())
            .add_column(Column::new(SUFFIX_COLUMN, "varchar").not_null());
        table
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Load the directory unless some caller already did
    ///
    /// Concurrent callers share a single query; a caller arriving after the
    /// load completed returns immediately.
    pub async fn ensure_loaded<R>(&self, runner: &mut R, cancel: &CancellationToken) -> Result<()>
    where
        R: CommandRunner + ?Sized,
    {
        if self.is_loaded() {
            return Ok(());
        }
        let _guard = self.load_lock.lock().await;
        self.load_while_locked(runner, cancel).await
    }

    async fn load_while_locked<R>(&self, runner: &mut R, cancel: &CancellationToken) -> Result<()>
    where
        R: CommandRunner + ?Sized,
    {
        if self.is_loaded() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let engine = runner.engine();
        let mut batch = CommandBatch::new(engine);
        batch.statement().set_sql(format!(
            "SELECT {}, {} FROM {} ORDER BY {}, {}",
            VALUE_COLUMN,
            SUFFIX_COLUMN,
            self.directory.qualified_name(engine),
            SUFFIX_COLUMN,
            VALUE_COLUMN
        ));

        let sets = runner.fetch_results(&batch, cancel).await?;
        let set = sets.into_iter().next().ok_or_else(|| Error::ResultSetMisalignment {
            object: self.directory.to_string(),
            detail: "directory query returned no result set".to_string(),
        })?;

        let mut loaded = IndexMap::new();
        for row in set.rows() {
            if let (Some(value), Some(suffix)) = (row.text(VALUE_COLUMN), row.text(SUFFIX_COLUMN)) {
                loaded.insert(value, suffix);
            }
        }
        debug!(directory = %self.directory, values = loaded.len(), "Loaded partition directory");

        *self.values.write() = loaded;
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Suffix of the partition holding `value`, if loaded and known
    pub fn suffix_for(&self, value: &str) -> Option<String> {
        self.values.read().get(value).cloned()
    }

    /// Snapshot of every `(value, suffix)` pair
    pub fn entries(&self) -> Vec<(String, String)> {
        self.values
            .read()
            .iter()
            .map(|(v, s)| (v.clone(), s.clone()))
            .collect()
    }

    /// Map `value` to the partition `suffix`
    pub async fn add_partition<R>(
        &self,
        runner: &mut R,
        value: &str,
        suffix: &str,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        R: CommandRunner + ?Sized,
    {
        validate_suffix(suffix)?;
        let _guard = self.load_lock.lock().await;
        self.load_while_locked(runner, cancel).await?;

        if let Some(existing) = self.suffix_for(value) {
            if existing.eq_ignore_ascii_case(suffix) {
                return Ok(());
            }
            return Err(Error::DatabaseError(format!(
                "Partition value '{}' is already mapped to '{}'",
                value, existing
            )));
        }

        let engine = runner.engine();
        let mut statement = Statement::new(engine);
        let value_param = statement.parameter(value);
        let suffix_param = statement.parameter(suffix);
        statement.set_sql(format!(
            "INSERT INTO {} ({}, {}) VALUES ({}, {})",
            self.directory.qualified_name(engine),
            VALUE_COLUMN,
            SUFFIX_COLUMN,
            value_param,
            suffix_param
        ));
        runner.execute_statement(&statement, cancel).await?;

        self.values
            .write()
            .insert(value.to_string(), suffix.to_string());
        info!(directory = %self.directory, value, suffix, "Added partition value");
        Ok(())
    }

    /// Forget `value`; returns whether it was mapped
    pub async fn remove_partition<R>(
        &self,
        runner: &mut R,
        value: &str,
        cancel: &CancellationToken,
    ) -> Result<bool>
    where
        R: CommandRunner + ?Sized,
    {
        let _guard = self.load_lock.lock().await;
        self.load_while_locked(runner, cancel).await?;

        if self.suffix_for(value).is_none() {
            return Ok(false);
        }

        let engine = runner.engine();
        let mut statement = Statement::new(engine);
        let value_param = statement.parameter(value);
        statement.set_sql(format!(
            "DELETE FROM {} WHERE {} = {}",
            self.directory.qualified_name(engine),
            VALUE_COLUMN,
            value_param
        ));
        runner.execute_statement(&statement, cancel).await?;

        self.values.write().shift_remove(value);
        info!(directory = %self.directory, value, "Removed partition value");
        Ok(true)
    }

    /// List strategy over `columns` with one partition per known suffix
    /// plus a default partition for unmapped values
    pub fn strategy<S: Into<String>>(&self, columns: impl IntoIterator<Item = S>) -> PartitionStrategy {
        let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();
        for (value, suffix) in self.values.read().iter() {
            grouped
                .entry(suffix.clone())
                .or_default()
                .push(sql_literal(value));
        }

        grouped
            .into_iter()
            .fold(PartitionStrategy::list(columns), |strategy, (suffix, values)| {
                strategy.with_values(&suffix, values)
            })
            .with_default()
    }

    /// Partition `table` by `columns` according to the directory
    pub fn apply_to(&self, table: &mut Table, columns: &[&str]) -> Result<()> {
        if !self.is_loaded() {
            return Err(Error::DatabaseError(format!(
                "Partition directory {} has not been loaded",
                self.directory
            )));
        }
        table.partition_by(self.strategy(columns.iter().copied()));
        Ok(())
    }
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn validate_suffix(suffix: &str) -> Result<()> {
    if suffix.is_empty() {
        return Err(Error::invalid_identifier(suffix, "partition suffix is empty"));
    }
    if !suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::invalid_identifier(
            suffix,
            "partition suffixes may only contain letters, digits and underscores",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::schema::command::{ResultSet, SqlValue};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    /// Serves a fixed directory and counts every query and write
    struct DirectoryRunner {
        rows: Vec<(&'static str, &'static str)>,
        queries: Arc<AtomicUsize>,
        writes: Vec<String>,
    }

    impl DirectoryRunner {
        fn new(rows: Vec<(&'static str, &'static str)>, queries: Arc<AtomicUsize>) -> Self {
            Self {
                rows,
                queries,
                writes: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for DirectoryRunner {
        fn engine(&self) -> Engine {
            Engine::Postgres
        }

        async fn fetch_results(
            &mut self,
            _batch: &CommandBatch,
            _cancel: &CancellationToken,
        ) -> Result<Vec<ResultSet>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let set = self
                .rows
                .iter()
                .fold(ResultSet::new([VALUE_COLUMN, SUFFIX_COLUMN]), |set, (v, s)| {
                    set.with_row(vec![SqlValue::from(*v), SqlValue::from(*s)])
                });
            Ok(vec![set])
        }

        async fn execute(&mut self, sql: &str, _cancel: &CancellationToken) -> Result<u64> {
            self.writes.push(sql.to_string());
            Ok(0)
        }

        async fn execute_statement(
            &mut self,
            statement: &Statement,
            _cancel: &CancellationToken,
        ) -> Result<u64> {
            self.writes.push(statement.sql().to_string());
            Ok(1)
        }
    }

    fn directory() -> ManagedListPartitions {
        ManagedListPartitions::new(DbObjectName::parse("tenancy.regions"))
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_query() {
        let queries = Arc::new(AtomicUsize::new(0));
        let directory = directory();
        let mut first = DirectoryRunner::new(vec![("us", "america")], queries.clone());
        let mut second = DirectoryRunner::new(vec![("us", "america")], queries.clone());
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(
            directory.ensure_loaded(&mut first, &cancel),
            directory.ensure_loaded(&mut second, &cancel)
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(queries.load(Ordering::SeqCst), 1);
        assert_eq!(directory.suffix_for("us").as_deref(), Some("america"));

        directory.ensure_loaded(&mut first, &cancel).await.unwrap();
        assert_eq!(queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mutations_write_through() {
        let queries = Arc::new(AtomicUsize::new(0));
        let directory = directory();
        let mut runner = DirectoryRunner::new(vec![("us", "america")], queries);
        let cancel = CancellationToken::new();

        directory
            .add_partition(&mut runner, "ca", "america", &cancel)
            .await
            .unwrap();
        directory
            .add_partition(&mut runner, "fr", "europe", &cancel)
            .await
            .unwrap();
        assert!(directory
            .remove_partition(&mut runner, "us", &cancel)
            .await
            .unwrap());
        assert!(!directory
            .remove_partition(&mut runner, "jp", &cancel)
            .await
            .unwrap());

        assert_eq!(
            runner.writes,
            vec![
                "INSERT INTO tenancy.regions (partition_value, suffix) VALUES ($1, $2)".to_string(),
                "INSERT INTO tenancy.regions (partition_value, suffix) VALUES ($1, $2)".to_string(),
                "DELETE FROM tenancy.regions WHERE partition_value = $1".to_string(),
            ]
        );
        assert_eq!(
            directory.entries(),
            vec![
                ("ca".to_string(), "america".to_string()),
                ("fr".to_string(), "europe".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn remapping_a_value_is_rejected() {
        let queries = Arc::new(AtomicUsize::new(0));
        let directory = directory();
        let mut runner = DirectoryRunner::new(vec![("us", "america")], queries);
        let cancel = CancellationToken::new();

        assert!(directory
            .add_partition(&mut runner, "us", "europe", &cancel)
            .await
            .is_err());
        assert!(directory
            .add_partition(&mut runner, "xx", "bad suffix", &cancel)
            .await
            .is_err());
        assert!(runner.writes.is_empty());
    }

    #[tokio::test]
    async fn renders_a_list_strategy() {
        let queries = Arc::new(AtomicUsize::new(0));
        let directory = directory();
        let mut runner = DirectoryRunner::new(
            vec![("ca", "america"), ("us", "america"), ("o'hare", "misc")],
            queries,
        );
        directory
            .ensure_loaded(&mut runner, &CancellationToken::new())
            .await
            .unwrap();

        let expected = PartitionStrategy::list(["region"])
            .with_values("america", ["'ca'", "'us'"])
            .with_values("misc", ["'o''hare'"])
            .with_default();
        assert_eq!(directory.strategy(["region"]), expected);

        let mut table = Table::new("tenancy.accounts");
        table.add_column(Column::new("region", "varchar").not_null());
        directory.apply_to(&mut table, &["region"]).unwrap();
        assert_eq!(table.partitioning, Some(expected));
    }

    #[test]
    fn directory_table_keys_on_the_value() {
        let table = directory().directory_table();
        assert_eq!(table.primary_key_columns(), vec!["partition_value".to_string()]);
        assert!(!table.column("suffix").unwrap().nullable);
    }
}

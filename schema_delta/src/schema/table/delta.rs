//! Comparison of an expected table with the live one
//!
//! Columns are matched by name, case-insensitively, and compared by
//! normalized type. A missing column with exactly one same-typed extra
//! candidate, which no other missing column also singles out, is treated as
//! a rename. Any change that `ALTER TABLE` cannot express safely marks the
//! table for recreation.

use std::fmt::Write;
use tracing::debug;

use super::Table;
use crate::engine::Engine;
use crate::error::Result;
use crate::migrator::Migrator;
use crate::partition::{Partition, PartitionDelta, PartitionStrategy};
use crate::schema::difference::SchemaPatchDifference;
use crate::schema::object::{SchemaDelta, SchemaObjectDefinition};
use crate::schema::type_mapping::normalize_type;
use crate::schema::types::{same_names, Column, ForeignKey, IndexDefinition};
use crate::utils::naming::{canonicalize_ddl, quote_if_needed};

/// A column present on both sides with different types
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnChange {
    pub expected: Column,
    pub actual: Column,
}

/// An extra live column reinterpreted as a renamed expected column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRename {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexChange {
    pub expected: IndexDefinition,
    pub actual: IndexDefinition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyChange {
    pub expected: ForeignKey,
    pub actual: ForeignKey,
}

/// Delta between an expected table and the live table
#[derive(Debug, Clone)]
pub struct TableDelta {
    pub(super) engine: Engine,
    pub expected: Table,
    pub actual: Option<Table>,
    pub matched_columns: Vec<String>,
    pub missing_columns: Vec<Column>,
    pub extra_columns: Vec<Column>,
    pub different_columns: Vec<ColumnChange>,
    pub renames: Vec<ColumnRename>,
    pub matched_indexes: Vec<String>,
    pub missing_indexes: Vec<IndexDefinition>,
    pub extra_indexes: Vec<IndexDefinition>,
    pub changed_indexes: Vec<IndexChange>,
    pub matched_foreign_keys: Vec<ForeignKey>,
    pub missing_foreign_keys: Vec<ForeignKey>,
    pub extra_foreign_keys: Vec<ForeignKey>,
    pub changed_foreign_keys: Vec<ForeignKeyChange>,
    pub primary_key_changed: bool,
    pub partition_delta: PartitionDelta,
    pub requires_table_recreation: bool,
    difference: SchemaPatchDifference,
}

impl TableDelta {
    pub fn new(engine: Engine, expected: Table, actual: Option<Table>) -> Self {
        let mut delta = Self {
            engine,
            expected,
            actual: None,
            matched_columns: Vec::new(),
            missing_columns: Vec::new(),
            extra_columns: Vec::new(),
            different_columns: Vec::new(),
            renames: Vec::new(),
            matched_indexes: Vec::new(),
            missing_indexes: Vec::new(),
            extra_indexes: Vec::new(),
            changed_indexes: Vec::new(),
            matched_foreign_keys: Vec::new(),
            missing_foreign_keys: Vec::new(),
            extra_foreign_keys: Vec::new(),
            changed_foreign_keys: Vec::new(),
            primary_key_changed: false,
            partition_delta: PartitionDelta::None,
            requires_table_recreation: false,
            difference: SchemaPatchDifference::Create,
        };

        let Some(actual) = actual else {
            return delta;
        };

        delta.compare_columns(&actual);
        delta.infer_renames();
        delta.compare_indexes(&actual);
        delta.compare_keys(&actual);

        delta.partition_delta = if engine == Engine::Postgres {
            PartitionStrategy::delta(
                delta.expected.partitioning.as_ref(),
                actual.partitioning.as_ref(),
            )
        } else {
            PartitionDelta::None
        };

        delta.requires_table_recreation = delta.needs_recreation(&actual);
        delta.actual = Some(actual);
        delta.difference = delta.classify();

        debug!(
            table = %delta.expected.identifier,
            difference = ?delta.difference,
            missing = delta.missing_columns.len(),
            extra = delta.extra_columns.len(),
            renames = delta.renames.len(),
            "Compared table"
        );

        delta
    }

    fn compare_columns(&mut self, actual: &Table) {
        for expected in &self.expected.columns {
            match actual.column(&expected.name) {
                Some(existing) => {
                    if normalize_type(self.engine, &expected.data_type)
                        == normalize_type(self.engine, &existing.data_type)
                    {
                        self.matched_columns.push(expected.name.clone());
                    } else {
                        self.different_columns.push(ColumnChange {
                            expected: expected.clone(),
                            actual: existing.clone(),
                        });
                    }
                }
                None => self.missing_columns.push(expected.clone()),
            }
        }

        self.extra_columns = actual
            .columns
            .iter()
            .filter(|c| !self.expected.has_column(&c.name))
            .cloned()
            .collect();
    }

    /// One pass over the initial candidate lists; ambiguity means no rename
    fn infer_renames(&mut self) {
        let engine = self.engine;
        let candidates: Vec<Vec<usize>> = self
            .missing_columns
            .iter()
            .map(|missing| {
                let wanted = normalize_type(engine, &missing.data_type);
                self.extra_columns
                    .iter()
                    .enumerate()
                    .filter(|(_, extra)| normalize_type(engine, &extra.data_type) == wanted)
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect();

        let mut renamed_missing = Vec::new();
        let mut renamed_extra = Vec::new();
        for (i, options) in candidates.iter().enumerate() {
            let [only] = options.as_slice() else {
                continue;
            };
            let contested = candidates
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && other.as_slice() == [*only]);
            if contested {
                continue;
            }
            self.renames.push(ColumnRename {
                from: self.extra_columns[*only].name.clone(),
                to: self.missing_columns[i].name.clone(),
            });
            renamed_missing.push(i);
            renamed_extra.push(*only);
        }

        let mut index = 0;
        self.missing_columns.retain(|_| {
            let keep = !renamed_missing.contains(&index);
            index += 1;
            keep
        });
        let mut index = 0;
        self.extra_columns.retain(|_| {
            let keep = !renamed_extra.contains(&index);
            index += 1;
            keep
        });
    }

    /// Name an actual column carries once renames are applied
    pub fn renamed(&self, actual_name: &str) -> String {
        self.renames
            .iter()
            .find(|r| r.from.eq_ignore_ascii_case(actual_name))
            .map(|r| r.to.clone())
            .unwrap_or_else(|| actual_name.to_string())
    }

    /// Inverse of [`renamed`](Self::renamed)
    pub fn original_name(&self, expected_name: &str) -> String {
        self.renames
            .iter()
            .find(|r| r.to.eq_ignore_ascii_case(expected_name))
            .map(|r| r.from.clone())
            .unwrap_or_else(|| expected_name.to_string())
    }

    fn compare_indexes(&mut self, actual: &Table) {
        // No portable index catalog behind information_schema
        if self.engine == Engine::Generic {
            return;
        }

        let engine = self.engine;
        let identifier = &self.expected.identifier;
        let schema = identifier.schema_or_default(engine);
        let canonical = |index: &IndexDefinition| {
            canonicalize_ddl(&index.to_ddl(engine, identifier), &schema, &identifier.name)
        };

        let mut matched = Vec::new();
        let mut changed = Vec::new();
        let mut missing = Vec::new();
        for expected in &self.expected.indexes {
            match actual.index(&expected.name) {
                Some(existing) if canonical(expected) == canonical(existing) => {
                    matched.push(expected.name.clone());
                }
                Some(existing) => changed.push(IndexChange {
                    expected: expected.clone(),
                    actual: existing.clone(),
                }),
                None => missing.push(expected.clone()),
            }
        }

        self.extra_indexes = actual
            .indexes
            .iter()
            .filter(|i| self.expected.index(&i.name).is_none())
            .cloned()
            .collect();
        self.matched_indexes = matched;
        self.changed_indexes = changed;
        self.missing_indexes = missing;
    }

    fn compare_keys(&mut self, actual: &Table) {
        let actual_key: Vec<String> = actual
            .primary_key_columns()
            .iter()
            .map(|c| self.renamed(c))
            .collect();
        self.primary_key_changed = !same_names(&self.expected.primary_key_columns(), &actual_key);

        let rename = |column: &str| self.renamed(column);
        let mut matched = Vec::new();
        let mut changed = Vec::new();
        let mut missing = Vec::new();
        let mut unmatched: Vec<&ForeignKey> = actual.foreign_keys.iter().collect();

        for expected in &self.expected.foreign_keys {
            let by_name = unmatched.iter().position(|a| match (&expected.name, &a.name) {
                (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
                _ => false,
            });
            let position = by_name.or_else(|| {
                unmatched
                    .iter()
                    .position(|a| expected.matches(a, self.engine, rename))
            });

            match position {
                Some(i) => {
                    let existing = unmatched.remove(i);
                    if expected.matches(existing, self.engine, rename) {
                        matched.push(expected.clone());
                    } else {
                        changed.push(ForeignKeyChange {
                            expected: expected.clone(),
                            actual: existing.clone(),
                        });
                    }
                }
                None => missing.push(expected.clone()),
            }
        }

        self.extra_foreign_keys = unmatched.into_iter().cloned().collect();
        self.matched_foreign_keys = matched;
        self.changed_foreign_keys = changed;
        self.missing_foreign_keys = missing;
    }

    fn needs_recreation(&self, actual: &Table) -> bool {
        if !self.different_columns.is_empty()
            || self.primary_key_changed
            || !self.missing_foreign_keys.is_empty()
            || !self.extra_foreign_keys.is_empty()
            || !self.changed_foreign_keys.is_empty()
            || self.partition_delta == PartitionDelta::Rebuild
        {
            return true;
        }

        let key_columns: Vec<String> = actual
            .primary_key_columns()
            .into_iter()
            .chain(actual.foreign_keys.iter().flat_map(|fk| fk.columns.clone()))
            .collect();
        let drops_key_column = self
            .extra_columns
            .iter()
            .any(|extra| key_columns.iter().any(|k| k.eq_ignore_ascii_case(&extra.name)));

        let cannot_add = self
            .missing_columns
            .iter()
            .any(|c| !c.can_add_in_place(self.engine));
        // A dropped column comes back through ADD COLUMN on rollback
        let cannot_restore = self
            .extra_columns
            .iter()
            .any(|c| !c.can_add_in_place(self.engine));

        drops_key_column || cannot_add || cannot_restore
    }

    fn classify(&self) -> SchemaPatchDifference {
        if self.actual.is_none() {
            SchemaPatchDifference::Create
        } else if self.requires_table_recreation {
            SchemaPatchDifference::Invalid
        } else if self.has_in_place_changes() {
            SchemaPatchDifference::Update
        } else {
            SchemaPatchDifference::None
        }
    }

    fn has_in_place_changes(&self) -> bool {
        !self.renames.is_empty()
            || !self.missing_columns.is_empty()
            || !self.extra_columns.is_empty()
            || !self.missing_indexes.is_empty()
            || !self.extra_indexes.is_empty()
            || !self.changed_indexes.is_empty()
            || matches!(self.partition_delta, PartitionDelta::Additive(_))
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    fn alter_table(&self, migrator: &Migrator) -> String {
        format!("ALTER TABLE {}", migrator.qualified(&self.expected.identifier))
    }

    fn additive_partitions(&self) -> &[Partition] {
        match &self.partition_delta {
            PartitionDelta::Additive(partitions) => partitions,
            _ => &[],
        }
    }
}

impl SchemaDelta for TableDelta {
    fn expected(&self) -> &dyn SchemaObjectDefinition {
        &self.expected
    }

    fn difference(&self) -> SchemaPatchDifference {
        self.difference
    }

    fn write_update(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        let engine = migrator.engine();
        let alter = self.alter_table(migrator);
        let table = &self.expected;

        for rename in &self.renames {
            writeln!(
                w,
                "{} RENAME COLUMN {} TO {};",
                alter,
                quote_if_needed(&rename.from),
                quote_if_needed(&rename.to)
            )?;
        }

        for index in self
            .extra_indexes
            .iter()
            .chain(self.changed_indexes.iter().map(|c| &c.actual))
        {
            table.write_drop_index(migrator, index, w)?;
        }

        for column in &self.extra_columns {
            writeln!(w, "{} DROP COLUMN {};", alter, quote_if_needed(&column.name))?;
        }

        for column in &self.missing_columns {
            writeln!(w, "{} ADD COLUMN {};", alter, table.column_sql(engine, column)?)?;
        }

        for index in self
            .missing_indexes
            .iter()
            .chain(self.changed_indexes.iter().map(|c| &c.expected))
        {
            writeln!(w, "{};", index.to_ddl(engine, &table.identifier))?;
        }

        for partition in self.additive_partitions() {
            partition.write_create(&table.identifier, w)?;
        }

        Ok(())
    }

    fn write_rollback(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        let Some(actual) = &self.actual else {
            return self.expected.write_drop_statement(migrator, w);
        };
        let engine = migrator.engine();
        let alter = self.alter_table(migrator);
        let table = &self.expected;

        for partition in self.additive_partitions().iter().rev() {
            partition.write_drop(&table.identifier, w)?;
        }

        for index in self
            .missing_indexes
            .iter()
            .chain(self.changed_indexes.iter().map(|c| &c.expected))
            .rev()
        {
            table.write_drop_index(migrator, index, w)?;
        }

        for column in self.missing_columns.iter().rev() {
            writeln!(w, "{} DROP COLUMN {};", alter, quote_if_needed(&column.name))?;
        }

        // Restored index DDL names the columns as they were before the renames
        for rename in self.renames.iter().rev() {
            writeln!(
                w,
                "{} RENAME COLUMN {} TO {};",
                alter,
                quote_if_needed(&rename.to),
                quote_if_needed(&rename.from)
            )?;
        }

        for column in self.extra_columns.iter().rev() {
            writeln!(w, "{} ADD COLUMN {};", alter, actual.column_sql(engine, column)?)?;
        }

        for index in self
            .extra_indexes
            .iter()
            .chain(self.changed_indexes.iter().map(|c| &c.actual))
            .rev()
        {
            writeln!(w, "{};", index.to_ddl(engine, &table.identifier))?;
        }

        Ok(())
    }

    fn write_restoration_of_previous_state(
        &self,
        migrator: &Migrator,
        w: &mut dyn Write,
    ) -> Result<()> {
        match &self.actual {
            Some(actual) => {
                actual.write_create_table(migrator, &actual.identifier, false, w)?;
                actual.write_create_indexes(migrator, w)
            }
            None => Ok(()),
        }
    }

    fn write_recreation(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        match &self.actual {
            Some(actual) => super::rebuild::write_forward(self, actual, migrator, w),
            None => self.expected.write_create_statement(migrator, w),
        }
    }

    fn write_recreation_rollback(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        match &self.actual {
            Some(actual) => super::rebuild::write_backward(self, actual, migrator, w),
            None => self.expected.write_drop_statement(migrator, w),
        }
    }
}

//! PostgreSQL declarative partitioning
//!
//! A [`PartitionStrategy`] describes how a table is partitioned and which
//! partition tables exist under it. Partition tables are always named
//! `{table}_{suffix}` in the parent's schema. Comparing two strategies
//! yields a [`PartitionDelta`]: new partitions can be attached in place,
//! anything else means the table has to be rebuilt.

pub mod directory;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::schema::types::{same_names, DbObjectName};
use crate::utils::naming::{normalize_whitespace, quote_if_needed};

pub use directory::ManagedListPartitions;

static RANGE_BOUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^FOR VALUES FROM \((.*)\) TO \((.*)\)$").expect("valid range bound regex")
});

static HASH_REMAINDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)remainder\s+(\d+)").expect("valid hash bound regex"));

/// Suffix used for the default partition of list and range strategies
pub const DEFAULT_PARTITION_SUFFIX: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPartition {
    pub suffix: String,
    /// SQL literals, e.g. `'us'` or `42`
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangePartition {
    pub suffix: String,
    /// Lower bound literal list, inclusive
    pub from: String,
    /// Upper bound literal list, exclusive
    pub to: String,
}

/// How a table is split into partitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartitionStrategy {
    Hash {
        columns: Vec<String>,
        suffixes: Vec<String>,
    },
    List {
        columns: Vec<String>,
        partitions: Vec<ListPartition>,
        default_partition: bool,
    },
    Range {
        columns: Vec<String>,
        ranges: Vec<RangePartition>,
        default_partition: bool,
    },
}

/// One partition table and its bound clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub suffix: String,
    /// `FOR VALUES ...` or `DEFAULT`
    pub bound: String,
}

impl Partition {
    fn same_as(&self, other: &Partition) -> bool {
        self.suffix.eq_ignore_ascii_case(&other.suffix)
            && normalize_whitespace(&self.bound) == normalize_whitespace(&other.bound)
    }

    /// Name of this partition's table under `parent`
    pub fn table_name(&self, parent: &DbObjectName) -> DbObjectName {
        parent.sibling(&format!("{}_{}", parent.name, self.suffix))
    }

    /// `CREATE TABLE ... PARTITION OF ...` for this partition
    pub fn write_create(&self, parent: &DbObjectName, w: &mut dyn Write) -> Result<()> {
        writeln!(
            w,
            "CREATE TABLE {} PARTITION OF {} {};",
            self.table_name(parent).qualified_name(Engine::Postgres),
            parent.qualified_name(Engine::Postgres),
            self.bound
        )?;
        Ok(())
    }

    pub fn write_drop(&self, parent: &DbObjectName, w: &mut dyn Write) -> Result<()> {
        writeln!(
            w,
            "DROP TABLE IF EXISTS {};",
            self.table_name(parent).qualified_name(Engine::Postgres)
        )?;
        Ok(())
    }
}

/// Outcome of comparing an expected strategy with the live one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionDelta {
    None,
    /// Same strategy; these partitions are missing and can be attached
    Additive(Vec<Partition>),
    Rebuild,
}

impl PartitionStrategy {
    pub fn hash<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        suffixes: impl IntoIterator<Item = S>,
    ) -> Self {
        PartitionStrategy::Hash {
            columns: columns.into_iter().map(Into::into).collect(),
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn list<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        PartitionStrategy::List {
            columns: columns.into_iter().map(Into::into).collect(),
            partitions: Vec::new(),
            default_partition: false,
        }
    }

    pub fn range<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        PartitionStrategy::Range {
            columns: columns.into_iter().map(Into::into).collect(),
            ranges: Vec::new(),
            default_partition: false,
        }
    }

    /// Add a list partition; ignored by other strategies
    pub fn with_values<S: Into<String>>(
        mut self,
        suffix: &str,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        if let PartitionStrategy::List { partitions, .. } = &mut self {
            partitions.push(ListPartition {
                suffix: suffix.to_string(),
                values: values.into_iter().map(Into::into).collect(),
            });
        }
        self
    }

    /// Add a range partition; ignored by other strategies
    pub fn with_range(mut self, suffix: &str, from: &str, to: &str) -> Self {
        if let PartitionStrategy::Range { ranges, .. } = &mut self {
            ranges.push(RangePartition {
                suffix: suffix.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self
    }

    /// Add a default partition to a list or range strategy
    pub fn with_default(mut self) -> Self {
        match &mut self {
            PartitionStrategy::List {
                default_partition, ..
            }
            | PartitionStrategy::Range {
                default_partition, ..
            } => *default_partition = true,
            PartitionStrategy::Hash { .. } => {}
        }
        self
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PartitionStrategy::Hash { .. } => "HASH",
            PartitionStrategy::List { .. } => "LIST",
            PartitionStrategy::Range { .. } => "RANGE",
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            PartitionStrategy::Hash { columns, .. }
            | PartitionStrategy::List { columns, .. }
            | PartitionStrategy::Range { columns, .. } => columns,
        }
    }

    /// Every partition with its rendered bound, in declaration order
    pub fn partitions(&self) -> Vec<Partition> {
        match self {
            PartitionStrategy::Hash { suffixes, .. } => suffixes
                .iter()
                .enumerate()
                .map(|(remainder, suffix)| Partition {
                    suffix: suffix.clone(),
                    bound: format!(
                        "FOR VALUES WITH (modulus {}, remainder {})",
                        suffixes.len(),
                        remainder
                    ),
                })
                .collect(),
            PartitionStrategy::List {
                partitions,
                default_partition,
                ..
            } => {
                let mut all: Vec<Partition> = partitions
                    .iter()
                    .map(|p| Partition {
                        suffix: p.suffix.clone(),
                        bound: format!("FOR VALUES IN ({})", p.values.join(", ")),
                    })
                    .collect();
                if *default_partition {
                    all.push(default_partition_entry());
                }
                all
            }
            PartitionStrategy::Range {
                ranges,
                default_partition,
                ..
            } => {
                let mut all: Vec<Partition> = ranges
                    .iter()
                    .map(|r| Partition {
                        suffix: r.suffix.clone(),
                        bound: format!("FOR VALUES FROM ({}) TO ({})", r.from, r.to),
                    })
                    .collect();
                if *default_partition {
                    all.push(default_partition_entry());
                }
                all
            }
        }
    }

    /// Names of every partition table under `parent`
    pub fn partition_names(&self, parent: &DbObjectName) -> Vec<DbObjectName> {
        self.partitions()
            .iter()
            .map(|p| p.table_name(parent))
            .collect()
    }

    /// Trailing clause of `CREATE TABLE`
    pub fn partition_by_clause(&self) -> String {
        let columns: Vec<String> = self.columns().iter().map(|c| quote_if_needed(c)).collect();
        format!("PARTITION BY {} ({})", self.kind(), columns.join(", "))
    }

    /// Reject partitioning on engines that lack it
    pub fn assert_supported(engine: Engine) -> Result<()> {
        if engine == Engine::Postgres {
            Ok(())
        } else {
            Err(Error::unsupported(engine, "declarative partitioning"))
        }
    }

    /// Rebuild a strategy from `pg_partitioned_table` and `pg_inherits` rows
    ///
    /// `code` is `partstrat`, `columns` a comma separated column list and
    /// `children` the `(relname, pg_get_expr(relpartbound))` pairs.
    pub fn from_catalog(
        parent: &str,
        code: &str,
        columns: &str,
        children: &[(String, String)],
    ) -> Option<Self> {
        let columns: Vec<String> = columns
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        let prefix = format!("{}_", parent);
        let suffix_of = |name: &str| -> String {
            name.strip_prefix(&prefix).unwrap_or(name).to_string()
        };

        match code.trim() {
            "h" => {
                let mut numbered: Vec<(u64, String)> = children
                    .iter()
                    .map(|(name, bound)| {
                        let remainder = HASH_REMAINDER
                            .captures(bound)
                            .and_then(|c| c[1].parse().ok())
                            .unwrap_or(u64::MAX);
                        (remainder, suffix_of(name))
                    })
                    .collect();
                numbered.sort();
                Some(PartitionStrategy::Hash {
                    columns,
                    suffixes: numbered.into_iter().map(|(_, s)| s).collect(),
                })
            }
            "l" => {
                let mut partitions = Vec::new();
                let mut default_partition = false;
                for (name, bound) in children {
                    if is_default_bound(bound) {
                        default_partition = true;
                    } else if let Some(inner) = bound
                        .trim()
                        .strip_prefix("FOR VALUES IN (")
                        .and_then(|b| b.strip_suffix(')'))
                    {
                        partitions.push(ListPartition {
                            suffix: suffix_of(name),
                            values: split_literals(inner),
                        });
                    }
                }
                Some(PartitionStrategy::List {
                    columns,
                    partitions,
                    default_partition,
                })
            }
            "r" => {
                let mut ranges = Vec::new();
                let mut default_partition = false;
                for (name, bound) in children {
                    if is_default_bound(bound) {
                        default_partition = true;
                    } else if let Some(captures) = RANGE_BOUND.captures(bound.trim()) {
                        ranges.push(RangePartition {
                            suffix: suffix_of(name),
                            from: captures[1].to_string(),
                            to: captures[2].to_string(),
                        });
                    }
                }
                Some(PartitionStrategy::Range {
                    columns,
                    ranges,
                    default_partition,
                })
            }
            _ => None,
        }
    }

    /// Classify the change from `actual` to `expected`
    pub fn delta(expected: Option<&Self>, actual: Option<&Self>) -> PartitionDelta {
        let (expected, actual) = match (expected, actual) {
            (None, None) => return PartitionDelta::None,
            (Some(expected), Some(actual)) => (expected, actual),
            _ => return PartitionDelta::Rebuild,
        };

        if expected.kind() != actual.kind() || !same_names(expected.columns(), actual.columns()) {
            return PartitionDelta::Rebuild;
        }

        let wanted = expected.partitions();
        let existing = actual.partitions();

        if existing
            .iter()
            .any(|e| !wanted.iter().any(|w| w.same_as(e)))
        {
            return PartitionDelta::Rebuild;
        }

        let missing: Vec<Partition> = wanted
            .into_iter()
            .filter(|w| !existing.iter().any(|e| e.same_as(w)))
            .collect();

        if missing.is_empty() {
            PartitionDelta::None
        } else {
            PartitionDelta::Additive(missing)
        }
    }
}

fn default_partition_entry() -> Partition {
    Partition {
        suffix: DEFAULT_PARTITION_SUFFIX.to_string(),
        bound: "DEFAULT".to_string(),
    }
}

fn is_default_bound(bound: &str) -> bool {
    bound.trim().eq_ignore_ascii_case("default")
}

/// Split a literal list on top-level commas, respecting quotes
fn split_literals(text: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut depth = 0usize;

    for ch in text.chars() {
        match ch {
            '\'' => {
                quoted = !quoted;
                current.push(ch);
            }
            '(' if !quoted => {
                depth += 1;
                current.push(ch);
            }
            ')' if !quoted => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if !quoted && depth == 0 => {
                values.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        values.push(current.trim().to_string());
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn regions() -> PartitionStrategy {
        PartitionStrategy::list(["region"])
            .with_values("us", ["'us'"])
            .with_values("eu", ["'de'", "'fr'"])
    }

    #[test]
    fn renders_bounds_like_pg_get_expr() {
        let bounds: Vec<String> = regions().partitions().into_iter().map(|p| p.bound).collect();
        assert_eq!(
            bounds,
            vec!["FOR VALUES IN ('us')", "FOR VALUES IN ('de', 'fr')"]
        );

        let hash = PartitionStrategy::hash(["id"], ["a", "b"]);
        assert_eq!(
            hash.partitions()[1].bound,
            "FOR VALUES WITH (modulus 2, remainder 1)"
        );
    }

    #[test]
    fn identical_strategies_have_no_delta() {
        assert_eq!(
            PartitionStrategy::delta(Some(&regions()), Some(&regions())),
            PartitionDelta::None
        );
        assert_eq!(PartitionStrategy::delta(None, None), PartitionDelta::None);
    }

    #[test]
    fn new_list_partitions_are_additive() {
        let expected = regions().with_values("apac", ["'jp'"]).with_default();
        match PartitionStrategy::delta(Some(&expected), Some(&regions())) {
            PartitionDelta::Additive(missing) => {
                let suffixes: Vec<&str> = missing.iter().map(|p| p.suffix.as_str()).collect();
                assert_eq!(suffixes, vec!["apac", "default"]);
            }
            other => panic!("expected additive delta, got {:?}", other),
        }
    }

    #[test]
    fn changed_bounds_or_strategy_force_rebuild() {
        let moved = PartitionStrategy::list(["region"])
            .with_values("us", ["'us'", "'ca'"])
            .with_values("eu", ["'de'", "'fr'"]);
        assert_eq!(
            PartitionStrategy::delta(Some(&moved), Some(&regions())),
            PartitionDelta::Rebuild
        );

        let hash = PartitionStrategy::hash(["region"], ["a", "b"]);
        assert_eq!(
            PartitionStrategy::delta(Some(&hash), Some(&regions())),
            PartitionDelta::Rebuild
        );

        // Growing a hash strategy changes every modulus
        let wider = PartitionStrategy::hash(["region"], ["a", "b", "c"]);
        assert_eq!(
            PartitionStrategy::delta(Some(&wider), Some(&hash)),
            PartitionDelta::Rebuild
        );

        assert_eq!(
            PartitionStrategy::delta(Some(&regions()), None),
            PartitionDelta::Rebuild
        );
    }

    #[test]
    fn reads_strategies_back_from_the_catalog() {
        let children = vec![
            ("orders_eu".to_string(), "FOR VALUES IN ('de', 'fr')".to_string()),
            ("orders_default".to_string(), "DEFAULT".to_string()),
        ];
        let strategy = PartitionStrategy::from_catalog("orders", "l", "region", &children).unwrap();
        assert_eq!(
            strategy,
            PartitionStrategy::list(["region"])
                .with_values("eu", ["'de'", "'fr'"])
                .with_default()
        );

        let ranges = vec![(
            "events_2024".to_string(),
            "FOR VALUES FROM ('2024-01-01') TO ('2025-01-01')".to_string(),
        )];
        let strategy = PartitionStrategy::from_catalog("events", "r", "at", &ranges).unwrap();
        assert_eq!(
            strategy,
            PartitionStrategy::range(["at"]).with_range("2024", "'2024-01-01'", "'2025-01-01'")
        );
    }

    #[test]
    fn hash_partitions_are_ordered_by_remainder() {
        let children = vec![
            ("t_b".to_string(), "FOR VALUES WITH (modulus 2, remainder 1)".to_string()),
            ("t_a".to_string(), "FOR VALUES WITH (modulus 2, remainder 0)".to_string()),
        ];
        let strategy = PartitionStrategy::from_catalog("t", "h", "id", &children).unwrap();
        assert_eq!(strategy, PartitionStrategy::hash(["id"], ["a", "b"]));
    }

    #[test]
    fn partition_ddl_uses_the_parent_schema() {
        let parent = DbObjectName::qualified("sales", "orders");
        let mut sql = String::new();
        regions().partitions()[0].write_create(&parent, &mut sql).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE sales.orders_us PARTITION OF sales.orders FOR VALUES IN ('us');\n"
        );
    }
}

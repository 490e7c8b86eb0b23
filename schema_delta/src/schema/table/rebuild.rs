//! Data-preserving table rebuild through a shadow table
//!
//! The target shape is created as `{table}_temp`, rows are copied across
//! with an explicit column map, the original is dropped and the shadow is
//! renamed into place. PostgreSQL additionally gets the primary key
//! constraint and partitions renamed back and identity sequences re-synced.

use std::fmt::Write;

use super::{Table, TableDelta};
use crate::engine::Engine;
use crate::error::Result;
use crate::migrator::Migrator;
use crate::schema::type_mapping::normalize_type;
use crate::schema::types::Column;
use crate::utils::naming::{quote_if_needed, shadow_table_name};

/// Rebuild the live table into the expected shape
pub(super) fn write_forward(
    delta: &TableDelta,
    actual: &Table,
    migrator: &Migrator,
    w: &mut dyn Write,
) -> Result<()> {
    let column_map: Vec<(String, String)> = delta
        .expected
        .columns
        .iter()
        .filter(|c| !c.is_generated())
        .filter_map(|target| {
            let source = delta.original_name(&target.name);
            actual
                .column(&source)
                .filter(|c| !c.is_generated())
                .map(|c| (quote_if_needed(&c.name), target.name.clone()))
        })
        .collect();

    write_rebuild(&delta.expected, actual, column_map, migrator, w)
}

/// Rebuild the expected shape back into the live table's shape
pub(super) fn write_backward(
    delta: &TableDelta,
    actual: &Table,
    migrator: &Migrator,
    w: &mut dyn Write,
) -> Result<()> {
    let column_map: Vec<(String, String)> = actual
        .columns
        .iter()
        .filter(|c| !c.is_generated())
        .filter_map(|target| {
            let source = delta.renamed(&target.name);
            delta
                .expected
                .column(&source)
                .filter(|c| !c.is_generated())
                .map(|c| (quote_if_needed(&c.name), target.name.clone()))
        })
        .collect();

    // The live table is rebuilt in place of the expected one
    let mut target = actual.clone();
    target.identifier = delta.expected.identifier.clone();
    write_rebuild(&target, &delta.expected, column_map, migrator, w)
}

/// Literal written into a `NOT NULL` column that no source column feeds
fn backfill_value(engine: Engine, data_type: &str) -> Option<&'static str> {
    let normalized = normalize_type(engine, data_type);
    let base = normalized.split('(').next().unwrap_or_default();
    match base {
        "integer" | "bigint" | "smallint" | "real" | "double precision" | "numeric" => Some("0"),
        "boolean" if engine == Engine::Sqlite => Some("0"),
        "boolean" => Some("FALSE"),
        "text" | "varchar" | "char" => Some("''"),
        _ => None,
    }
}

/// Replace `source` with a table shaped like `target`
///
/// `column_map` pairs source expressions with target column names. Target
/// columns that reject NULL and have no source get a neutral literal.
fn write_rebuild(
    target: &Table,
    source: &Table,
    mut column_map: Vec<(String, String)>,
    migrator: &Migrator,
    w: &mut dyn Write,
) -> Result<()> {
    let engine = migrator.engine();
    let original = &target.identifier;
    let shadow = original.sibling(&shadow_table_name(&original.name));

    // Outside an INTEGER PRIMARY KEY, SQLite has no autonumbering
    let numbers_itself =
        |c: &Column| c.is_autonumber && (engine != Engine::Sqlite || c.is_primary_key);
    let unfilled = target.columns.iter().filter(|c| {
        !c.nullable && c.default_value.is_none() && !c.is_generated() && !numbers_itself(c)
    });

    for column in unfilled {
        let mapped = column_map
            .iter()
            .any(|(_, t)| t.eq_ignore_ascii_case(&column.name));
        if mapped {
            continue;
        }
        if let Some(value) = backfill_value(engine, &column.data_type) {
            column_map.push((value.to_string(), column.name.clone()));
        }
    }

    migrator.write_drop_table(&shadow, w)?;
    target.write_create_table(migrator, &shadow, false, w)?;

    if !column_map.is_empty() {
        let sources: Vec<String> = column_map.iter().map(|(s, _)| s.clone()).collect();
        let targets: Vec<String> = column_map.iter().map(|(_, t)| quote_if_needed(t)).collect();
        writeln!(
            w,
            "INSERT INTO {} ({}) SELECT {} FROM {};",
            migrator.qualified(&shadow),
            targets.join(", "),
            sources.join(", "),
            migrator.qualified(&source.identifier)
        )?;
    }

    migrator.write_drop_table(original, w)?;
    writeln!(
        w,
        "ALTER TABLE {} RENAME TO {};",
        migrator.qualified(&shadow),
        quote_if_needed(&original.name)
    )?;

    if engine == Engine::Postgres {
        write_postgres_renames(target, &shadow.name, migrator, w)?;
    }

    target.write_create_indexes(migrator, w)
}

fn write_postgres_renames(
    target: &Table,
    shadow_name: &str,
    migrator: &Migrator,
    w: &mut dyn Write,
) -> Result<()> {
    let original = &target.identifier;
    let qualified = migrator.qualified(original);

    if !target.primary_key_columns().is_empty() {
        writeln!(
            w,
            "ALTER TABLE {} RENAME CONSTRAINT {} TO {};",
            qualified,
            quote_if_needed(&target.primary_key_constraint_name(shadow_name)),
            quote_if_needed(&target.primary_key_constraint_name(&original.name))
        )?;
    }

    if let Some(strategy) = &target.partitioning {
        let shadow = original.sibling(shadow_name);
        for partition in strategy.partitions() {
            writeln!(
                w,
                "ALTER TABLE {} RENAME TO {};",
                migrator.qualified(&partition.table_name(&shadow)),
                quote_if_needed(&partition.table_name(original).name)
            )?;
        }
    }

    for column in target.columns.iter().filter(|c| c.is_autonumber) {
        let name = quote_if_needed(&column.name);
        writeln!(
            w,
            "SELECT setval(pg_get_serial_sequence('{}', '{}'), COALESCE(MAX({}), 0) + 1, false) FROM {};",
            qualified.replace('\'', "''"),
            column.name.replace('\'', "''"),
            name,
            qualified
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::object::SchemaDelta;
    use crate::schema::types::{Column, IndexDefinition};
    use pretty_assertions::assert_eq;

    fn people(columns: Vec<Column>) -> Table {
        let mut table = Table::new("people");
        for column in columns {
            table.add_column(column);
        }
        table
    }

    #[test]
    fn sqlite_rebuild_copies_rows_through_a_shadow_table() {
        let mut expected = people(vec![
            Column::new("id", "integer").as_primary_key(),
            Column::new("full_name", "text"),
            Column::new("age", "bigint"),
        ]);
        expected.add_index(IndexDefinition::new("idx_people_age", ["age"]));
        let actual = people(vec![
            Column::new("id", "integer").as_primary_key(),
            Column::new("name", "text"),
            Column::new("age", "text"),
        ]);

        let delta = TableDelta::new(Engine::Sqlite, expected, Some(actual));
        let mut sql = String::new();
        delta.write_recreation(&Migrator::sqlite(), &mut sql).unwrap();

        assert_eq!(
            sql,
            "DROP TABLE IF EXISTS people_temp;\n\
             CREATE TABLE people_temp (\n    \
             id integer NOT NULL,\n    \
             full_name text,\n    \
             age bigint,\n    \
             CONSTRAINT pkey_people_temp_id PRIMARY KEY (id)\n);\n\
             INSERT INTO people_temp (id, full_name, age) SELECT id, name, age FROM people;\n\
             DROP TABLE IF EXISTS people;\n\
             ALTER TABLE people_temp RENAME TO people;\n\
             CREATE INDEX idx_people_age ON people (age);\n"
        );
    }

    #[test]
    fn rollback_maps_names_back() {
        let expected = people(vec![
            Column::new("id", "integer").as_primary_key(),
            Column::new("full_name", "text"),
            Column::new("age", "bigint"),
        ]);
        let actual = people(vec![
            Column::new("id", "integer").as_primary_key(),
            Column::new("name", "text"),
            Column::new("age", "text"),
        ]);

        let delta = TableDelta::new(Engine::Sqlite, expected, Some(actual));
        let mut sql = String::new();
        delta
            .write_recreation_rollback(&Migrator::sqlite(), &mut sql)
            .unwrap();

        assert!(sql.contains("CREATE TABLE people_temp (\n    id integer NOT NULL,\n    name text,\n    age text,"));
        assert!(sql.contains(
            "INSERT INTO people_temp (id, name, age) SELECT id, full_name, age FROM people;"
        ));
        assert!(sql.ends_with("ALTER TABLE people_temp RENAME TO people;\n"));
    }

    #[test]
    fn unfed_not_null_columns_get_a_neutral_value() {
        let expected = people(vec![
            Column::new("id", "integer").as_primary_key(),
            Column::new("full_name", "text"),
        ]);
        let actual = people(vec![
            Column::new("id", "integer").as_primary_key(),
            Column::new("full_name", "text"),
            Column::new("email", "text").not_null(),
            Column::new("visits", "integer").not_null(),
        ]);

        let delta = TableDelta::new(Engine::Sqlite, expected, Some(actual));
        let mut sql = String::new();
        delta
            .write_recreation_rollback(&Migrator::sqlite(), &mut sql)
            .unwrap();

        assert!(sql.contains(
            "INSERT INTO people_temp (id, full_name, email, visits) SELECT id, full_name, '', 0 FROM people;"
        ));
    }

    #[test]
    fn postgres_rebuild_renames_constraints_and_resyncs_identity() {
        let expected = people(vec![
            Column::new("id", "integer").as_primary_key().auto_number(),
            Column::new("tenant", "integer").as_primary_key(),
        ]);
        let actual = people(vec![
            Column::new("id", "integer").as_primary_key().auto_number(),
            Column::new("tenant", "integer"),
        ]);

        let delta = TableDelta::new(Engine::Postgres, expected, Some(actual));
        let mut sql = String::new();
        delta
            .write_recreation(&Migrator::postgresql(), &mut sql)
            .unwrap();

        assert!(sql.contains("CONSTRAINT pkey_people_temp_id_tenant PRIMARY KEY (id, tenant)"));
        assert!(sql.contains("DROP TABLE IF EXISTS public.people CASCADE;"));
        assert!(sql.contains("ALTER TABLE public.people_temp RENAME TO people;"));
        assert!(sql.contains(
            "ALTER TABLE public.people RENAME CONSTRAINT pkey_people_temp_id_tenant TO pkey_people_id_tenant;"
        ));
        assert!(sql.contains(
            "SELECT setval(pg_get_serial_sequence('public.people', 'id'), COALESCE(MAX(id), 0) + 1, false) FROM public.people;"
        ));
    }

    #[test]
    fn restoration_writes_the_live_definition() {
        let expected = people(vec![Column::new("id", "bigint")]);
        let actual = people(vec![Column::new("id", "text")]);
        let delta = TableDelta::new(Engine::Sqlite, expected, Some(actual));

        let mut sql = String::new();
        delta
            .write_restoration_of_previous_state(&Migrator::sqlite(), &mut sql)
            .unwrap();
        assert_eq!(sql, "CREATE TABLE people (\n    id text\n);\n");
    }
}

//! Catalog queries that describe a live table
//!
//! Each engine appends a fixed number of statements to the batch and reads
//! exactly that many result sets back. A table that does not exist reads as
//! `None`.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use super::Table;
use crate::engine::Engine;
use crate::error::Result;
use crate::partition::PartitionStrategy;
use crate::schema::command::{CommandBatch, ResultSet, SliceReader};
use crate::schema::types::{
    CascadeAction, Column, DbObjectName, ForeignKey, GeneratedColumn, GeneratedKind,
    IndexDefinition,
};
use crate::utils::naming::quote_if_needed;

static AUTOINCREMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bautoincrement\b").expect("valid autoincrement regex"));

const PG_COLUMNS: &str = r#"
SELECT a.attname::text AS name,
       format_type(a.atttypid, a.atttypmod)::text AS data_type,
       (NOT a.attnotnull) AS nullable,
       pg_get_expr(d.adbin, d.adrelid)::text AS default_value,
       a.attidentity::text AS identity,
       a.attgenerated::text AS generated
FROM pg_attribute a
JOIN pg_class c ON c.oid = a.attrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
WHERE n.nspname = {schema} AND c.relname = {table}
  AND c.relkind IN ('r', 'p') AND a.attnum > 0 AND NOT a.attisdropped
ORDER BY a.attnum"#;

const PG_PRIMARY_KEY: &str = r#"
SELECT con.conname::text AS constraint_name, a.attname::text AS column_name
FROM pg_constraint con
JOIN pg_class c ON c.oid = con.conrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
CROSS JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
WHERE n.nspname = {schema} AND c.relname = {table} AND con.contype = 'p'
ORDER BY k.ord"#;

const PG_FOREIGN_KEYS: &str = r#"
SELECT con.conname::text AS constraint_name,
       a.attname::text AS column_name,
       rn.nspname::text AS linked_schema,
       rc.relname::text AS linked_table,
       ra.attname::text AS linked_column,
       con.confdeltype::text AS on_delete,
       con.confupdtype::text AS on_update
FROM pg_constraint con
JOIN pg_class c ON c.oid = con.conrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_class rc ON rc.oid = con.confrelid
JOIN pg_namespace rn ON rn.oid = rc.relnamespace
CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, refnum, ord)
JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.refnum
WHERE n.nspname = {schema} AND c.relname = {table} AND con.contype = 'f'
ORDER BY con.conname, k.ord"#;

const PG_INDEXES: &str = r#"
SELECT ic.relname::text AS index_name, pg_get_indexdef(i.indexrelid)::text AS ddl
FROM pg_index i
JOIN pg_class c ON c.oid = i.indrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_class ic ON ic.oid = i.indexrelid
WHERE n.nspname = {schema} AND c.relname = {table} AND NOT i.indisprimary
ORDER BY ic.relname"#;

const PG_PARTITION_STRATEGY: &str = r#"
SELECT p.partstrat::text AS strategy,
       array_to_string(ARRAY(
           SELECT a.attname
           FROM unnest(p.partattrs::int2[]) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_attribute a ON a.attrelid = p.partrelid AND a.attnum = k.attnum
           ORDER BY k.ord), ',')::text AS columns
FROM pg_partitioned_table p
JOIN pg_class c ON c.oid = p.partrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = {schema} AND c.relname = {table}"#;

const PG_PARTITIONS: &str = r#"
SELECT child.relname::text AS partition_name,
       pg_get_expr(child.relpartbound, child.oid)::text AS bound
FROM pg_inherits inh
JOIN pg_class parent ON parent.oid = inh.inhparent
JOIN pg_namespace n ON n.oid = parent.relnamespace
JOIN pg_class child ON child.oid = inh.inhrelid
WHERE n.nspname = {schema} AND parent.relname = {table}
ORDER BY child.relname"#;

// Catalog values are cast to text so they decode through `sqlx::Any`
const GENERIC_COLUMNS: &str = r#"
SELECT CAST(column_name AS TEXT) AS name, CAST(data_type AS TEXT) AS data_type,
       CAST(is_nullable AS TEXT) AS nullable,
       CAST(column_default AS TEXT) AS default_value,
       CAST(character_maximum_length AS TEXT) AS max_length,
       CAST(numeric_precision AS TEXT) AS numeric_precision,
       CAST(numeric_scale AS TEXT) AS numeric_scale
FROM information_schema.columns
WHERE table_schema = {schema} AND table_name = {table}
ORDER BY ordinal_position"#;

const GENERIC_PRIMARY_KEY: &str = r#"
SELECT CAST(tc.constraint_name AS TEXT) AS constraint_name,
       CAST(kcu.column_name AS TEXT) AS column_name
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON tc.constraint_name = kcu.constraint_name
 AND tc.table_schema = kcu.table_schema
 AND tc.table_name = kcu.table_name
WHERE tc.constraint_type = 'PRIMARY KEY'
  AND tc.table_schema = {schema} AND tc.table_name = {table}
ORDER BY kcu.ordinal_position"#;

const GENERIC_FOREIGN_KEYS: &str = r#"
SELECT CAST(rc.constraint_name AS TEXT) AS constraint_name,
       CAST(kcu.column_name AS TEXT) AS column_name,
       CAST(ref.table_schema AS TEXT) AS linked_schema,
       CAST(ref.table_name AS TEXT) AS linked_table,
       CAST(ref.column_name AS TEXT) AS linked_column,
       CAST(rc.delete_rule AS TEXT) AS on_delete,
       CAST(rc.update_rule AS TEXT) AS on_update
FROM information_schema.referential_constraints rc
JOIN information_schema.key_column_usage kcu
  ON kcu.constraint_schema = rc.constraint_schema
 AND kcu.constraint_name = rc.constraint_name
JOIN information_schema.key_column_usage ref
  ON ref.constraint_schema = rc.unique_constraint_schema
 AND ref.constraint_name = rc.unique_constraint_name
 AND ref.ordinal_position = kcu.position_in_unique_constraint
WHERE kcu.table_schema = {schema} AND kcu.table_name = {table}
ORDER BY rc.constraint_name, kcu.ordinal_position"#;

/// Append the statements describing `table`
pub(super) fn configure(table: &DbObjectName, batch: &mut CommandBatch) -> Result<()> {
    let engine = batch.engine();
    let schema = table.schema_or_default(engine);

    match engine {
        Engine::Postgres => {
            for template in [
                PG_COLUMNS,
                PG_PRIMARY_KEY,
                PG_FOREIGN_KEYS,
                PG_INDEXES,
                PG_PARTITION_STRATEGY,
                PG_PARTITIONS,
            ] {
                add_lookup(batch, template, &schema, &table.name);
            }
        }
        Engine::Generic => {
            for template in [GENERIC_COLUMNS, GENERIC_PRIMARY_KEY, GENERIC_FOREIGN_KEYS] {
                add_lookup(batch, template, &schema, &table.name);
            }
        }
        Engine::Sqlite => {
            let master = format!("{}.sqlite_master", quote_if_needed(&schema));

            let statement = batch.statement();
            let name = statement.parameter(table.name.as_str());
            statement.set_sql(format!(
                "SELECT sql FROM {} WHERE type = 'table' AND name = {}",
                master, name
            ));

            let statement = batch.statement();
            let name = statement.parameter(table.name.as_str());
            let schema_param = statement.parameter(schema.as_str());
            statement.set_sql(format!(
                "SELECT name, type AS data_type, \"notnull\" AS not_null, dflt_value AS default_value, pk, hidden \
                 FROM pragma_table_xinfo({}, {}) ORDER BY cid",
                name, schema_param
            ));

            let statement = batch.statement();
            let name = statement.parameter(table.name.as_str());
            let schema_param = statement.parameter(schema.as_str());
            statement.set_sql(format!(
                "SELECT id, \"table\" AS linked_table, \"from\" AS column_name, \"to\" AS linked_column, \
                 on_update, on_delete FROM pragma_foreign_key_list({}, {}) ORDER BY id, seq",
                name, schema_param
            ));

            let statement = batch.statement();
            let name = statement.parameter(table.name.as_str());
            statement.set_sql(format!(
                "SELECT name AS index_name, sql AS ddl FROM {} \
                 WHERE type = 'index' AND tbl_name = {} AND sql IS NOT NULL ORDER BY name",
                master, name
            ));
        }
    }

    Ok(())
}

fn add_lookup(batch: &mut CommandBatch, template: &str, schema: &str, table: &str) {
    let statement = batch.statement();
    let schema = statement.parameter(schema);
    let table = statement.parameter(table);
    statement.set_sql(
        template
            .trim()
            .replace("{schema}", &schema)
            .replace("{table}", &table),
    );
}

/// Read the live table from this object's result sets
pub(super) fn read_actual(
    identifier: &DbObjectName,
    engine: Engine,
    reader: &mut SliceReader<'_>,
) -> Result<Option<Table>> {
    match engine {
        Engine::Postgres => read_postgres(identifier, reader),
        Engine::Sqlite => read_sqlite(identifier, reader),
        Engine::Generic => read_generic(identifier, reader),
    }
}

fn read_postgres(identifier: &DbObjectName, reader: &mut SliceReader<'_>) -> Result<Option<Table>> {
    let columns = reader.next_result()?;
    let primary_key = reader.next_result()?;
    let foreign_keys = reader.next_result()?;
    let indexes = reader.next_result()?;
    let strategy = reader.next_result()?;
    let partitions = reader.next_result()?;

    if columns.is_empty() {
        return Ok(None);
    }

    let mut table = Table::named(identifier.resolved(Engine::Postgres));
    for row in columns.rows() {
        let name = row.text("name").unwrap_or_default();
        let mut column = Column::new(&name, &row.text("data_type").unwrap_or_default());
        column.nullable = row.flag("nullable");

        let default = row.text("default_value");
        let generated = row.text("generated").unwrap_or_default();
        let identity = row.text("identity").unwrap_or_default();

        if generated.trim() == "s" {
            column.generated = Some(GeneratedColumn {
                expression: default,
                kind: GeneratedKind::Stored,
            });
        } else if !identity.trim().is_empty() {
            column.is_autonumber = true;
        } else if default
            .as_deref()
            .map(|d| d.starts_with("nextval("))
            .unwrap_or(false)
        {
            column.is_autonumber = true;
        } else {
            column.default_value = default;
        }
        table.columns.push(column);
    }

    apply_primary_key(&mut table, &primary_key);
    table.foreign_keys = read_foreign_keys(&foreign_keys, Engine::Postgres);
    table.indexes = read_indexes(&indexes);

    if let Some(row) = strategy.rows().next() {
        let children: Vec<(String, String)> = partitions
            .rows()
            .map(|r| {
                (
                    r.text("partition_name").unwrap_or_default(),
                    r.text("bound").unwrap_or_default(),
                )
            })
            .collect();
        table.partitioning = PartitionStrategy::from_catalog(
            &identifier.name,
            &row.text("strategy").unwrap_or_default(),
            &row.text("columns").unwrap_or_default(),
            &children,
        );
    }

    Ok(Some(table))
}

fn read_sqlite(identifier: &DbObjectName, reader: &mut SliceReader<'_>) -> Result<Option<Table>> {
    let master = reader.next_result()?;
    let columns = reader.next_result()?;
    let foreign_keys = reader.next_result()?;
    let indexes = reader.next_result()?;

    let create_sql = match master.rows().next().and_then(|r| r.text("sql")) {
        Some(sql) => sql,
        None => return Ok(None),
    };
    let has_autoincrement = AUTOINCREMENT.is_match(&create_sql);

    let mut table = Table::named(identifier.resolved(Engine::Sqlite));
    for row in columns.rows() {
        let name = row.text("name").unwrap_or_default();
        let mut column = Column::new(&name, &row.text("data_type").unwrap_or_default());
        column.nullable = !row.flag("not_null");
        column.default_value = row.text("default_value");
        column.is_primary_key = row.int("pk").unwrap_or(0) > 0;

        column.generated = match row.int("hidden").unwrap_or(0) {
            2 => Some(GeneratedKind::Virtual),
            3 => Some(GeneratedKind::Stored),
            _ => None,
        }
        .map(|kind| GeneratedColumn {
            expression: generated_expression(&create_sql, &name),
            kind,
        });

        table.columns.push(column);
    }

    if has_autoincrement {
        let keys: Vec<usize> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_primary_key)
            .map(|(i, _)| i)
            .collect();
        if let [only] = keys.as_slice() {
            table.columns[*only].is_autonumber = true;
        }
    }

    let mut grouped: IndexMap<i64, ForeignKey> = IndexMap::new();
    for row in foreign_keys.rows() {
        let id = row.int("id").unwrap_or(0);
        let entry = grouped.entry(id).or_insert_with(|| ForeignKey {
            name: None,
            columns: Vec::new(),
            linked_table: identifier
                .sibling(&row.text("linked_table").unwrap_or_default())
                .resolved(Engine::Sqlite),
            linked_columns: Vec::new(),
            on_delete: CascadeAction::parse(&row.text("on_delete").unwrap_or_default()),
            on_update: CascadeAction::parse(&row.text("on_update").unwrap_or_default()),
        });
        entry.columns.push(row.text("column_name").unwrap_or_default());
        if let Some(linked) = row.text("linked_column") {
            entry.linked_columns.push(linked);
        }
    }
    table.foreign_keys = grouped.into_values().collect();
    table.indexes = read_indexes(&indexes);

    Ok(Some(table))
}

fn read_generic(identifier: &DbObjectName, reader: &mut SliceReader<'_>) -> Result<Option<Table>> {
    let columns = reader.next_result()?;
    let primary_key = reader.next_result()?;
    let foreign_keys = reader.next_result()?;

    if columns.is_empty() {
        return Ok(None);
    }

    let mut table = Table::named(identifier.resolved(Engine::Generic));
    for row in columns.rows() {
        let mut data_type = row.text("data_type").unwrap_or_default().to_lowercase();
        if let Some(length) = row.int("max_length").filter(|l| *l > 0) {
            if matches!(
                data_type.as_str(),
                "character varying" | "varchar" | "character" | "char"
            ) {
                data_type = format!("{}({})", data_type, length);
            }
        } else if matches!(data_type.as_str(), "numeric" | "decimal") {
            if let (Some(precision), Some(scale)) =
                (row.int("numeric_precision"), row.int("numeric_scale"))
            {
                data_type = format!("{}({},{})", data_type, precision, scale);
            }
        }

        let mut column = Column::new(&row.text("name").unwrap_or_default(), &data_type);
        column.nullable = row.flag("nullable");
        column.default_value = row.text("default_value");
        table.columns.push(column);
    }

    apply_primary_key(&mut table, &primary_key);
    table.foreign_keys = read_foreign_keys(&foreign_keys, Engine::Generic);

    Ok(Some(table))
}

fn apply_primary_key(table: &mut Table, rows: &ResultSet) {
    for row in rows.rows() {
        if table.primary_key_name.is_none() {
            table.primary_key_name = row.text("constraint_name");
        }
        let name = row.text("column_name").unwrap_or_default();
        if let Some(column) = table
            .columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(&name))
        {
            column.is_primary_key = true;
        }
    }
}

/// Group one-row-per-column foreign key listings by constraint name
fn read_foreign_keys(rows: &ResultSet, engine: Engine) -> Vec<ForeignKey> {
    let mut grouped: IndexMap<String, ForeignKey> = IndexMap::new();
    for row in rows.rows() {
        let name = row.text("constraint_name").unwrap_or_default();
        let linked_schema = row
            .text("linked_schema")
            .unwrap_or_else(|| engine.default_schema().to_string());
        let entry = grouped.entry(name.clone()).or_insert_with(|| ForeignKey {
            name: Some(name),
            columns: Vec::new(),
            linked_table: DbObjectName::qualified(
                &linked_schema,
                &row.text("linked_table").unwrap_or_default(),
            ),
            linked_columns: Vec::new(),
            on_delete: CascadeAction::parse(&row.text("on_delete").unwrap_or_default()),
            on_update: CascadeAction::parse(&row.text("on_update").unwrap_or_default()),
        });
        entry.columns.push(row.text("column_name").unwrap_or_default());
        entry
            .linked_columns
            .push(row.text("linked_column").unwrap_or_default());
    }
    grouped.into_values().collect()
}

fn read_indexes(rows: &ResultSet) -> Vec<IndexDefinition> {
    rows.rows()
        .filter_map(|row| {
            let name = row.text("index_name")?;
            let ddl = row.text("ddl")?;
            Some(IndexDefinition::existing(&name, &ddl))
        })
        .collect()
}

/// Pull the `GENERATED ALWAYS AS (...)` expression for `column` out of the
/// stored `CREATE TABLE` text
fn generated_expression(create_sql: &str, column: &str) -> Option<String> {
    let pattern = format!(
        r#"(?is)(?:^|[(,])\s*["`\[]?{}["`\]]?\s[^,]*?\bAS\s*\("#,
        regex::escape(column)
    );
    let regex = Regex::new(&pattern).ok()?;
    let start = regex.find(create_sql)?.end();

    let mut depth = 1usize;
    for (offset, ch) in create_sql[start..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(create_sql[start..start + offset].trim().to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::command::{ResultCursor, SqlValue};
    use pretty_assertions::assert_eq;

    fn sqlite_sets(create_sql: Option<&str>) -> Vec<ResultSet> {
        let master = match create_sql {
            Some(sql) => ResultSet::new(["sql"]).with_row(vec![sql.into()]),
            None => ResultSet::new(["sql"]),
        };
        let columns = ResultSet::new(["name", "data_type", "not_null", "default_value", "pk", "hidden"])
            .with_row(vec!["id".into(), "integer".into(), SqlValue::Int(0), SqlValue::Null, SqlValue::Int(1), SqlValue::Int(0)])
            .with_row(vec!["name".into(), "text".into(), SqlValue::Int(1), SqlValue::Null, SqlValue::Int(0), SqlValue::Int(0)])
            .with_row(vec!["upper_name".into(), "text".into(), SqlValue::Int(0), SqlValue::Null, SqlValue::Int(0), SqlValue::Int(2)])
            .with_row(vec!["team_id".into(), "integer".into(), SqlValue::Int(0), SqlValue::Null, SqlValue::Int(0), SqlValue::Int(0)]);
        let foreign_keys = ResultSet::new(["id", "linked_table", "column_name", "linked_column", "on_update", "on_delete"])
            .with_row(vec![SqlValue::Int(0), "teams".into(), "team_id".into(), "id".into(), "NO ACTION".into(), "CASCADE".into()]);
        let indexes = ResultSet::new(["index_name", "ddl"])
            .with_row(vec!["idx_people_name".into(), "CREATE INDEX idx_people_name ON people (name)".into()]);
        vec![master, columns, foreign_keys, indexes]
    }

    fn read(sets: Vec<ResultSet>) -> Option<Table> {
        let name = DbObjectName::unqualified("people");
        let mut batch = CommandBatch::new(Engine::Sqlite);
        let token = batch.begin_slice("people");
        configure(&name, &mut batch).unwrap();
        batch.end_slice(token).unwrap();
        assert_eq!(batch.statements().len(), 4);

        let mut cursor = ResultCursor::new(&batch, sets).unwrap();
        let mut reader = cursor.slice(token).unwrap();
        let table = read_actual(&name, Engine::Sqlite, &mut reader).unwrap();
        reader.finish().unwrap();
        table
    }

    #[test]
    fn reads_a_sqlite_table() {
        let table = read(sqlite_sets(Some(
            "CREATE TABLE people (id integer PRIMARY KEY AUTOINCREMENT, name text NOT NULL, \
             upper_name text GENERATED ALWAYS AS (upper(name)) VIRTUAL, team_id integer, \
             FOREIGN KEY (team_id) REFERENCES teams (id) ON DELETE CASCADE)",
        )))
        .unwrap();

        assert_eq!(table.primary_key_columns(), vec!["id".to_string()]);
        assert!(table.columns[0].is_autonumber);
        assert!(!table.columns[1].nullable);
        assert_eq!(
            table.columns[2].generated,
            Some(GeneratedColumn {
                expression: Some("upper(name)".to_string()),
                kind: GeneratedKind::Virtual,
            })
        );
        assert_eq!(table.foreign_keys.len(), 1);
        assert_eq!(table.foreign_keys[0].on_delete, CascadeAction::Cascade);
        assert_eq!(table.foreign_keys[0].linked_table.to_string(), "main.teams");
        assert_eq!(table.indexes[0].name, "idx_people_name");
    }

    #[test]
    fn missing_sqlite_table_reads_as_none() {
        assert!(read(sqlite_sets(None)).is_none());
    }

    #[test]
    fn postgres_batch_has_six_parameterized_statements() {
        let mut batch = CommandBatch::new(Engine::Postgres);
        configure(&DbObjectName::parse("sales.orders"), &mut batch).unwrap();
        assert_eq!(batch.statements().len(), 6);
        for statement in batch.statements() {
            assert!(statement.sql().contains("$1") && statement.sql().contains("$2"));
            assert_eq!(
                statement.parameters(),
                &[SqlValue::from("sales"), SqlValue::from("orders")]
            );
        }
    }

    #[test]
    fn generic_batch_uses_information_schema() {
        let mut batch = CommandBatch::new(Engine::Generic);
        configure(&DbObjectName::unqualified("orders"), &mut batch).unwrap();
        assert_eq!(batch.statements().len(), 3);
        assert!(batch
            .statements()
            .iter()
            .all(|s| s.sql().contains("information_schema") && s.sql().contains('?')));
    }
}

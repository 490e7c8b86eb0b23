//! Tables: the expected shape, its DDL, and the comparison against the
//! live table

mod delta;
mod query;
mod rebuild;

use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::migrator::{CreationStyle, Migrator};
use crate::partition::PartitionStrategy;
use crate::schema::command::{CommandBatch, SliceReader};
use crate::schema::object::{SchemaObjectDefinition, SchemaObjectDelta};
use crate::schema::type_mapping::{normalize_type, TypeMappings};
use crate::schema::types::{Column, DbObjectName, ForeignKey, GeneratedKind, IndexDefinition};
use crate::utils::naming::{primary_key_name, quote_if_needed, shadow_table_name};

pub use delta::{ColumnChange, ColumnRename, ForeignKeyChange, IndexChange, TableDelta};

/// Represents a database table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub identifier: DbObjectName,
    pub columns: Vec<Column>,
    pub indexes: Vec<IndexDefinition>,
    pub foreign_keys: Vec<ForeignKey>,
    pub partitioning: Option<PartitionStrategy>,
    /// Explicit primary key constraint name
    pub primary_key_name: Option<String>,
}

impl Table {
    /// Create an empty table from `schema.name` or a bare name
    pub fn new(name: &str) -> Self {
        Self::named(DbObjectName::parse(name))
    }

    pub fn named(identifier: DbObjectName) -> Self {
        Self {
            identifier,
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            partitioning: None,
            primary_key_name: None,
        }
    }

    pub fn add_column(&mut self, column: Column) -> &mut Self {
        self.columns.push(column);
        self
    }

    /// Add a column typed after the host type `T`
    pub fn add_column_of<T: ?Sized>(
        &mut self,
        name: &str,
        mappings: &TypeMappings,
    ) -> Result<&mut Column> {
        let db_type = mappings.db_type_for::<T>()?;
        self.columns.push(Column::new(name, &db_type));
        let last = self.columns.len() - 1;
        Ok(&mut self.columns[last])
    }

    pub fn add_index(&mut self, index: IndexDefinition) -> &mut Self {
        self.indexes.push(index);
        self
    }

    pub fn add_foreign_key(&mut self, foreign_key: ForeignKey) -> &mut Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    pub fn partition_by(&mut self, strategy: PartitionStrategy) -> &mut Self {
        self.partitioning = Some(strategy);
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    /// Primary key columns, in column order
    pub fn primary_key_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Constraint name of the primary key as created under `table_name`
    ///
    /// A rebuild creates the table under its shadow name first, so the
    /// constraint takes the shadow's name until it is renamed back.
    pub fn primary_key_constraint_name(&self, table_name: &str) -> String {
        match &self.primary_key_name {
            Some(name) if table_name.eq_ignore_ascii_case(&self.identifier.name) => name.clone(),
            Some(name) => shadow_table_name(name),
            None => primary_key_name(table_name, &self.primary_key_columns()),
        }
    }

    /// The column an SQLite `INTEGER PRIMARY KEY AUTOINCREMENT` applies to
    fn sqlite_rowid_column(&self) -> Option<&Column> {
        let keys: Vec<&Column> = self.columns.iter().filter(|c| c.is_primary_key).collect();
        match keys.as_slice() {
            [only] if only.is_autonumber
                && normalize_type(Engine::Sqlite, &only.data_type) == "integer" =>
            {
                Some(only)
            }
            _ => None,
        }
    }

    /// Column definition as used in `CREATE TABLE` and `ADD COLUMN`
    pub(crate) fn column_sql(&self, engine: Engine, column: &Column) -> Result<String> {
        let mut sql = format!("{} {}", quote_if_needed(&column.name), column.data_type);

        let rowid = self
            .sqlite_rowid_column()
            .map(|c| c.name.eq_ignore_ascii_case(&column.name))
            .unwrap_or(false);

        if column.is_autonumber {
            match engine {
                Engine::Sqlite if rowid => sql.push_str(" PRIMARY KEY AUTOINCREMENT"),
                Engine::Sqlite => {}
                Engine::Postgres | Engine::Generic => {
                    sql.push_str(" GENERATED BY DEFAULT AS IDENTITY")
                }
            }
        }

        if let Some(generated) = &column.generated {
            let expression = generated.expression.as_deref().ok_or_else(|| {
                Error::DatabaseError(format!(
                    "Generated column {} has no known expression",
                    column.name
                ))
            })?;
            let kind = match (engine, generated.kind) {
                (Engine::Postgres, GeneratedKind::Virtual) => {
                    return Err(Error::unsupported(engine, "virtual generated columns"))
                }
                (Engine::Generic, _) => "",
                (_, GeneratedKind::Stored) => " STORED",
                (_, GeneratedKind::Virtual) => " VIRTUAL",
            };
            sql.push_str(&format!(" GENERATED ALWAYS AS ({}){}", expression, kind));
        }

        if let Some(default) = &column.default_value {
            sql.push_str(&format!(" DEFAULT {}", default));
        }

        if !column.nullable && !(rowid && column.is_autonumber && engine == Engine::Sqlite) {
            sql.push_str(" NOT NULL");
        }

        Ok(sql)
    }

    /// `CREATE TABLE` for this shape under `name`, without indexes
    pub(crate) fn write_create_table(
        &self,
        migrator: &Migrator,
        name: &DbObjectName,
        if_not_exists: bool,
        w: &mut dyn Write,
    ) -> Result<()> {
        let engine = migrator.engine();
        if self.partitioning.is_some() {
            PartitionStrategy::assert_supported(engine)?;
        }

        let mut lines = Vec::with_capacity(self.columns.len() + 2);
        for column in &self.columns {
            lines.push(self.column_sql(engine, column)?);
        }

        let primary_key = self.primary_key_columns();
        let inline_rowid = engine == Engine::Sqlite && self.sqlite_rowid_column().is_some();
        if !primary_key.is_empty() && !inline_rowid {
            let columns: Vec<String> = primary_key.iter().map(|c| quote_if_needed(c)).collect();
            lines.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                quote_if_needed(&self.primary_key_constraint_name(&name.name)),
                columns.join(", ")
            ));
        }

        for foreign_key in &self.foreign_keys {
            lines.push(foreign_key.to_constraint_sql(engine));
        }

        write!(
            w,
            "CREATE TABLE {}{} (\n    {}\n)",
            if if_not_exists { "IF NOT EXISTS " } else { "" },
            migrator.qualified(name),
            lines.join(",\n    ")
        )?;
        if let Some(strategy) = &self.partitioning {
            write!(w, " {}", strategy.partition_by_clause())?;
        }
        writeln!(w, ";")?;

        if let Some(strategy) = &self.partitioning {
            for partition in strategy.partitions() {
                partition.write_create(name, w)?;
            }
        }

        Ok(())
    }

    pub(crate) fn write_create_indexes(
        &self,
        migrator: &Migrator,
        w: &mut dyn Write,
    ) -> Result<()> {
        for index in &self.indexes {
            writeln!(w, "{};", index.to_ddl(migrator.engine(), &self.identifier))?;
        }
        Ok(())
    }

    pub(crate) fn write_drop_index(
        &self,
        migrator: &Migrator,
        index: &IndexDefinition,
        w: &mut dyn Write,
    ) -> Result<()> {
        writeln!(
            w,
            "DROP INDEX IF EXISTS {};",
            migrator.qualified(&self.identifier.sibling(&index.name))
        )?;
        Ok(())
    }

    /// Full create DDL: table, partitions and indexes
    pub fn to_create_sql(&self, migrator: &Migrator) -> Result<String> {
        let mut sql = String::new();
        self.write_create_statement(migrator, &mut sql)?;
        Ok(sql)
    }
}

impl SchemaObjectDefinition for Table {
    fn identifier(&self) -> &DbObjectName {
        &self.identifier
    }

    fn all_names(&self) -> Vec<DbObjectName> {
        let mut names = vec![self.identifier.clone()];
        names.extend(
            self.indexes
                .iter()
                .map(|index| self.identifier.sibling(&index.name)),
        );
        if let Some(strategy) = &self.partitioning {
            names.extend(strategy.partition_names(&self.identifier));
        }
        names
    }

    fn configure_query_command(&self, batch: &mut CommandBatch) -> Result<()> {
        query::configure(&self.identifier, batch)
    }

    fn create_delta(
        &self,
        engine: Engine,
        reader: &mut SliceReader<'_>,
    ) -> Result<SchemaObjectDelta> {
        let actual = query::read_actual(&self.identifier, engine, reader)?;
        Ok(SchemaObjectDelta::Table(TableDelta::new(
            engine,
            self.clone(),
            actual,
        )))
    }

    fn write_create_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        let if_not_exists = match migrator.table_creation {
            CreationStyle::DropThenCreate => {
                migrator.write_drop_table(&self.identifier, w)?;
                false
            }
            CreationStyle::CreateIfNotExists => true,
        };
        self.write_create_table(migrator, &self.identifier, if_not_exists, w)?;
        self.write_create_indexes(migrator, w)
    }

    fn write_drop_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        migrator.write_drop_table(&self.identifier, w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::CascadeAction;
    use pretty_assertions::assert_eq;

    fn people() -> Table {
        let mut table = Table::new("people");
        table
            .add_column(Column::new("id", "integer").as_primary_key().auto_number())
            .add_column(Column::new("name", "varchar(100)").not_null())
            .add_column(Column::new("age", "integer"))
            .add_index(IndexDefinition::new("idx_people_age", ["age"]));
        table
    }

    #[test]
    fn postgres_create_statement() {
        let migrator = Migrator::postgresql();
        assert_eq!(
            people().to_create_sql(&migrator).unwrap(),
            "DROP TABLE IF EXISTS public.people CASCADE;\n\
             CREATE TABLE public.people (\n    \
             id integer GENERATED BY DEFAULT AS IDENTITY NOT NULL,\n    \
             name varchar(100) NOT NULL,\n    \
             age integer,\n    \
             CONSTRAINT pkey_people_id PRIMARY KEY (id)\n);\n\
             CREATE INDEX idx_people_age ON public.people USING btree (age);\n"
        );
    }

    #[test]
    fn sqlite_create_statement_inlines_autoincrement() {
        let migrator = Migrator::sqlite().with_table_creation(CreationStyle::CreateIfNotExists);
        assert_eq!(
            people().to_create_sql(&migrator).unwrap(),
            "CREATE TABLE IF NOT EXISTS people (\n    \
             id integer PRIMARY KEY AUTOINCREMENT,\n    \
             name varchar(100) NOT NULL,\n    \
             age integer\n);\n\
             CREATE INDEX idx_people_age ON people (age);\n"
        );
    }

    #[test]
    fn foreign_keys_and_composite_keys() {
        let mut table = Table::new("sales.order_lines");
        table
            .add_column(Column::new("order_id", "bigint").as_primary_key())
            .add_column(Column::new("line", "integer").as_primary_key())
            .add_foreign_key(
                ForeignKey::new(
                    "fk_lines_order",
                    ["order_id"],
                    DbObjectName::parse("sales.orders"),
                    ["id"],
                )
                .on_delete(CascadeAction::Cascade),
            );

        let sql = table.to_create_sql(&Migrator::postgresql()).unwrap();
        assert!(sql.contains("CONSTRAINT pkey_order_lines_order_id_line PRIMARY KEY (order_id, line)"));
        assert!(sql.contains(
            "CONSTRAINT fk_lines_order FOREIGN KEY (order_id) REFERENCES sales.orders (id) ON DELETE CASCADE"
        ));
    }

    #[test]
    fn partitioned_tables_create_their_partitions() {
        let mut table = Table::new("orders");
        table
            .add_column(Column::new("id", "bigint"))
            .add_column(Column::new("region", "text"))
            .partition_by(
                PartitionStrategy::list(["region"])
                    .with_values("us", ["'us'"])
                    .with_default(),
            );

        let sql = table
            .to_create_sql(&Migrator::postgresql().with_table_creation(CreationStyle::CreateIfNotExists))
            .unwrap();
        assert!(sql.contains(") PARTITION BY LIST (region);"));
        assert!(sql.contains("CREATE TABLE public.orders_us PARTITION OF public.orders FOR VALUES IN ('us');"));
        assert!(sql.contains("CREATE TABLE public.orders_default PARTITION OF public.orders DEFAULT;"));

        let names: Vec<String> = table.all_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["orders", "orders_us", "orders_default"]);

        assert!(matches!(
            table.to_create_sql(&Migrator::sqlite()),
            Err(Error::UnsupportedError { .. })
        ));
    }

    #[test]
    fn columns_from_host_types() {
        let mappings = TypeMappings::new(Engine::Postgres);
        let mut table = Table::new("events");
        table.add_column_of::<i64>("id", &mappings).unwrap().is_primary_key = true;
        table.add_column_of::<Option<String>>("note", &mappings).unwrap();

        assert_eq!(table.columns[0].data_type, "bigint");
        assert_eq!(table.columns[1].data_type, "varchar");
        assert_eq!(table.primary_key_columns(), vec!["id".to_string()]);
    }

    #[test]
    fn shadow_tables_get_their_own_constraint_name() {
        let table = people();
        assert_eq!(table.primary_key_constraint_name("people"), "pkey_people_id");
        assert_eq!(table.primary_key_constraint_name("people_temp"), "pkey_people_temp_id");
    }
}

//! Type definitions for database schema objects

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::Engine;
use crate::utils::naming::quote_if_needed;

/// A schema-qualified object name
///
/// A name without a schema belongs to the default schema of whichever
/// engine it is rendered for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DbObjectName {
    pub schema: Option<String>,
    pub name: String,
}

impl DbObjectName {
    /// Parse `schema.name` or a bare `name`
    pub fn parse(text: &str) -> Self {
        match text.split_once('.') {
            Some((schema, name)) => Self::qualified(schema, name),
            None => Self::unqualified(text),
        }
    }

    pub fn qualified(schema: &str, name: &str) -> Self {
        Self {
            schema: Some(schema.to_string()),
            name: name.to_string(),
        }
    }

    pub fn unqualified(name: &str) -> Self {
        Self {
            schema: None,
            name: name.to_string(),
        }
    }

    pub fn schema_or_default(&self, engine: Engine) -> String {
        self.schema
            .clone()
            .unwrap_or_else(|| engine.default_schema().to_string())
    }

    /// The same name with its schema made explicit
    pub fn resolved(&self, engine: Engine) -> Self {
        Self::qualified(&self.schema_or_default(engine), &self.name)
    }

    /// A sibling object in the same schema
    pub fn sibling(&self, name: &str) -> Self {
        Self {
            schema: self.schema.clone(),
            name: name.to_string(),
        }
    }

    /// Case-insensitive identity check once both names are resolved
    pub fn same_object(&self, other: &DbObjectName, engine: Engine) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self
                .schema_or_default(engine)
                .eq_ignore_ascii_case(&other.schema_or_default(engine))
    }

    /// The name as it appears in DDL for `engine`
    ///
    /// SQLite objects in `main` are written unqualified.
    pub fn qualified_name(&self, engine: Engine) -> String {
        let schema = self.schema_or_default(engine);
        if engine == Engine::Sqlite && schema.eq_ignore_ascii_case("main") {
            quote_if_needed(&self.name)
        } else {
            format!("{}.{}", quote_if_needed(&schema), quote_if_needed(&self.name))
        }
    }
}

impl fmt::Display for DbObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// How a generated column is materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratedKind {
    Virtual,
    Stored,
}

/// A generated column expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedColumn {
    pub expression: Option<String>,
    pub kind: GeneratedKind,
}

/// Represents a database column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub is_primary_key: bool,
    pub is_autonumber: bool,
    pub generated: Option<GeneratedColumn>,
}

impl Column {
    /// Create a new nullable column with the given name and type
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            default_value: None,
            is_primary_key: false,
            is_autonumber: false,
            generated: None,
        }
    }

    /// Set whether the column is nullable
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn not_null(self) -> Self {
        self.nullable(false)
    }

    /// Mark the column as part of the primary key; implies NOT NULL
    pub fn as_primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }

    /// Set a default value expression for the column
    pub fn default_value(mut self, expression: &str) -> Self {
        self.default_value = Some(expression.to_string());
        self
    }

    pub fn auto_number(mut self) -> Self {
        self.is_autonumber = true;
        self
    }

    pub fn generated_as(mut self, expression: &str, kind: GeneratedKind) -> Self {
        self.generated = Some(GeneratedColumn {
            expression: Some(expression.to_string()),
            kind,
        });
        self
    }

    pub fn is_generated(&self) -> bool {
        self.generated.is_some()
    }

    /// Whether existing rows need a value written into this column
    pub fn needs_backfill(&self) -> bool {
        !(self.nullable || self.default_value.is_some() || self.is_autonumber || self.is_generated())
    }

    /// Whether `ALTER TABLE ... ADD COLUMN` can add this column to a
    /// populated table on `engine`
    ///
    /// SQLite rejects stored generated columns in `ADD COLUMN`, and only an
    /// `INTEGER PRIMARY KEY` numbers itself there.
    pub fn can_add_in_place(&self, engine: Engine) -> bool {
        if engine != Engine::Sqlite {
            return !self.needs_backfill();
        }
        match &self.generated {
            Some(generated) => generated.kind == GeneratedKind::Virtual,
            None => self.nullable || self.default_value.is_some(),
        }
    }
}

/// Referential action for a foreign key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CascadeAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl CascadeAction {
    pub fn to_sql(&self) -> &'static str {
        match self {
            CascadeAction::NoAction => "NO ACTION",
            CascadeAction::Restrict => "RESTRICT",
            CascadeAction::Cascade => "CASCADE",
            CascadeAction::SetNull => "SET NULL",
            CascadeAction::SetDefault => "SET DEFAULT",
        }
    }

    /// Parse either the spelled-out rule or a PostgreSQL `pg_constraint` code
    pub fn parse(text: &str) -> Self {
        match text.trim().to_uppercase().replace('_', " ").as_str() {
            "RESTRICT" | "R" => CascadeAction::Restrict,
            "CASCADE" | "C" => CascadeAction::Cascade,
            "SET NULL" | "N" => CascadeAction::SetNull,
            "SET DEFAULT" | "D" => CascadeAction::SetDefault,
            _ => CascadeAction::NoAction,
        }
    }
}

/// Represents a foreign key constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// SQLite does not name foreign keys, so keys read back from it are anonymous
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub linked_table: DbObjectName,
    pub linked_columns: Vec<String>,
    pub on_delete: CascadeAction,
    pub on_update: CascadeAction,
}

impl ForeignKey {
    pub fn new<S: Into<String>>(
        name: &str,
        columns: impl IntoIterator<Item = S>,
        linked_table: DbObjectName,
        linked_columns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: Some(name.to_string()),
            columns: columns.into_iter().map(Into::into).collect(),
            linked_table,
            linked_columns: linked_columns.into_iter().map(Into::into).collect(),
            on_delete: CascadeAction::NoAction,
            on_update: CascadeAction::NoAction,
        }
    }

    pub fn on_delete(mut self, action: CascadeAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: CascadeAction) -> Self {
        self.on_update = action;
        self
    }

    /// Whether both keys are named and the names differ
    pub fn names_conflict(&self, other: &ForeignKey) -> bool {
        match (&self.name, &other.name) {
            (Some(a), Some(b)) => !a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }

    /// Structural equality, with `other`'s own columns passed through `rename`
    pub fn matches(
        &self,
        other: &ForeignKey,
        engine: Engine,
        rename: impl Fn(&str) -> String,
    ) -> bool {
        let renamed: Vec<String> = other.columns.iter().map(|c| rename(c)).collect();
        !self.names_conflict(other)
            && same_names(&self.columns, &renamed)
            && self.linked_table.same_object(&other.linked_table, engine)
            && same_names(&self.linked_columns, &other.linked_columns)
            && self.on_delete == other.on_delete
            && self.on_update == other.on_update
    }

    /// Constraint clause used inside `CREATE TABLE`
    pub fn to_constraint_sql(&self, engine: Engine) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| quote_if_needed(c)).collect();
        let linked: Vec<String> = self.linked_columns.iter().map(|c| quote_if_needed(c)).collect();
        let target = if engine == Engine::Sqlite {
            quote_if_needed(&self.linked_table.name)
        } else {
            self.linked_table.qualified_name(engine)
        };

        let mut sql = String::new();
        if let Some(name) = &self.name {
            sql.push_str(&format!("CONSTRAINT {} ", quote_if_needed(name)));
        }
        sql.push_str(&format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            columns.join(", "),
            target,
            linked.join(", ")
        ));
        if self.on_delete != CascadeAction::NoAction {
            sql.push_str(&format!(" ON DELETE {}", self.on_delete.to_sql()));
        }
        if self.on_update != CascadeAction::NoAction {
            sql.push_str(&format!(" ON UPDATE {}", self.on_update.to_sql()));
        }
        sql
    }
}

/// Case-insensitive, order-sensitive comparison of identifier lists
pub fn same_names(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// What an index is built over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexTarget {
    Columns(Vec<String>),
    Expression(String),
}

/// Represents an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub target: IndexTarget,
    pub is_unique: bool,
    pub sort_order: SortOrder,
    pub predicate: Option<String>,
    pub collation: Option<String>,
    /// PostgreSQL access method; `btree` when absent
    pub method: Option<String>,
    /// DDL read back from the database, re-emitted verbatim
    pub existing_ddl: Option<String>,
}

impl IndexDefinition {
    pub fn new<S: Into<String>>(name: &str, columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.to_string(),
            target: IndexTarget::Columns(columns.into_iter().map(Into::into).collect()),
            is_unique: false,
            sort_order: SortOrder::Asc,
            predicate: None,
            collation: None,
            method: None,
            existing_ddl: None,
        }
    }

    pub fn on_expression(name: &str, expression: &str) -> Self {
        Self {
            target: IndexTarget::Expression(expression.to_string()),
            ..Self::new::<String>(name, Vec::new())
        }
    }

    /// An index as it exists in the database
    pub fn existing(name: &str, ddl: &str) -> Self {
        Self {
            existing_ddl: Some(ddl.to_string()),
            ..Self::new::<String>(name, Vec::new())
        }
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn descending(mut self) -> Self {
        self.sort_order = SortOrder::Desc;
        self
    }

    pub fn predicate(mut self, predicate: &str) -> Self {
        self.predicate = Some(predicate.to_string());
        self
    }

    pub fn collation(mut self, collation: &str) -> Self {
        self.collation = Some(collation.to_string());
        self
    }

    pub fn method(mut self, method: &str) -> Self {
        self.method = Some(method.to_string());
        self
    }

    /// Columns named by the index, empty for expression indexes
    pub fn columns(&self) -> &[String] {
        match &self.target {
            IndexTarget::Columns(columns) => columns,
            IndexTarget::Expression(_) => &[],
        }
    }

    /// `CREATE INDEX` statement without a trailing semicolon
    pub fn to_ddl(&self, engine: Engine, table: &DbObjectName) -> String {
        if let Some(ddl) = &self.existing_ddl {
            return ddl.trim().trim_end_matches(';').to_string();
        }

        let mut sql = String::from("CREATE ");
        if self.is_unique {
            sql.push_str("UNIQUE ");
        }
        sql.push_str("INDEX ");

        match engine {
            Engine::Sqlite => {
                sql.push_str(&table.sibling(&self.name).qualified_name(engine));
                sql.push_str(" ON ");
                sql.push_str(&quote_if_needed(&table.name));
            }
            Engine::Postgres => {
                sql.push_str(&quote_if_needed(&self.name));
                sql.push_str(" ON ");
                sql.push_str(&table.qualified_name(engine));
                sql.push_str(" USING ");
                sql.push_str(self.method.as_deref().unwrap_or("btree"));
            }
            Engine::Generic => {
                sql.push_str(&quote_if_needed(&self.name));
                sql.push_str(" ON ");
                sql.push_str(&table.qualified_name(engine));
            }
        }

        let elements: Vec<String> = match &self.target {
            IndexTarget::Columns(columns) => columns
                .iter()
                .map(|c| self.decorate(quote_if_needed(c)))
                .collect(),
            IndexTarget::Expression(expression) => vec![self.decorate(format!("({})", expression))],
        };
        sql.push_str(&format!(" ({})", elements.join(", ")));

        if let Some(predicate) = &self.predicate {
            sql.push_str(&format!(" WHERE {}", predicate));
        }

        sql
    }

    fn decorate(&self, element: String) -> String {
        let mut element = element;
        if let Some(collation) = &self.collation {
            element.push_str(&format!(" COLLATE \"{}\"", collation));
        }
        if self.sort_order == SortOrder::Desc {
            element.push_str(" DESC");
        }
        element
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_qualified_and_bare_names() {
        let qualified = DbObjectName::parse("sales.orders");
        assert_eq!(qualified.schema.as_deref(), Some("sales"));
        assert_eq!(qualified.name, "orders");

        let bare = DbObjectName::parse("orders");
        assert_eq!(bare.schema_or_default(Engine::Postgres), "public");
        assert_eq!(bare.schema_or_default(Engine::Sqlite), "main");
        assert!(bare.same_object(&DbObjectName::parse("PUBLIC.Orders"), Engine::Postgres));
    }

    #[test]
    fn sqlite_main_names_are_unqualified() {
        let name = DbObjectName::unqualified("people");
        assert_eq!(name.qualified_name(Engine::Sqlite), "people");
        assert_eq!(name.qualified_name(Engine::Postgres), "public.people");
    }

    #[test]
    fn postgres_index_ddl_mirrors_pg_get_indexdef() {
        let table = DbObjectName::unqualified("people");
        let index = IndexDefinition::new("idx_people_name", ["name"]).unique();
        assert_eq!(
            index.to_ddl(Engine::Postgres, &table),
            "CREATE UNIQUE INDEX idx_people_name ON public.people USING btree (name)"
        );
    }

    #[test]
    fn sqlite_index_ddl() {
        let table = DbObjectName::unqualified("people");
        let index = IndexDefinition::new("idx_people_age", ["age"])
            .descending()
            .predicate("age > 10");
        assert_eq!(
            index.to_ddl(Engine::Sqlite, &table),
            "CREATE INDEX idx_people_age ON people (age DESC) WHERE age > 10"
        );
    }

    #[test]
    fn foreign_key_matching_follows_renames() {
        let expected = ForeignKey::new(
            "fk_orders_customer",
            ["customer"],
            DbObjectName::unqualified("customers"),
            ["id"],
        )
        .on_delete(CascadeAction::Cascade);

        let mut actual = expected.clone();
        actual.name = None;
        actual.columns = vec!["customer_id".to_string()];

        assert!(!expected.matches(&actual, Engine::Sqlite, |c| c.to_string()));
        assert!(expected.matches(&actual, Engine::Sqlite, |c| {
            if c == "customer_id" {
                "customer".to_string()
            } else {
                c.to_string()
            }
        }));
    }

    #[test]
    fn cascade_actions_parse_codes_and_words() {
        assert_eq!(CascadeAction::parse("c"), CascadeAction::Cascade);
        assert_eq!(CascadeAction::parse("SET NULL"), CascadeAction::SetNull);
        assert_eq!(CascadeAction::parse("set_default"), CascadeAction::SetDefault);
        assert_eq!(CascadeAction::parse("a"), CascadeAction::NoAction);
    }
}

//! Host type to engine type lookup
//!
//! [`TypeMappings`] resolves a Rust type to the column type an engine
//! stores it as. Lookups are read-through cached per mapping instance and
//! explicit registrations win over the built-in table.
//! [`normalize_type`] folds the synonyms catalogs report back so that
//! `int4`, `integer` and `serial` compare equal.

use parking_lot::RwLock;
use std::any::type_name;
use std::collections::HashMap;
use tracing::debug;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::utils::naming::normalize_whitespace;

/// Per-engine cache of host type names to column types
#[derive(Debug)]
pub struct TypeMappings {
    engine: Engine,
    cache: RwLock<HashMap<&'static str, String>>,
}

impl TypeMappings {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Override or pre-seed the column type used for `T`
    pub fn register<T: ?Sized>(&self, db_type: &str) {
        self.cache
            .write()
            .insert(type_name::<T>(), db_type.to_string());
    }

    /// Column type for the host type `T`
    pub fn db_type_for<T: ?Sized>(&self) -> Result<String> {
        let key = type_name::<T>();
        if let Some(found) = self.cache.read().get(key) {
            return Ok(found.clone());
        }

        let resolved = builtin_type(self.engine, key).ok_or_else(|| {
            Error::TypeMappingError(format!(
                "No {} column type is known for host type {}",
                self.engine, key
            ))
        })?;

        debug!(host_type = key, db_type = %resolved, engine = %self.engine, "Resolved column type");
        // Another reader may have raced us here; the first insert wins
        Ok(self
            .cache
            .write()
            .entry(key)
            .or_insert(resolved)
            .clone())
    }

    /// Whether `T` resolves without consulting the built-in table
    pub fn is_cached<T: ?Sized>(&self) -> bool {
        self.cache.read().contains_key(type_name::<T>())
    }
}

fn builtin_type(engine: Engine, host: &str) -> Option<String> {
    let host = host
        .strip_prefix("core::option::Option<")
        .and_then(|inner| inner.strip_suffix('>'))
        .unwrap_or(host);

    let portable = match host {
        "i8" | "i16" | "u8" => "smallint",
        "i32" | "u16" => "integer",
        "i64" | "u32" | "isize" | "usize" => "bigint",
        "f32" => "real",
        "f64" => "double precision",
        "bool" => "boolean",
        "char" => "char(1)",
        "&str" | "str" | "alloc::string::String" => "varchar",
        "alloc::vec::Vec<u8>" | "&[u8]" | "[u8]" => "bytea",
        "serde_json::value::Value" => "jsonb",
        "chrono::naive::date::NaiveDate" => "date",
        "chrono::naive::time::NaiveTime" => "time",
        "chrono::naive::datetime::NaiveDateTime" => "timestamp",
        "chrono::datetime::DateTime<chrono::offset::utc::Utc>" => "timestamptz",
        _ => return None,
    };

    Some(match engine {
        Engine::Postgres => portable.to_string(),
        Engine::Sqlite => translate_for_sqlite(portable).to_string(),
        Engine::Generic => translate_for_generic(portable).to_string(),
    })
}

/// SQLite only distinguishes the INTEGER, REAL, TEXT and BLOB storage classes
fn translate_for_sqlite(portable: &str) -> &'static str {
    match portable {
        "smallint" | "integer" | "bigint" | "boolean" => "integer",
        "real" | "double precision" => "real",
        "bytea" => "blob",
        _ => "text",
    }
}

fn translate_for_generic(portable: &str) -> &'static str {
    match portable {
        "smallint" => "smallint",
        "integer" => "integer",
        "bigint" => "bigint",
        "real" => "real",
        "double precision" => "double precision",
        "boolean" => "boolean",
        "char(1)" => "char(1)",
        "bytea" => "varbinary(max)",
        "date" => "date",
        "time" => "time",
        "timestamp" | "timestamptz" => "timestamp",
        _ => "varchar(255)",
    }
}

/// Canonical spelling of a column type for comparison
pub fn normalize_type(engine: Engine, raw: &str) -> String {
    let text = normalize_whitespace(raw);
    let (base, args) = match text.find('(') {
        Some(open) => (text[..open].trim_end(), text[open..].replace(' ', "")),
        None => (text.as_str(), String::new()),
    };

    let base = match base {
        "int" | "int4" | "integer" | "serial" | "serial4" => "integer",
        "int8" | "bigint" | "bigserial" | "serial8" => "bigint",
        "int2" | "smallint" | "smallserial" | "serial2" => "smallint",
        "character varying" | "varchar" => "varchar",
        "character" | "char" | "bpchar" => "char",
        "bool" | "boolean" => "boolean",
        "float8" | "double precision" | "double" => "double precision",
        "float4" | "real" => "real",
        "decimal" | "numeric" => "numeric",
        "timestamp without time zone" | "timestamp" => "timestamp",
        "timestamp with time zone" | "timestamptz" => "timestamptz",
        "time without time zone" | "time" => "time",
        "time with time zone" | "timetz" => "timetz",
        other => other,
    };

    // SQLite treats every integer spelling as the same storage class
    let base = match (engine, base) {
        (Engine::Sqlite, "bigint" | "smallint") => "integer",
        (_, other) => other,
    };

    format!("{}{}", base, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(Engine::Postgres, "int4", "integer")]
    #[case(Engine::Postgres, "SERIAL", "integer")]
    #[case(Engine::Postgres, "character varying(100)", "varchar(100)")]
    #[case(Engine::Postgres, "VARCHAR( 100 )", "varchar(100)")]
    #[case(Engine::Postgres, "bool", "boolean")]
    #[case(Engine::Postgres, "timestamp with time zone", "timestamptz")]
    #[case(Engine::Postgres, "numeric(10, 2)", "numeric(10,2)")]
    #[case(Engine::Sqlite, "BIGINT", "integer")]
    #[case(Engine::Sqlite, "text", "text")]
    fn synonyms_fold_together(#[case] engine: Engine, #[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_type(engine, raw), expected);
    }

    #[test]
    fn lookups_are_cached_after_first_use() {
        let mappings = TypeMappings::new(Engine::Postgres);
        assert!(!mappings.is_cached::<i32>());
        assert_eq!(mappings.db_type_for::<i32>().unwrap(), "integer");
        assert!(mappings.is_cached::<i32>());
        assert_eq!(mappings.db_type_for::<Option<String>>().unwrap(), "varchar");
    }

    #[test]
    fn registration_overrides_builtin_types() {
        let mappings = TypeMappings::new(Engine::Sqlite);
        assert_eq!(mappings.db_type_for::<bool>().unwrap(), "integer");

        mappings.register::<bool>("boolean");
        assert_eq!(mappings.db_type_for::<bool>().unwrap(), "boolean");
    }

    #[test]
    fn unknown_host_types_are_errors() {
        struct Opaque;
        let mappings = TypeMappings::new(Engine::Postgres);
        let err = mappings.db_type_for::<Opaque>().unwrap_err();
        assert!(matches!(err, Error::TypeMappingError(_)));
    }
}

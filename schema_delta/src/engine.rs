//! Supported database engines

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A database engine the library can inspect and migrate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    Postgres,
    Sqlite,
    /// Any provider that speaks `information_schema` and ANSI DDL
    Generic,
}

impl Engine {
    /// Resolve an engine from a configuration driver name
    pub fn from_driver(driver: &str) -> Result<Self> {
        match driver.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Engine::Postgres),
            "sqlite" | "sqlite3" => Ok(Engine::Sqlite),
            "generic" | "any" => Ok(Engine::Generic),
            other => Err(Error::ConfigError(format!(
                "Unsupported database driver: {}",
                other
            ))),
        }
    }

    /// Schema that unqualified names belong to
    pub fn default_schema(&self) -> &'static str {
        match self {
            Engine::Postgres | Engine::Generic => "public",
            Engine::Sqlite => "main",
        }
    }

    /// Fail with `UnsupportedError` unless this is PostgreSQL
    pub(crate) fn require_postgres(&self, feature: &str) -> Result<()> {
        match self {
            Engine::Postgres => Ok(()),
            other => Err(Error::unsupported(other, feature)),
        }
    }

    /// Placeholder for the 1-based parameter `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Engine::Postgres => format!("${}", index),
            Engine::Sqlite => format!("?{}", index),
            Engine::Generic => "?".to_string(),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Engine::Postgres => "PostgreSQL",
            Engine::Sqlite => "SQLite",
            Engine::Generic => "generic",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn driver_names_resolve() {
        assert_eq!(Engine::from_driver("PostgreSQL").unwrap(), Engine::Postgres);
        assert_eq!(Engine::from_driver("sqlite3").unwrap(), Engine::Sqlite);
        assert_eq!(Engine::from_driver("any").unwrap(), Engine::Generic);
        assert!(matches!(
            Engine::from_driver("mysql"),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn placeholders_per_engine() {
        assert_eq!(Engine::Postgres.placeholder(2), "$2");
        assert_eq!(Engine::Sqlite.placeholder(2), "?2");
        assert_eq!(Engine::Generic.placeholder(2), "?");
    }
}

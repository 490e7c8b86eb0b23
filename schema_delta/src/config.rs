//! Configuration handling for schema_delta

use serde::{Deserialize, Serialize};
use std::fs;

use crate::error::{Error, Result};
use crate::migrator::CreationStyle;
use crate::schema::difference::AutoCreate;

/// Load configuration from a TOML file
pub fn load_from_file(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::ConfigError(format!("Failed to read config file: {}", e)))?;

    parse(&config_str)
}

/// Parse configuration from TOML text
pub fn parse(config_str: &str) -> Result<Config> {
    toml::from_str(config_str)
        .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))
}

/// Represents the complete schema_delta configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub migrator: MigratorConfig,
    pub logging: Option<LoggingConfig>,
}

/// Database connection configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub driver: String,
    pub url: String,
    pub pool_size: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub schema: Option<String>,
}

/// Migration policy and script formatting
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MigratorConfig {
    #[serde(default = "default_auto_create")]
    pub auto_create: AutoCreate,
    pub role: Option<String>,
    #[serde(default = "default_transactional")]
    pub transactional: bool,
    #[serde(default)]
    pub table_creation: CreationStyle,
    pub script_directory: Option<String>,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            auto_create: default_auto_create(),
            role: None,
            transactional: default_transactional(),
            table_creation: CreationStyle::default(),
            script_directory: None,
        }
    }
}

fn default_auto_create() -> AutoCreate {
    AutoCreate::CreateOrUpdate
}

fn default_transactional() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: String,
    pub stdout: bool,
}

//! Error types for schema_delta

use thiserror::Error;

use crate::schema::difference::AutoCreate;

/// Result type for schema_delta operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for schema_delta
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error(
        "Schema patch is not allowed under AutoCreate::{auto_create:?}: {}",
        objects.join(", ")
    )]
    PatchValidationError {
        auto_create: AutoCreate,
        objects: Vec<String>,
    },

    #[error("Type mapping error: {0}")]
    TypeMappingError(String),

    #[error("Unsupported on {engine}: {feature}")]
    UnsupportedError { engine: String, feature: String },

    #[error("Invalid identifier '{name}': {reason}")]
    InvalidIdentifierError { name: String, reason: String },

    #[error("Result set misalignment for {object}: {detail}")]
    ResultSetMisalignment { object: String, detail: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Formatting error: {0}")]
    FormatError(#[from] std::fmt::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    pub(crate) fn unsupported(engine: impl ToString, feature: impl Into<String>) -> Self {
        Error::UnsupportedError {
            engine: engine.to_string(),
            feature: feature.into(),
        }
    }

    pub(crate) fn invalid_identifier(name: &str, reason: impl Into<String>) -> Self {
        Error::InvalidIdentifierError {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convert Serde JSON errors to schema_delta errors
impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}

/// Convert TOML deserialization errors to schema_delta errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}

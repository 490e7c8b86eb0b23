//! Database module for schema_delta
//!
//! This module handles connection pools and the executor that runs
//! batches and scripts over one pooled connection.

pub mod connection;
pub mod executor;

// Re-export key types
pub use connection::DatabaseConnection;
pub use executor::SqlExecutor;

//! Utilities for schema_delta
//!
//! This module provides utility functions used across the library.

pub mod logging;
pub mod naming;

// Re-export key utility functions
pub use naming::{canonicalize_ddl, format_name, quote, quote_if_needed};

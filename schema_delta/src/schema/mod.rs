//! Schema module for schema_delta
//!
//! This module holds the schema object model, the per-object deltas and
//! the migration that aggregates them.

pub mod command;
pub mod difference;
pub mod extension;
pub mod function;
pub mod migration;
pub mod object;
pub mod schema_check;
pub mod sequence;
pub mod table;
pub mod type_mapping;
pub mod types;
pub mod view;

// Re-export key types
pub use command::{CommandBatch, CommandRunner, ResultSet, SqlValue, Statement};
pub use difference::{AutoCreate, SchemaPatchDifference};
pub use extension::Extension;
pub use function::{Function, FunctionDelta};
pub use migration::{MigrationReport, SchemaMigration};
pub use object::{SchemaDelta, SchemaObject, SchemaObjectDefinition, SchemaObjectDelta};
pub use schema_check::{SchemaCheckDelta, SchemaExistenceCheck};
pub use sequence::Sequence;
pub use table::{Table, TableDelta};
pub use type_mapping::{normalize_type, TypeMappings};
pub use types::{
    CascadeAction, Column, DbObjectName, ForeignKey, GeneratedKind, IndexDefinition, SortOrder,
};
pub use view::{View, ViewDelta};

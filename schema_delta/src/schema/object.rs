//! The schema object and delta protocol
//!
//! Every desired artifact is a [`SchemaObject`]. Each variant knows how to
//! ask the database about itself, how to turn the answer into a
//! [`SchemaObjectDelta`], and how to write its own create and drop DDL.

use std::fmt::{self, Write};

use crate::engine::Engine;
use crate::error::Result;
use crate::migrator::Migrator;
use crate::schema::command::{CommandBatch, SliceReader};
use crate::schema::difference::SchemaPatchDifference;
use crate::schema::extension::Extension;
use crate::schema::function::{Function, FunctionDelta};
use crate::schema::schema_check::{SchemaCheckDelta, SchemaExistenceCheck};
use crate::schema::sequence::Sequence;
use crate::schema::table::{Table, TableDelta};
use crate::schema::types::DbObjectName;
use crate::schema::view::{View, ViewDelta};

/// Behaviour shared by every kind of schema object
pub trait SchemaObjectDefinition: fmt::Debug + Send + Sync {
    /// Schema-qualified identity of the object
    fn identifier(&self) -> &DbObjectName;

    /// Every identifier the object owns
    fn all_names(&self) -> Vec<DbObjectName> {
        vec![self.identifier().clone()]
    }

    /// Append the statements that describe the live state of this object
    fn configure_query_command(&self, batch: &mut CommandBatch) -> Result<()>;

    /// Consume this object's result sets and compare
    fn create_delta(&self, engine: Engine, reader: &mut SliceReader<'_>)
        -> Result<SchemaObjectDelta>;

    fn write_create_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()>;

    fn write_drop_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()>;
}

/// A desired database artifact
#[derive(Debug, Clone)]
pub enum SchemaObject {
    Table(Table),
    Sequence(Sequence),
    Extension(Extension),
    View(View),
    Function(Function),
    SchemaExistenceCheck(SchemaExistenceCheck),
}

impl SchemaObject {
    fn definition(&self) -> &dyn SchemaObjectDefinition {
        match self {
            SchemaObject::Table(table) => table,
            SchemaObject::Sequence(sequence) => sequence,
            SchemaObject::Extension(extension) => extension,
            SchemaObject::View(view) => view,
            SchemaObject::Function(function) => function,
            SchemaObject::SchemaExistenceCheck(check) => check,
        }
    }
}

impl SchemaObjectDefinition for SchemaObject {
    fn identifier(&self) -> &DbObjectName {
        self.definition().identifier()
    }

    fn all_names(&self) -> Vec<DbObjectName> {
        self.definition().all_names()
    }

    fn configure_query_command(&self, batch: &mut CommandBatch) -> Result<()> {
        self.definition().configure_query_command(batch)
    }

    fn create_delta(
        &self,
        engine: Engine,
        reader: &mut SliceReader<'_>,
    ) -> Result<SchemaObjectDelta> {
        self.definition().create_delta(engine, reader)
    }

    fn write_create_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        self.definition().write_create_statement(migrator, w)
    }

    fn write_drop_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        self.definition().write_drop_statement(migrator, w)
    }
}

impl From<Table> for SchemaObject {
    fn from(table: Table) -> Self {
        SchemaObject::Table(table)
    }
}

impl From<Sequence> for SchemaObject {
    fn from(sequence: Sequence) -> Self {
        SchemaObject::Sequence(sequence)
    }
}

impl From<Extension> for SchemaObject {
    fn from(extension: Extension) -> Self {
        SchemaObject::Extension(extension)
    }
}

impl From<View> for SchemaObject {
    fn from(view: View) -> Self {
        SchemaObject::View(view)
    }
}

impl From<Function> for SchemaObject {
    fn from(function: Function) -> Self {
        SchemaObject::Function(function)
    }
}

impl From<SchemaExistenceCheck> for SchemaObject {
    fn from(check: SchemaExistenceCheck) -> Self {
        SchemaObject::SchemaExistenceCheck(check)
    }
}

/// The comparison of one expected object with its live counterpart
pub trait SchemaDelta: fmt::Debug + Send + Sync {
    fn expected(&self) -> &dyn SchemaObjectDefinition;

    fn difference(&self) -> SchemaPatchDifference;

    /// Patch the live object in place so it matches the expected one
    fn write_update(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()>;

    /// Undo [`write_update`](Self::write_update)
    fn write_rollback(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()>;

    /// DDL for the object as it was before, for diagnostics
    fn write_restoration_of_previous_state(
        &self,
        migrator: &Migrator,
        w: &mut dyn Write,
    ) -> Result<()>;

    /// Replace an object that cannot be patched in place
    fn write_recreation(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        self.expected().write_drop_statement(migrator, w)?;
        self.expected().write_create_statement(migrator, w)
    }

    fn write_recreation_rollback(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        self.expected().write_drop_statement(migrator, w)?;
        self.write_restoration_of_previous_state(migrator, w)
    }
}

/// Objects that either exist or not, with nothing to patch in between
#[derive(Debug, Clone)]
pub struct PresenceDelta<T> {
    pub expected: T,
    pub exists: bool,
}

impl<T> PresenceDelta<T> {
    pub fn new(expected: T, exists: bool) -> Self {
        Self { expected, exists }
    }
}

impl<T: SchemaObjectDefinition> SchemaDelta for PresenceDelta<T> {
    fn expected(&self) -> &dyn SchemaObjectDefinition {
        &self.expected
    }

    fn difference(&self) -> SchemaPatchDifference {
        if self.exists {
            SchemaPatchDifference::None
        } else {
            SchemaPatchDifference::Create
        }
    }

    fn write_update(&self, _migrator: &Migrator, _w: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    fn write_rollback(&self, _migrator: &Migrator, _w: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    fn write_restoration_of_previous_state(
        &self,
        _migrator: &Migrator,
        _w: &mut dyn Write,
    ) -> Result<()> {
        Ok(())
    }
}

/// The delta of any schema object
#[derive(Debug, Clone)]
pub enum SchemaObjectDelta {
    Table(TableDelta),
    Sequence(PresenceDelta<Sequence>),
    Extension(PresenceDelta<Extension>),
    View(ViewDelta),
    Function(FunctionDelta),
    SchemaExistenceCheck(SchemaCheckDelta),
}

impl SchemaObjectDelta {
    pub fn delta(&self) -> &dyn SchemaDelta {
        match self {
            SchemaObjectDelta::Table(delta) => delta,
            SchemaObjectDelta::Sequence(delta) => delta,
            SchemaObjectDelta::Extension(delta) => delta,
            SchemaObjectDelta::View(delta) => delta,
            SchemaObjectDelta::Function(delta) => delta,
            SchemaObjectDelta::SchemaExistenceCheck(delta) => delta,
        }
    }

    pub fn identifier(&self) -> &DbObjectName {
        self.delta().expected().identifier()
    }

    pub fn difference(&self) -> SchemaPatchDifference {
        self.delta().difference()
    }

    pub fn as_table(&self) -> Option<&TableDelta> {
        match self {
            SchemaObjectDelta::Table(delta) => Some(delta),
            _ => None,
        }
    }

    /// Forward DDL appropriate to the delta's severity
    pub fn write_update(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        let delta = self.delta();
        match delta.difference() {
            SchemaPatchDifference::None => Ok(()),
            SchemaPatchDifference::Create => delta.expected().write_create_statement(migrator, w),
            SchemaPatchDifference::Update => delta.write_update(migrator, w),
            SchemaPatchDifference::Invalid => delta.write_recreation(migrator, w),
        }
    }

    /// Rollback DDL appropriate to the delta's severity
    pub fn write_rollback(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        let delta = self.delta();
        match delta.difference() {
            SchemaPatchDifference::None => Ok(()),
            SchemaPatchDifference::Create => delta.expected().write_drop_statement(migrator, w),
            SchemaPatchDifference::Update => delta.write_rollback(migrator, w),
            SchemaPatchDifference::Invalid => delta.write_recreation_rollback(migrator, w),
        }
    }

    pub fn write_restoration_of_previous_state(
        &self,
        migrator: &Migrator,
        w: &mut dyn Write,
    ) -> Result<()> {
        self.delta().write_restoration_of_previous_state(migrator, w)
    }

    /// The forward DDL as a string
    pub fn update_sql(&self, migrator: &Migrator) -> Result<String> {
        let mut sql = String::new();
        self.write_update(migrator, &mut sql)?;
        Ok(sql)
    }
}

impl fmt::Display for SchemaObjectDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.identifier(), self.difference())
    }
}

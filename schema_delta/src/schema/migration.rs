//! Schema migration orchestration
//!
//! A [`SchemaMigration`] is computed from one batched round trip: every
//! object appends its existence-check statements, the runner executes the
//! batch once, and each object turns its own result slice into a delta.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::migrator::Migrator;
use crate::schema::command::{CommandBatch, CommandRunner, ResultCursor};
use crate::schema::difference::{AutoCreate, SchemaPatchDifference};
use crate::schema::object::{SchemaObject, SchemaObjectDefinition, SchemaObjectDelta};

/// The deltas of a set of schema objects against one database
#[derive(Debug, Clone)]
pub struct SchemaMigration {
    engine: Engine,
    deltas: Vec<SchemaObjectDelta>,
    schemas: Vec<String>,
    difference: SchemaPatchDifference,
}

/// Serializable summary of a migration
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub engine: Engine,
    pub difference: SchemaPatchDifference,
    pub schemas: Vec<String>,
    pub objects: Vec<ObjectReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectReport {
    pub identifier: String,
    pub difference: SchemaPatchDifference,
}

impl SchemaMigration {
    /// Compare `objects` with the live database behind `runner`
    pub async fn determine<R>(
        runner: &mut R,
        cancel: &CancellationToken,
        objects: &[SchemaObject],
    ) -> Result<Self>
    where
        R: CommandRunner + ?Sized,
    {
        let engine = runner.engine();
        if objects.is_empty() {
            return Ok(Self::from_deltas(engine, Vec::new()));
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut batch = CommandBatch::new(engine);
        let mut tokens = Vec::with_capacity(objects.len());
        for object in objects {
            let token = batch.begin_slice(object.identifier().to_string());
            object.configure_query_command(&mut batch)?;
            batch.end_slice(token)?;
            tokens.push(token);
        }
        debug!(
            objects = objects.len(),
            statements = batch.statements().len(),
            "Fetching live schema state"
        );

        let sets = runner.fetch_results(&batch, cancel).await?;
        let mut cursor = ResultCursor::new(&batch, sets)?;

        let mut deltas = Vec::with_capacity(objects.len());
        for (object, token) in objects.iter().zip(tokens) {
            let mut reader = cursor.slice(token)?;
            let delta = object.create_delta(engine, &mut reader)?;
            reader.finish()?;
            deltas.push(delta);
        }

        let migration = Self::from_deltas(engine, deltas);
        info!(
            engine = %engine,
            difference = ?migration.difference,
            "Schema delta determined"
        );
        for delta in migration.deltas.iter() {
            if delta.difference() == SchemaPatchDifference::Invalid {
                warn!(object = %delta.identifier(), "Object requires recreation");
            }
        }
        Ok(migration)
    }

    /// Assemble a migration from deltas computed elsewhere
    pub fn from_deltas(engine: Engine, mut deltas: Vec<SchemaObjectDelta>) -> Self {
        let default = engine.default_schema();

        let mut referenced = BTreeSet::new();
        for delta in &deltas {
            if matches!(delta, SchemaObjectDelta::SchemaExistenceCheck(_)) {
                continue;
            }
            for name in delta.delta().expected().all_names() {
                if let Some(schema) = name.schema {
                    if !schema.eq_ignore_ascii_case(default) {
                        referenced.insert(schema);
                    }
                }
            }
        }

        for delta in deltas.iter_mut() {
            if let SchemaObjectDelta::SchemaExistenceCheck(check) = delta {
                check.absorb(referenced.iter().cloned());
                referenced.extend(
                    check
                        .requested
                        .schemas
                        .iter()
                        .filter(|s| !s.eq_ignore_ascii_case(default))
                        .cloned(),
                );
            }
        }

        let difference = SchemaPatchDifference::aggregate(deltas.iter().map(|d| d.difference()));
        Self {
            engine,
            deltas,
            schemas: referenced.into_iter().collect(),
            difference,
        }
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn deltas(&self) -> &[SchemaObjectDelta] {
        &self.deltas
    }

    pub fn into_deltas(self) -> Vec<SchemaObjectDelta> {
        self.deltas
    }

    /// Non-default schemas referenced by any object, sorted
    pub fn schemas(&self) -> &[String] {
        &self.schemas
    }

    /// Worst severity across all deltas
    pub fn difference(&self) -> SchemaPatchDifference {
        self.difference
    }

    /// Fail unless the migration may be applied under `auto_create`
    pub fn assert_patching_is_valid(&self, auto_create: AutoCreate) -> Result<()> {
        if auto_create == AutoCreate::All {
            return Ok(());
        }

        if self.difference == SchemaPatchDifference::Invalid {
            return Err(self.violation(auto_create, |d| d == SchemaPatchDifference::Invalid));
        }

        if auto_create == AutoCreate::CreateOnly && self.difference < SchemaPatchDifference::Create
        {
            return Err(self.violation(auto_create, |d| d < SchemaPatchDifference::Create));
        }

        Ok(())
    }

    fn violation(
        &self,
        auto_create: AutoCreate,
        offends: impl Fn(SchemaPatchDifference) -> bool,
    ) -> Error {
        Error::PatchValidationError {
            auto_create,
            objects: self
                .deltas
                .iter()
                .filter(|d| offends(d.difference()))
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Forward DDL for every delta, in order
    pub fn write_all_updates(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        for delta in &self.deltas {
            delta.write_update(migrator, w)?;
        }
        Ok(())
    }

    /// Rollback DDL for every delta, in order
    pub fn write_all_rollbacks(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        for delta in &self.deltas {
            delta.write_rollback(migrator, w)?;
        }
        Ok(())
    }

    pub fn report(&self) -> MigrationReport {
        MigrationReport {
            engine: self.engine,
            difference: self.difference,
            schemas: self.schemas.clone(),
            objects: self
                .deltas
                .iter()
                .map(|d| ObjectReport {
                    identifier: d.identifier().to_string(),
                    difference: d.difference(),
                })
                .collect(),
        }
    }

    /// The report as pretty-printed JSON
    pub fn report_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.report())?)
    }
}

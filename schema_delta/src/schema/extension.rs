//! PostgreSQL extensions

use std::fmt::Write;

use crate::engine::Engine;
use crate::error::Result;
use crate::migrator::Migrator;
use crate::schema::command::{CommandBatch, SliceReader};
use crate::schema::object::{PresenceDelta, SchemaObjectDefinition, SchemaObjectDelta};
use crate::schema::types::DbObjectName;
use crate::utils::naming::quote_if_needed;

#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    pub identifier: DbObjectName,
}

impl Extension {
    pub fn new(name: &str) -> Self {
        Self {
            identifier: DbObjectName::unqualified(name),
        }
    }
}

impl SchemaObjectDefinition for Extension {
    fn identifier(&self) -> &DbObjectName {
        &self.identifier
    }

    fn configure_query_command(&self, batch: &mut CommandBatch) -> Result<()> {
        batch.engine().require_postgres("extensions")?;
        let statement = batch.statement();
        let name = statement.parameter(self.identifier.name.as_str());
        statement.set_sql(format!(
            "SELECT extname::text AS name FROM pg_extension WHERE extname = {}",
            name
        ));
        Ok(())
    }

    fn create_delta(
        &self,
        _engine: Engine,
        reader: &mut SliceReader<'_>,
    ) -> Result<SchemaObjectDelta> {
        let exists = !reader.next_result()?.is_empty();
        Ok(SchemaObjectDelta::Extension(PresenceDelta::new(
            self.clone(),
            exists,
        )))
    }

    fn write_create_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        migrator.engine().require_postgres("extensions")?;
        writeln!(
            w,
            "CREATE EXTENSION IF NOT EXISTS {};",
            quote_if_needed(&self.identifier.name)
        )?;
        Ok(())
    }

    fn write_drop_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        migrator.engine().require_postgres("extensions")?;
        writeln!(
            w,
            "DROP EXTENSION IF EXISTS {} CASCADE;",
            quote_if_needed(&self.identifier.name)
        )?;
        Ok(())
    }
}

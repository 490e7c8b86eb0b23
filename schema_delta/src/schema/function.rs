//! PostgreSQL functions, kept as their full `CREATE OR REPLACE` text

use std::fmt::Write;

use crate::engine::Engine;
use crate::error::Result;
use crate::migrator::Migrator;
use crate::schema::command::{CommandBatch, SliceReader};
use crate::schema::difference::SchemaPatchDifference;
use crate::schema::object::{SchemaDelta, SchemaObjectDefinition, SchemaObjectDelta};
use crate::schema::types::DbObjectName;
use crate::utils::naming::normalize_whitespace;

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub identifier: DbObjectName,
    /// Complete `CREATE OR REPLACE FUNCTION` statement
    pub body: String,
    /// Statement that removes the function, signature included
    pub drop_statement: String,
}

impl Function {
    pub fn new(name: &str, body: &str, drop_statement: &str) -> Self {
        Self {
            identifier: DbObjectName::parse(name),
            body: body.trim().to_string(),
            drop_statement: drop_statement.trim().trim_end_matches(';').to_string(),
        }
    }
}

fn canonical_body(body: &str) -> String {
    normalize_whitespace(body).replacen("create function", "create or replace function", 1)
}

fn write_statement(w: &mut dyn Write, sql: &str) -> Result<()> {
    let sql = sql.trim();
    if sql.ends_with(';') {
        writeln!(w, "{}", sql)?;
    } else {
        writeln!(w, "{};", sql)?;
    }
    Ok(())
}

impl SchemaObjectDefinition for Function {
    fn identifier(&self) -> &DbObjectName {
        &self.identifier
    }

    fn configure_query_command(&self, batch: &mut CommandBatch) -> Result<()> {
        let engine = batch.engine();
        engine.require_postgres("functions")?;

        let statement = batch.statement();
        let schema = statement.parameter(self.identifier.schema_or_default(engine));
        let name = statement.parameter(self.identifier.name.as_str());
        statement.set_sql(format!(
            "SELECT pg_get_functiondef(p.oid)::text AS body FROM pg_proc p \
             JOIN pg_namespace n ON n.oid = p.pronamespace \
             WHERE n.nspname = {} AND p.proname = {} ORDER BY p.oid",
            schema, name
        ));
        Ok(())
    }

    fn create_delta(
        &self,
        _engine: Engine,
        reader: &mut SliceReader<'_>,
    ) -> Result<SchemaObjectDelta> {
        let set = reader.next_result()?;
        let actual_body = set.rows().next().and_then(|row| row.text("body"));
        Ok(SchemaObjectDelta::Function(FunctionDelta {
            expected: self.clone(),
            actual_body,
        }))
    }

    fn write_create_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        migrator.engine().require_postgres("functions")?;
        write_statement(w, &self.body)
    }

    fn write_drop_statement(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        migrator.engine().require_postgres("functions")?;
        write_statement(w, &self.drop_statement)
    }
}

#[derive(Debug, Clone)]
pub struct FunctionDelta {
    pub expected: Function,
    /// `pg_get_functiondef` output for the live function
    pub actual_body: Option<String>,
}

impl SchemaDelta for FunctionDelta {
    fn expected(&self) -> &dyn SchemaObjectDefinition {
        &self.expected
    }

    fn difference(&self) -> SchemaPatchDifference {
        match &self.actual_body {
            None => SchemaPatchDifference::Create,
            Some(actual) if canonical_body(actual) == canonical_body(&self.expected.body) => {
                SchemaPatchDifference::None
            }
            Some(_) => SchemaPatchDifference::Update,
        }
    }

    fn write_update(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        self.expected.write_create_statement(migrator, w)
    }

    fn write_rollback(&self, migrator: &Migrator, w: &mut dyn Write) -> Result<()> {
        match &self.actual_body {
            Some(body) => write_statement(w, body),
            None => self.expected.write_drop_statement(migrator, w),
        }
    }

    fn write_restoration_of_previous_state(
        &self,
        _migrator: &Migrator,
        w: &mut dyn Write,
    ) -> Result<()> {
        match &self.actual_body {
            Some(body) => write_statement(w, body),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BODY: &str = "CREATE OR REPLACE FUNCTION public.add_one(x integer)\n RETURNS integer\n LANGUAGE sql\nAS $function$SELECT x + 1$function$";

    fn add_one(body: &str) -> Function {
        Function::new("add_one", body, "DROP FUNCTION IF EXISTS public.add_one(integer);")
    }

    #[test]
    fn matches_pg_get_functiondef_output() {
        let delta = FunctionDelta {
            expected: add_one("create function public.add_one(x integer) returns integer language sql as $function$SELECT x + 1$function$"),
            actual_body: Some(BODY.to_string()),
        };
        assert_eq!(delta.difference(), SchemaPatchDifference::None);
    }

    #[test]
    fn changed_bodies_rerun_the_new_body_and_roll_back_to_the_old() {
        let expected = add_one(&BODY.replace("x + 1", "x + 2"));
        let delta = FunctionDelta {
            expected,
            actual_body: Some(BODY.to_string()),
        };
        assert_eq!(delta.difference(), SchemaPatchDifference::Update);

        let migrator = Migrator::postgresql();
        let mut forward = String::new();
        delta.write_update(&migrator, &mut forward).unwrap();
        assert!(forward.contains("x + 2") && forward.ends_with("$function$;\n"));

        let mut backward = String::new();
        delta.write_rollback(&migrator, &mut backward).unwrap();
        assert!(backward.contains("x + 1"));
    }

    #[test]
    fn missing_function_rolls_back_with_its_drop_statement() {
        let delta = FunctionDelta {
            expected: add_one(BODY),
            actual_body: None,
        };
        let mut sql = String::new();
        delta.write_rollback(&Migrator::postgresql(), &mut sql).unwrap();
        assert_eq!(sql, "DROP FUNCTION IF EXISTS public.add_one(integer);\n");
    }
}

//! Hand-off to the SQL-generating assistant
//!
//! The assistant receives the schema DDL, the user's question, the engine
//! and the schema name, and answers with free text that should contain one
//! SQL statement. [`extract_sql`] turns that answer into something
//! executable.

use serde::Serialize;

use crate::engine::DatabaseType;

/// Everything the assistant needs to write SQL for one question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaContext {
    /// Compacted `CREATE TABLE` statements, one per table
    pub ddl: Vec<String>,
    pub question: String,
    pub engine: DatabaseType,
    pub schema: String,
}

impl SchemaContext {
    pub fn new(
        ddl: Vec<String>,
        question: impl Into<String>,
        engine: DatabaseType,
        schema: impl Into<String>,
    ) -> Self {
        Self { ddl, question: question.into(), engine, schema: schema.into() }
    }

    /// DDL statements separated by blank lines
    #[must_use]
    pub fn joined_ddl(&self) -> String {
        self.ddl.join("\n\n")
    }
}

/// Strip Markdown code fences and blank lines from an assistant answer
///
/// An empty string means the answer contained no SQL.
#[must_use]
pub fn extract_sql(text: &str) -> String {
    let unfenced = text.replace("```sql", "").replace("```", "");
    unfenced
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

//! Schema-qualified table names for the catalogue the engine reads.

use crate::error::{Result, RetrievalError};

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        if schema.trim().is_empty() {
            return Err(RetrievalError::Configuration(
                "schema name is required".to_string(),
            ));
        }
        if table.trim().is_empty() {
            return Err(RetrievalError::Configuration(
                "table name is required".to_string(),
            ));
        }
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Returns the raw schema string.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Returns the raw table string.
    pub fn table(&self) -> &str {
        &self.table
    }
}

/// Every relation the retrieval queries touch.
#[derive(Debug, Clone)]
pub struct CatalogTables {
    /// Campus rows.
    pub campus: TableName,
    /// Faculty rows.
    pub faculty: TableName,
    /// Course rows.
    pub course: TableName,
    /// Course offerings per term.
    pub offering: TableName,
    /// Learning outcome rows.
    pub learning_outcome: TableName,
    /// Shared embedding vectors.
    pub embedding_vector: TableName,
}

impl CatalogTables {
    /// Default table names inside `schema`.
    pub fn in_schema(schema: &str) -> Result<Self> {
        Ok(Self {
            campus: TableName::new(schema, "campuses")?,
            faculty: TableName::new(schema, "faculties")?,
            course: TableName::new(schema, "courses")?,
            offering: TableName::new(schema, "course_offerings")?,
            learning_outcome: TableName::new(schema, "course_learning_outcomes")?,
            embedding_vector: TableName::new(schema, "learning_outcome_vectors")?,
        })
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

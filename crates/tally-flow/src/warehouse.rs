//! Warehouse client contract and statement builders.
//!
//! The warehouse ingests staged files asynchronously through a scheduled task.
//! Ingested rows carry the staged file name in a `filename` column, which is
//! how the engine counts and deletes exactly one window's rows.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Escape character used in generated `LIKE` patterns.
const LIKE_ESCAPE: char = '\\';

/// Fully qualified name of a warehouse object: `database.schema.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskIdentity {
    /// Database name.
    pub database: String,
    /// Schema name.
    pub schema: String,
    /// Object name.
    pub name: String,
}

impl TaskIdentity {
    /// Creates a validated identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if any part is empty or contains
    /// characters outside `[A-Za-z0-9_$]`.
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self> {
        let identity = Self {
            database: database.into(),
            schema: schema.into(),
            name: name.into(),
        };
        for (label, part) in [
            ("database", &identity.database),
            ("schema", &identity.schema),
            ("name", &identity.name),
        ] {
            validate_identifier(label, part)?;
        }
        Ok(identity)
    }

    /// Returns `database.schema.name`.
    #[must_use]
    pub fn fully_qualified(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.name)
    }

    /// Returns the statement that runs this task once.
    #[must_use]
    pub fn execute_statement(&self) -> String {
        format!("EXECUTE TASK {}", self.fully_qualified())
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fully_qualified())
    }
}

fn validate_identifier(label: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::configuration(format!("warehouse {label} must not be empty")));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return Err(Error::configuration(format!(
            "warehouse {label} '{value}' contains unsupported characters"
        )));
    }
    Ok(())
}

/// Prefix match on the warehouse `filename` column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilenamePattern {
    prefix: String,
}

impl FilenamePattern {
    /// Creates a pattern matching every filename that starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `prefix` is empty, since an empty
    /// prefix would match every row in the table.
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(Error::InvalidArgument {
                message: "filename prefix must not be empty".into(),
            });
        }
        Ok(Self { prefix })
    }

    /// Returns the literal prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the `LIKE` pattern with wildcards in the prefix escaped.
    #[must_use]
    pub fn like_pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.prefix.len() + 2);
        for c in self.prefix.chars() {
            if matches!(c, '%' | '_' | LIKE_ESCAPE) {
                pattern.push(LIKE_ESCAPE);
            }
            pattern.push(c);
        }
        pattern.push('%');
        pattern
    }

    /// Returns true if `filename` falls under this pattern.
    #[must_use]
    pub fn matches(&self, filename: &str) -> bool {
        filename.starts_with(&self.prefix)
    }

    /// Returns a `SELECT COUNT(*)` statement over `table`.
    #[must_use]
    pub fn count_statement(&self, table: &TaskIdentity) -> String {
        format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            table.fully_qualified(),
            self.where_clause()
        )
    }

    /// Returns a `DELETE` statement over `table`.
    #[must_use]
    pub fn delete_statement(&self, table: &TaskIdentity) -> String {
        format!(
            "DELETE FROM {} WHERE {}",
            table.fully_qualified(),
            self.where_clause()
        )
    }

    fn where_clause(&self) -> String {
        format!(
            "filename LIKE '{}' ESCAPE '{LIKE_ESCAPE}{LIKE_ESCAPE}'",
            self.like_pattern().replace('\'', "''")
        )
    }
}

impl fmt::Display for FilenamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*", self.prefix)
    }
}

/// Client for the warehouse that ingests staged files.
///
/// Failures must surface as [`Error::Warehouse`] so the orchestrator treats
/// them as retryable.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Executes a statement that returns no rows.
    async fn execute(&self, statement: &str) -> Result<()>;

    /// Counts rows whose filename matches `pattern`.
    async fn count_rows(&self, pattern: &FilenamePattern) -> Result<u64>;

    /// Deletes rows whose filename matches `pattern`, returning how many were removed.
    async fn delete_rows(&self, pattern: &FilenamePattern) -> Result<u64>;

    /// Triggers one asynchronous run of the ingestion task.
    ///
    /// Returns once the task is scheduled; ingestion completes later.
    async fn trigger_ingestion_task(&self, task: &TaskIdentity) -> Result<()> {
        self.execute(&task.execute_statement()).await
    }
}

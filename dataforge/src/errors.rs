//! Error types for the dataforge pipeline executor.
//!
//! Errors fall into two classes. Fatal errors (bad stage specs, unknown
//! columns, missing tables or prompts, lost connectivity) abort a run before
//! or between stages. Row-local errors (completion failures, failed writes,
//! transient query errors) are recorded against the row and the sweep moves on.

use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type DataforgeResult<T> = Result<T, DataforgeError>;

/// The main error type for dataforge operations.
#[derive(Debug, Error)]
pub enum DataforgeError {
    /// The stage specification string could not be parsed.
    #[error("{0}")]
    MalformedStageSpec(#[from] MalformedStageSpecError),

    /// A stage references a column the table does not have.
    #[error("{0}")]
    UnknownColumn(#[from] UnknownColumnError),

    /// A statement against the row store failed.
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// The completion endpoint failed after exhausting retries.
    #[error("{0}")]
    Completion(#[from] CompletionError),

    /// The completion endpoint answered with blank text.
    #[error("{0}")]
    EmptyCompletion(#[from] EmptyCompletionError),

    /// Writing a stage result matched no row.
    #[error("{0}")]
    RowWrite(#[from] RowWriteError),

    /// No system prompt is stored for a stage that has work to do.
    #[error("{0}")]
    MissingPrompt(#[from] MissingPromptError),

    /// The processing table does not exist.
    #[error("Table '{table}' does not exist")]
    MissingTable {
        /// The table name.
        table: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A worker task panicked or was aborted.
    #[error("Worker error: {0}")]
    Worker(String),
}

impl DataforgeError {
    /// Returns true if this error must stop the whole run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::MalformedStageSpec(_)
            | Self::UnknownColumn(_)
            | Self::MissingPrompt(_)
            | Self::MissingTable { .. }
            | Self::Config(_)
            | Self::Worker(_) => true,
            Self::Storage(err) => err.is_fatal(),
            Self::Completion(_) | Self::EmptyCompletion(_) | Self::RowWrite(_) => false,
        }
    }

    /// Returns a short, stable name for the error variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedStageSpec(_) => "MalformedStageSpec",
            Self::UnknownColumn(_) => "UnknownColumn",
            Self::Storage(_) => "StorageError",
            Self::Completion(_) => "CompletionError",
            Self::EmptyCompletion(_) => "EmptyCompletionError",
            Self::RowWrite(_) => "RowWriteError",
            Self::MissingPrompt(_) => "MissingPrompt",
            Self::MissingTable { .. } => "MissingTable",
            Self::Config(_) => "ConfigError",
            Self::Worker(_) => "WorkerError",
        }
    }

    /// Number of completion attempts made, for completion failures.
    #[must_use]
    pub fn attempts(&self) -> Option<usize> {
        match self {
            Self::Completion(err) => Some(err.attempts),
            Self::EmptyCompletion(err) => Some(err.attempts),
            _ => None,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), json!(self.kind()));
        map.insert("message".to_string(), json!(self.to_string()));
        map.insert("fatal".to_string(), json!(self.is_fatal()));
        if let Some(attempts) = self.attempts() {
            map.insert("attempts".to_string(), json!(attempts));
        }
        match self {
            Self::UnknownColumn(err) => {
                map.insert("column".to_string(), json!(err.name));
                if let Some(ref suggestion) = err.suggestion {
                    map.insert("suggestion".to_string(), json!(suggestion));
                }
            }
            Self::Storage(err) => {
                map.insert("operation".to_string(), json!(err.operation));
                map.insert("storage_kind".to_string(), json!(err.kind.as_str()));
            }
            Self::MissingPrompt(err) => {
                map.insert("fix_hint".to_string(), json!(err.fix_hint()));
            }
            _ => {}
        }
        map
    }
}

/// Error raised when a stage specification segment is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed stage spec segment '{segment}': {reason}")]
pub struct MalformedStageSpecError {
    /// The offending segment as written.
    pub segment: String,
    /// Why the segment was rejected.
    pub reason: String,
}

impl MalformedStageSpecError {
    /// Creates a new malformed spec error.
    #[must_use]
    pub fn new(segment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            segment: segment.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when a referenced source column does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Source column '{name}' does not exist.{}", suggestion_suffix(.suggestion.as_deref()))]
pub struct UnknownColumnError {
    /// The column name as written in the stage spec.
    pub name: String,
    /// The nearest known column, if any is close enough.
    pub suggestion: Option<String>,
}

fn suggestion_suffix(suggestion: Option<&str>) -> String {
    suggestion
        .map(|s| format!(" Did you mean '{s}'?"))
        .unwrap_or_default()
}

impl UnknownColumnError {
    /// Creates a new unknown column error.
    #[must_use]
    pub fn new(name: impl Into<String>, suggestion: Option<String>) -> Self {
        Self {
            name: name.into(),
            suggestion,
        }
    }
}

/// Broad classification of storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorKind {
    /// The database could not be reached or the pool is exhausted/closed.
    Connectivity,
    /// A table or column is missing or has the wrong shape.
    Schema,
    /// Any other statement failure; scoped to the current row.
    Query,
}

impl StorageErrorKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connectivity => "connectivity",
            Self::Schema => "schema",
            Self::Query => "query",
        }
    }
}

/// Error raised when a row store operation fails.
///
/// The enclosing transaction has been rolled back by the time this is seen.
#[derive(Debug, Clone, Error)]
#[error("Storage error during {operation} ({}): {cause}", .kind.as_str())]
pub struct StorageError {
    /// The gateway operation that failed (e.g. "claim_next_unprocessed").
    pub operation: String,
    /// Failure classification.
    pub kind: StorageErrorKind,
    /// Underlying cause.
    pub cause: String,
}

impl StorageError {
    /// Creates a new storage error.
    #[must_use]
    pub fn new(operation: impl Into<String>, kind: StorageErrorKind, cause: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            kind,
            cause: cause.into(),
        }
    }

    /// Creates a connectivity error.
    #[must_use]
    pub fn connectivity(operation: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::new(operation, StorageErrorKind::Connectivity, cause)
    }

    /// Creates a schema error.
    #[must_use]
    pub fn schema(operation: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::new(operation, StorageErrorKind::Schema, cause)
    }

    /// Creates a row-scoped query error.
    #[must_use]
    pub fn query(operation: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::new(operation, StorageErrorKind::Query, cause)
    }

    /// Schema and connectivity problems stop the run; query errors do not.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            StorageErrorKind::Connectivity | StorageErrorKind::Schema
        )
    }

    /// Classifies an sqlx error raised while running `operation`.
    #[cfg(feature = "postgres")]
    #[must_use]
    pub fn from_sqlx(operation: impl Into<String>, err: &sqlx::Error) -> Self {
        // 42P01 undefined_table, 42703 undefined_column, 3F000 invalid_schema_name
        const SCHEMA_CODES: [&str; 3] = ["42P01", "42703", "3F000"];

        let kind = match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => StorageErrorKind::Connectivity,
            sqlx::Error::ColumnNotFound(_) => StorageErrorKind::Schema,
            sqlx::Error::Database(db) => match db.code() {
                Some(code) if SCHEMA_CODES.contains(&&*code) => StorageErrorKind::Schema,
                _ => StorageErrorKind::Query,
            },
            _ => StorageErrorKind::Query,
        };
        Self::new(operation, kind, err.to_string())
    }
}

/// Error raised when the completion endpoint keeps failing.
#[derive(Debug, Clone, Error)]
#[error("Completion failed after {attempts} attempt(s): {cause}")]
pub struct CompletionError {
    /// Number of attempts made.
    pub attempts: usize,
    /// The last underlying failure.
    pub cause: String,
}

impl CompletionError {
    /// Creates a new completion error.
    #[must_use]
    pub fn new(attempts: usize, cause: impl Into<String>) -> Self {
        Self {
            attempts,
            cause: cause.into(),
        }
    }
}

/// Error raised when the completion text is empty after trimming.
#[derive(Debug, Clone, Error)]
#[error("Completion returned empty content (attempt {attempts})")]
pub struct EmptyCompletionError {
    /// Number of attempts made before the empty response arrived.
    pub attempts: usize,
}

/// Error raised when a result write affects no row.
#[derive(Debug, Clone, Error)]
#[error("Writing '{column}' for row {row} in '{table}' affected no rows")]
pub struct RowWriteError {
    /// The processing table.
    pub table: String,
    /// The row key.
    pub row: i64,
    /// The destination column.
    pub column: String,
}

impl RowWriteError {
    /// Creates a new row write error.
    #[must_use]
    pub fn new(table: impl Into<String>, row: i64, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            row,
            column: column.into(),
        }
    }
}

/// Error raised when a stage has claimable rows but no system prompt.
#[derive(Debug, Clone, Error)]
#[error("No system prompt found for stage '{stage}' of table '{table}'")]
pub struct MissingPromptError {
    /// The processing table.
    pub table: String,
    /// The stage (destination column) name.
    pub stage: String,
}

impl MissingPromptError {
    /// Creates a new missing prompt error.
    #[must_use]
    pub fn new(table: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            stage: stage.into(),
        }
    }

    /// Hint telling the operator which prompt key to add.
    #[must_use]
    pub fn fix_hint(&self) -> String {
        format!(
            "Add a system prompt under the key '{}:{}' in the prompt table",
            self.table, self.stage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_column_message_with_suggestion() {
        let err = UnknownColumnError::new("titl", Some("title".to_string()));
        assert_eq!(
            err.to_string(),
            "Source column 'titl' does not exist. Did you mean 'title'?"
        );
    }

    #[test]
    fn test_unknown_column_message_without_suggestion() {
        let err = UnknownColumnError::new("zzz", None);
        assert_eq!(err.to_string(), "Source column 'zzz' does not exist.");
    }

    #[test]
    fn test_storage_error_fatality() {
        assert!(StorageError::connectivity("claim", "refused").is_fatal());
        assert!(StorageError::schema("claim", "no such table").is_fatal());
        assert!(!StorageError::query("claim", "deadlock").is_fatal());
    }

    #[test]
    fn test_row_local_errors_are_not_fatal() {
        assert!(!DataforgeError::from(CompletionError::new(3, "boom")).is_fatal());
        assert!(!DataforgeError::from(EmptyCompletionError { attempts: 1 }).is_fatal());
        assert!(!DataforgeError::from(RowWriteError::new("t", 1, "c")).is_fatal());
        assert!(!DataforgeError::from(StorageError::query("write", "x")).is_fatal());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(DataforgeError::from(MalformedStageSpecError::new("a", "b")).is_fatal());
        assert!(DataforgeError::from(MissingPromptError::new("t", "s")).is_fatal());
        assert!(DataforgeError::MissingTable { table: "t".into() }.is_fatal());
    }

    #[test]
    fn test_completion_error_reports_attempts() {
        let err = DataforgeError::from(CompletionError::new(3, "503 Service Unavailable"));
        assert_eq!(err.attempts(), Some(3));
        assert!(err.to_string().contains("3 attempt(s)"));

        let dict = err.to_dict();
        assert_eq!(dict.get("type").unwrap(), "CompletionError");
        assert_eq!(dict.get("attempts").unwrap(), 3);
    }

    #[test]
    fn test_missing_prompt_to_dict_has_hint() {
        let err = DataforgeError::from(MissingPromptError::new("docs", "summary"));
        let dict = err.to_dict();
        let hint = dict.get("fix_hint").unwrap().as_str().unwrap();
        assert!(hint.contains("docs:summary"));
    }
}

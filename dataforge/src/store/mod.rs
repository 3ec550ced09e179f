//! Row store gateway.
//!
//! The processing table's column NULL-ness is the only state: a row is
//! pending for a stage when every source is non-NULL and the destination is
//! NULL. Backends implement [`RowStore`]; each call runs in its own
//! transaction.

pub mod ident;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::{ClaimEvent, InMemoryRowStore};
#[cfg(feature = "postgres")]
pub use postgres::PostgresRowStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{DataforgeError, StorageError};
use crate::pipeline::StageDescriptor;

/// Primary key of a processing-table row.
pub type RowKey = i64;

/// Result alias for gateway operations.
pub type StoreResult<T> = Result<T, DataforgeError>;

/// Column metadata from the table catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// SQL data type as reported by the catalogue.
    pub data_type: String,
    /// Whether the column accepts NULL.
    pub nullable: bool,
}

impl ColumnInfo {
    /// Creates a nullable text column description.
    #[must_use]
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: "text".to_string(),
            nullable: true,
        }
    }
}

/// A row claimed for one stage, with its source values in stage order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedRow {
    /// The row's primary key.
    pub key: RowKey,
    /// Values of the stage's source columns, in the stage's source order.
    pub sources: Vec<String>,
}

impl ClaimedRow {
    /// The user message for this row: sources joined with a newline.
    #[must_use]
    pub fn user_content(&self) -> String {
        StageDescriptor::join_sources(&self.sources)
    }
}

/// Progress counts for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    /// Rows whose sources are all non-NULL.
    pub eligible: u64,
    /// Eligible rows whose destination is already filled.
    pub completed: u64,
}

impl StageCounts {
    /// Rows still waiting for this stage.
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.eligible.saturating_sub(self.completed)
    }
}

/// Storage operations used by the pipeline executor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Returns true if the table exists.
    async fn table_exists(&self, table: &str) -> StoreResult<bool>;

    /// Lists the table's columns in ordinal order.
    async fn table_columns(&self, table: &str) -> StoreResult<Vec<ColumnInfo>>;

    /// Returns true if `column` exists on `table`.
    async fn column_exists(&self, table: &str, column: &str) -> StoreResult<bool> {
        Ok(self
            .table_columns(table)
            .await?
            .iter()
            .any(|c| c.name == column))
    }

    /// Adds a nullable text column if absent. Returns true if it was created.
    async fn ensure_column(&self, table: &str, column: &str) -> StoreResult<bool>;

    /// Claims one pending row for `stage`, skipping rows locked by other
    /// transactions and rows whose key is in `exclude`.
    ///
    /// The row lock is held only while the row is read; the caller keeps
    /// the claim exclusive until the result is written.
    async fn claim_next_unprocessed(
        &self,
        table: &str,
        stage: &StageDescriptor,
        exclude: &[RowKey],
    ) -> StoreResult<Option<ClaimedRow>>;

    /// Fills `destination` for exactly one row.
    ///
    /// Fails with a row write error if no row was updated, either because
    /// the row is gone or because its destination is already set.
    async fn write_result(
        &self,
        table: &str,
        key: RowKey,
        destination: &str,
        value: &str,
    ) -> StoreResult<()>;

    /// Looks up the system prompt for `(table, stage)`.
    async fn get_system_prompt(&self, table: &str, stage: &str) -> StoreResult<Option<String>>;

    /// Counts eligible and completed rows for a stage.
    async fn stage_counts(&self, table: &str, stage: &StageDescriptor) -> StoreResult<StageCounts>;
}

/// Key under which a stage's prompt is stored in the prompt table.
#[must_use]
pub fn prompt_key(table: &str, stage: &str) -> String {
    format!("{table}:{stage}")
}

pub(crate) fn storage_error(operation: &str, err: StorageError) -> DataforgeError {
    tracing::debug!(operation, error = %err, "Storage operation failed");
    DataforgeError::Storage(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_content_joins_in_order() {
        let row = ClaimedRow {
            key: 7,
            sources: vec!["My title".into(), "Body".into()],
        };
        assert_eq!(row.user_content(), "My title\nBody");
    }

    #[test]
    fn test_stage_counts_pending() {
        let counts = StageCounts {
            eligible: 10,
            completed: 4,
        };
        assert_eq!(counts.pending(), 6);
    }

    #[test]
    fn test_prompt_key() {
        assert_eq!(prompt_key("articles", "summary"), "articles:summary");
    }
}

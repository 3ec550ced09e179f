//! Run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::DataforgeError;
use crate::store::RowKey;

/// A row that failed during a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Row key.
    pub row: RowKey,
    /// Error kind, e.g. `CompletionError`.
    pub error_type: String,
    /// Error message.
    pub error: String,
    /// Completion attempts made, when the failure came from the endpoint.
    pub attempts: Option<usize>,
    /// Whether the failure stopped the run.
    pub fatal: bool,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Records `err` against `row`.
    #[must_use]
    pub fn from_error(row: RowKey, err: &DataforgeError) -> Self {
        Self {
            row,
            error_type: err.kind().to_string(),
            error: err.to_string(),
            attempts: err.attempts(),
            fatal: err.is_fatal(),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of sweeping one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// Stage label, `sources:destination`.
    pub stage: String,
    /// Rows written.
    pub processed: usize,
    /// Rows that failed and were left pending.
    pub failed: usize,
    /// Cycles run, including the final empty one.
    pub cycles: usize,
    /// Claim attempts that failed with a non-fatal storage error.
    #[serde(default)]
    pub claim_errors: usize,
    /// Per-row failures.
    pub failures: Vec<FailureRecord>,
}

impl StageReport {
    /// Creates an empty report for `stage`.
    #[must_use]
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            processed: 0,
            failed: 0,
            cycles: 0,
            claim_errors: 0,
            failures: Vec::new(),
        }
    }

    /// Counts a written row.
    pub fn record_success(&mut self) {
        self.processed += 1;
    }

    /// Counts a claim attempt that failed before any row was leased.
    pub fn record_claim_error(&mut self) {
        self.claim_errors += 1;
    }

    /// Counts a failed row.
    pub fn record_failure(&mut self, record: FailureRecord) {
        self.failed += 1;
        self.failures.push(record);
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: Uuid,
    /// Processing table.
    pub table: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// One report per stage reached, in execution order.
    pub stages: Vec<StageReport>,
    /// Whether the run stopped on cancellation.
    pub cancelled: bool,
}

impl RunSummary {
    /// Starts an empty summary.
    #[must_use]
    pub fn new(run_id: Uuid, table: impl Into<String>) -> Self {
        Self {
            run_id,
            table: table.into(),
            started_at: Utc::now(),
            duration_ms: 0,
            stages: Vec::new(),
            cancelled: false,
        }
    }

    /// Sets the duration.
    pub fn finish(&mut self, elapsed: Duration) {
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    /// Rows written across all stages.
    #[must_use]
    pub fn total_processed(&self) -> usize {
        self.stages.iter().map(|s| s.processed).sum()
    }

    /// Row failures across all stages.
    #[must_use]
    pub fn total_failed(&self) -> usize {
        self.stages.iter().map(|s| s.failed).sum()
    }

    /// Returns the report for a stage by destination column or full label.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages
            .iter()
            .find(|s| s.stage == name || s.stage.rsplit(':').next() == Some(name))
    }

    /// Converts to dictionary.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("run_id".to_string(), serde_json::json!(self.run_id));
        map.insert("table".to_string(), serde_json::json!(self.table));
        map.insert("started_at".to_string(), serde_json::json!(self.started_at.to_rfc3339()));
        map.insert("duration_ms".to_string(), serde_json::json!(self.duration_ms));
        map.insert("processed".to_string(), serde_json::json!(self.total_processed()));
        map.insert("failed".to_string(), serde_json::json!(self.total_failed()));
        map.insert("cancelled".to_string(), serde_json::json!(self.cancelled));
        map.insert(
            "stages".to_string(),
            serde_json::to_value(&self.stages).unwrap_or(serde_json::Value::Null),
        );
        map
    }
}

/// Result of processing at most one row for one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum SingleOutcome {
    /// No row was pending.
    NoPendingRow,
    /// The row's destination was written.
    Processed {
        /// Stage label.
        stage: String,
        /// Row key.
        row: RowKey,
        /// Text written.
        text: String,
        /// Completion attempts used.
        attempts: usize,
    },
    /// The row failed and was left pending.
    Failed {
        /// Stage label.
        stage: String,
        /// Row key.
        row: RowKey,
        /// Failure details.
        failure: FailureRecord,
    },
}

impl SingleOutcome {
    /// The row touched, if any.
    #[must_use]
    pub fn row(&self) -> Option<RowKey> {
        match self {
            Self::NoPendingRow => None,
            Self::Processed { row, .. } | Self::Failed { row, .. } => Some(*row),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CompletionError;

    #[test]
    fn test_failure_record_from_error() {
        let err = DataforgeError::from(CompletionError::new(3, "HTTP 503"));
        let record = FailureRecord::from_error(42, &err);
        assert_eq!(record.row, 42);
        assert_eq!(record.error_type, "CompletionError");
        assert_eq!(record.attempts, Some(3));
        assert!(!record.fatal);
    }

    #[test]
    fn test_totals_and_lookup() {
        let mut summary = RunSummary::new(Uuid::new_v4(), "docs");
        let mut first = StageReport::new("chunk:summary");
        first.record_success();
        first.record_success();
        let mut second = StageReport::new("summary:analysis");
        second.record_success();
        second.record_claim_error();
        second.record_failure(FailureRecord::from_error(
            9,
            &CompletionError::new(1, "HTTP 400").into(),
        ));
        summary.stages = vec![first, second];

        assert_eq!(summary.total_processed(), 3);
        assert_eq!(summary.total_failed(), 1);
        assert_eq!(summary.stage("analysis").map(|s| s.failed), Some(1));
        assert_eq!(summary.stage("analysis").map(|s| s.claim_errors), Some(1));
        assert_eq!(summary.stage("chunk:summary").map(|s| s.processed), Some(2));

        let dict = summary.to_dict();
        assert_eq!(dict.get("processed").unwrap(), 3);
        assert_eq!(dict.get("table").unwrap(), "docs");
    }

    #[test]
    fn test_single_outcome_row() {
        assert_eq!(SingleOutcome::NoPendingRow.row(), None);
        let outcome = SingleOutcome::Processed {
            stage: "chunk:summary".into(),
            row: 5,
            text: "x".into(),
            attempts: 1,
        };
        assert_eq!(outcome.row(), Some(5));
    }
}

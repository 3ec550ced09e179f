//! Progress events emitted by the pipeline executor.
//!
//! Events are the executor's only output besides the table itself and the
//! returned summary. A display layer subscribes by implementing
//! [`EventSink`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::Serialize;
use uuid::Uuid;

/// Something observable that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ForgeEvent {
    /// A run passed validation and is about to process its first stage.
    RunStarted {
        /// Run identifier.
        run_id: Uuid,
        /// Processing table.
        table: String,
        /// Stage labels in execution order.
        stages: Vec<String>,
        /// Worker count.
        threads: usize,
    },
    /// A stage is about to be swept.
    StageStarted {
        /// Destination column.
        stage: String,
        /// Rows whose sources are all filled.
        eligible: u64,
        /// Eligible rows already done before this sweep.
        completed: u64,
    },
    /// A row's destination was written.
    RowCompleted {
        /// Destination column.
        stage: String,
        /// Row key.
        row: i64,
        /// Completion attempts used.
        attempts: usize,
        /// Characters written.
        chars: usize,
    },
    /// A row failed and was left pending.
    RowFailed {
        /// Destination column.
        stage: String,
        /// Row key.
        row: i64,
        /// Error message.
        error: String,
    },
    /// A stage sweep ended.
    StageCompleted {
        /// Destination column.
        stage: String,
        /// Rows written.
        processed: usize,
        /// Rows that failed.
        failed: usize,
        /// Cycles run.
        cycles: usize,
        /// Claim attempts that failed with a non-fatal storage error.
        claim_errors: usize,
    },
    /// All stages finished.
    RunCompleted {
        /// Run identifier.
        run_id: Uuid,
        /// Rows written across all stages.
        processed: usize,
        /// Row failures across all stages.
        failed: usize,
        /// Wall-clock duration.
        duration_ms: u64,
    },
    /// The run stopped early because its token was cancelled.
    RunCancelled {
        /// Run identifier.
        run_id: Uuid,
        /// Cancellation reason.
        reason: String,
    },
}

impl ForgeEvent {
    /// Dotted event name, e.g. `stage.started`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::StageStarted { .. } => "stage.started",
            Self::RowCompleted { .. } => "row.completed",
            Self::RowFailed { .. } => "row.failed",
            Self::StageCompleted { .. } => "stage.completed",
            Self::RunCompleted { .. } => "run.completed",
            Self::RunCancelled { .. } => "run.cancelled",
        }
    }

    /// Event payload as JSON.
    #[must_use]
    pub fn data(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_and_payload() {
        let event = ForgeEvent::StageStarted {
            stage: "summary".into(),
            eligible: 10,
            completed: 4,
        };
        assert_eq!(event.event_type(), "stage.started");
        assert_eq!(
            event.data(),
            json!({"stage": "summary", "eligible": 10, "completed": 4})
        );
    }

    #[test]
    fn test_row_failed_payload() {
        let event = ForgeEvent::RowFailed {
            stage: "summary".into(),
            row: 3,
            error: "boom".into(),
        };
        assert_eq!(event.event_type(), "row.failed");
        assert_eq!(event.data()["row"], 3);
    }
}

//! Stage pipelines.
//!
//! This module provides:
//! - Stage spec parsing and column validation
//! - Retry policy for completion calls
//! - Row claiming with in-process leases
//! - Cycle pacing
//! - The pipeline executor and its run reports

mod claims;
mod executor;
mod pacing;
mod retry;
mod spec;
mod suggestions;
mod summary;

pub use claims::{claim_row, ClaimLease, ClaimRegistry};
pub use executor::PipelineExecutor;
pub use pacing::CyclePacer;
pub use retry::{
    BackoffStrategy, JitterStrategy, RetryClass, RetryConfig, RetryOutcome, RetryPolicy,
};
pub use spec::{
    parse_stage_spec, validate_columns, validate_pipeline_columns, StageDescriptor,
    DESTINATION_SEPARATOR, SOURCE_JOINER, SOURCE_SEPARATOR, STAGE_SEPARATOR,
};
pub use suggestions::{closest_match, edit_distance, suggestion_threshold};
pub use summary::{FailureRecord, RunSummary, SingleOutcome, StageReport};

//! # Dataforge
//!
//! Multi-stage LLM text pipelines over relational table rows.
//!
//! A pipeline is a chain of stages written as `source:destination`
//! segments, e.g. `chunk:summary,summary:analysis` or
//! `title+content:summary`. Each stage fills one destination column per row
//! by sending the row's source text, under the stage's system prompt, to a
//! chat completion endpoint. Dataforge provides:
//!
//! - **Stage spec parsing**: typed stage descriptors with column validation
//!   and "did you mean" suggestions
//! - **Completion client**: OpenAI-compatible chat requests with retry
//! - **Row store**: claim-one-row-at-a-time access to a PostgreSQL table
//!   (or an in-memory table for tests)
//! - **Pipeline executor**: single-row and worker-pool modes, paced cycles
//!   and cooperative cancellation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dataforge::prelude::*;
//! use std::sync::Arc;
//!
//! let config = ForgeConfig::from_env()?;
//! let store = Arc::new(PostgresRowStore::connect(&config.database).await?);
//! let executor = PipelineExecutor::from_config(store, &config)?
//!     .with_event_sink(Arc::new(LoggingEventSink::default()));
//!
//! let stages = parse_stage_spec("chunk:summary,summary:analysis")?;
//! let summary = executor.run_parallel("documents", &stages).await?;
//! println!("{} rows written", summary.total_processed());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod completion;
pub mod config;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod store;
pub mod testing;

pub use errors::{DataforgeError, DataforgeResult};
pub use pipeline::{parse_stage_spec, PipelineExecutor, StageDescriptor};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::completion::{ChatTransport, Completion, CompletionClient, HttpTransport};
    pub use crate::config::{CompletionConfig, DatabaseConfig, ExecutorConfig, ForgeConfig};
    pub use crate::errors::{
        CompletionError, DataforgeError, DataforgeResult, MalformedStageSpecError,
        MissingPromptError, StorageError, UnknownColumnError,
    };
    pub use crate::events::{
        CollectingEventSink, EventSink, ForgeEvent, LoggingEventSink, NoOpEventSink,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        parse_stage_spec, PipelineExecutor, RetryConfig, RunSummary, SingleOutcome,
        StageDescriptor, StageReport,
    };
    #[cfg(feature = "postgres")]
    pub use crate::store::PostgresRowStore;
    pub use crate::store::{InMemoryRowStore, RowStore};
}

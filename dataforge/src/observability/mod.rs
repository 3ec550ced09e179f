//! Tracing setup and span helpers.
//!
//! Library code only emits `tracing` events. Binaries and tests that want
//! output call [`init_tracing`] once; `RUST_LOG` overrides the default
//! directive.

use serde::{Deserialize, Serialize};
use tracing::{info_span, Span};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::errors::{DataforgeError, DataforgeResult};

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = DataforgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(DataforgeError::Config(format!("unknown log format '{other}'"))),
        }
    }
}

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Installs a global `tracing` subscriber.
///
/// `default_directive` (e.g. `"dataforge=info"`) applies when `RUST_LOG` is
/// unset. Fails if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat, default_directive: &str) -> DataforgeResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_target(false);

    let result = match format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    result.map_err(|e| DataforgeError::Config(format!("Failed to initialise tracing: {e}")))
}

/// Span covering one executor run.
#[must_use]
pub fn run_span(run_id: Uuid, table: &str) -> Span {
    info_span!("run", %run_id, table)
}

/// Span covering one stage sweep.
#[must_use]
pub fn stage_span(stage: &str) -> Span {
    info_span!("stage", stage)
}

/// Span covering one worker's share of a cycle.
#[must_use]
pub fn worker_span(worker: usize, cycle: usize) -> Span {
    info_span!("worker", worker, cycle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_init_twice_fails_second_time() {
        // Another test may have installed a subscriber already; either way
        // the second call in this test must fail.
        let _ = init_tracing(LogFormat::Json, "dataforge=debug");
        assert!(init_tracing(LogFormat::Pretty, "dataforge=info").is_err());
    }
}

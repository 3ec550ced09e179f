//! Minimum cycle duration enforcement.

use std::time::Duration;
use tokio::time::Instant;

/// Stretches each executor cycle to at least a configured duration.
///
/// If a cycle's work finishes early the pacer sleeps for the remainder, so
/// rows claimed faster than the completion endpoint can serve them do not
/// turn into a burst of requests.
#[derive(Debug, Clone, Copy)]
pub struct CyclePacer {
    min_cycle: Duration,
}

impl CyclePacer {
    /// Creates a pacer with the given minimum cycle duration.
    #[must_use]
    pub fn new(min_cycle: Duration) -> Self {
        Self { min_cycle }
    }

    /// The configured minimum cycle duration.
    #[must_use]
    pub fn min_cycle(&self) -> Duration {
        self.min_cycle
    }

    /// How long to wait after a cycle that took `elapsed`.
    #[must_use]
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.min_cycle.saturating_sub(elapsed)
    }

    /// Sleeps until `cycle_start + min_cycle`. Returns the time slept.
    pub async fn pace(&self, cycle_start: Instant) -> Duration {
        let wait = self.remaining(cycle_start.elapsed());
        if !wait.is_zero() {
            tracing::debug!(
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "Pacing cycle"
            );
            tokio::time::sleep(wait).await;
        }
        wait
    }
}

impl Default for CyclePacer {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

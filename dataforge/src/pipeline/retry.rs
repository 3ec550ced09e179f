//! Retry policy with configurable backoff and jitter.
//!
//! The policy owns three decisions: how many attempts to make, how long to
//! wait between them, and (through a caller-supplied classifier) whether a
//! given failure is worth retrying at all.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    #[default]
    Constant,
}

/// Jitter strategy to spread out retries from parallel workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the initial one.
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }
}

/// How a failure should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient; try again if attempts remain.
    Retryable,
    /// Permanent; stop immediately.
    Fatal,
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// The final result.
    pub result: Result<T, E>,
    /// Number of attempts made (1-based).
    pub attempts: usize,
}

impl<T, E> RetryOutcome<T, E> {
    /// Returns true if the final attempt succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// A reusable retry policy.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a policy from a config. A zero attempt budget is raised to one.
    #[must_use]
    pub fn new(mut config: RetryConfig) -> Self {
        config.max_attempts = config.max_attempts.max(1);
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Maximum attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.config.max_attempts
    }

    /// Delay before retry number `retry` (0 for the wait after the first
    /// failure), before jitter.
    #[must_use]
    pub fn base_delay(&self, retry: usize) -> Duration {
        let base = self.config.base_delay_ms;
        let max = self.config.max_delay_ms;
        let exponent = u32::try_from(retry).unwrap_or(u32::MAX);

        let delay = match self.config.backoff {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(exponent)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(exponent).saturating_add(1)),
            BackoffStrategy::Constant => base,
        };

        Duration::from_millis(delay.min(max))
    }

    fn jittered(&self, delay: Duration, previous: Option<Duration>) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let mut rng = rand::thread_rng();

        let jittered = match self.config.jitter {
            JitterStrategy::None => millis,
            JitterStrategy::Full => {
                if millis == 0 {
                    0
                } else {
                    rng.gen_range(0..=millis)
                }
            }
            JitterStrategy::Equal => {
                let half = millis / 2;
                if half == 0 {
                    millis
                } else {
                    half + rng.gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let base = self.config.base_delay_ms;
                let prev = previous
                    .map_or(base, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
                let upper = prev.saturating_mul(3).min(self.config.max_delay_ms);
                if upper <= base {
                    base
                } else {
                    rng.gen_range(base..=upper)
                }
            }
        };

        Duration::from_millis(jittered)
    }

    /// Runs `operation` until it succeeds, fails fatally, or the attempt
    /// budget is spent.
    ///
    /// `operation` receives the 1-based attempt number. `classify` decides
    /// whether a failure is retried.
    pub async fn run<T, E, F, Fut, C>(&self, mut operation: F, classify: C) -> RetryOutcome<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryClass,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        let mut previous_delay = None;

        loop {
            attempt += 1;
            match operation(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(err) => {
                    let class = classify(&err);
                    if class == RetryClass::Fatal || attempt >= self.config.max_attempts {
                        tracing::debug!(
                            attempt,
                            max_attempts = self.config.max_attempts,
                            fatal = class == RetryClass::Fatal,
                            error = %err,
                            "Giving up"
                        );
                        return RetryOutcome {
                            result: Err(err),
                            attempts: attempt,
                        };
                    }

                    let delay = self.jittered(self.base_delay(attempt - 1), previous_delay);
                    previous_delay = Some(delay);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Retrying after error"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self::new(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn always_retry(_: &String) -> RetryClass {
        RetryClass::Retryable
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.backoff, BackoffStrategy::Constant);
        assert_eq!(config.jitter, JitterStrategy::None);
    }

    #[test]
    fn test_zero_attempts_raised_to_one() {
        let policy = RetryPolicy::new(RetryConfig::new().with_max_attempts(0));
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_base_delay_strategies() {
        let exp = RetryPolicy::new(
            RetryConfig::new()
                .with_base_delay_ms(100)
                .with_backoff(BackoffStrategy::Exponential),
        );
        assert_eq!(exp.base_delay(0), Duration::from_millis(100));
        assert_eq!(exp.base_delay(1), Duration::from_millis(200));
        assert_eq!(exp.base_delay(2), Duration::from_millis(400));

        let linear = RetryPolicy::new(
            RetryConfig::new()
                .with_base_delay_ms(100)
                .with_backoff(BackoffStrategy::Linear),
        );
        assert_eq!(linear.base_delay(0), Duration::from_millis(100));
        assert_eq!(linear.base_delay(2), Duration::from_millis(300));

        let constant = RetryPolicy::new(RetryConfig::new().with_base_delay_ms(100));
        assert_eq!(constant.base_delay(5), Duration::from_millis(100));
    }

    #[test]
    fn test_base_delay_capped_at_max() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .with_base_delay_ms(1000)
                .with_max_delay_ms(5000)
                .with_backoff(BackoffStrategy::Exponential),
        );
        assert_eq!(policy.base_delay(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .with_base_delay_ms(100)
                .with_jitter(JitterStrategy::Full),
        );
        for _ in 0..20 {
            let delay = policy.jittered(Duration::from_millis(100), None);
            assert!(delay <= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_attempt_records_attempts() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let outcome = policy
            .run(
                move |attempt| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 3 {
                            Err(format!("transient failure {attempt}"))
                        } else {
                            Ok("done")
                        }
                    }
                },
                always_retry,
            )
            .await;

        assert_eq!(outcome.result, Ok("done"));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_budget_exactly() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let outcome: RetryOutcome<(), String> = policy
            .run(
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err("always fails".to_string()) }
                },
                always_retry,
            )
            .await;

        assert!(!outcome.is_ok());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_stops_immediately() {
        let policy = RetryPolicy::default();

        let outcome: RetryOutcome<(), String> = policy
            .run(
                |_| async { Err("400 bad request".to_string()) },
                |_| RetryClass::Fatal,
            )
            .await;

        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_attempts() {
        let policy = RetryPolicy::new(RetryConfig::new().with_base_delay_ms(1000));
        let start = tokio::time::Instant::now();

        let _: RetryOutcome<(), String> = policy
            .run(|_| async { Err("down".to_string()) }, always_retry)
            .await;

        // Two waits of one second between three attempts.
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }
}

//! Bounded retry for remote fetches.
//!
//! Attempts run one after another, never in parallel. The delay between
//! attempts is fixed by default; an exponential policy with optional jitter
//! can be plugged in instead. On the final failure the operation's own error
//! is returned unchanged.

use crate::config::{LogTarget, RetryDefaults};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum BackoffPolicy {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay multiplied by `factor` after each retry, capped at `max_delay`.
    Exponential {
        factor: f64,
        max_delay: Duration,
        /// Scale each delay by a random factor in `0.5..1.5`.
        jitter: bool,
    },
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    ///
    /// Zero behaves like one: the operation runs once.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub delay: Duration,
    /// Growth of the delay across retries.
    pub backoff: BackoffPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: RetryDefaults::ATTEMPTS,
            delay: RetryDefaults::DELAY,
            backoff: BackoffPolicy::Fixed,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed-delay retry, the behavior of `{ count, delay }` options.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: BackoffPolicy::Fixed,
        }
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the base delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Switch to exponential backoff with the default factor and cap.
    pub fn exponential(self, jitter: bool) -> Self {
        self.with_backoff(BackoffPolicy::Exponential {
            factor: RetryDefaults::EXPONENTIAL_FACTOR,
            max_delay: RetryDefaults::MAX_DELAY,
            jitter,
        })
    }

    /// Attempts actually made, treating zero as one.
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given failed attempt (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match &self.backoff {
            BackoffPolicy::Fixed => self.delay,
            BackoffPolicy::Exponential {
                factor,
                max_delay,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let delay_secs = self.delay.as_secs_f64() * factor.powi(exponent);
                let capped_secs = delay_secs.min(max_delay.as_secs_f64());

                let final_secs = if *jitter {
                    let jitter_factor = rand::rng().random_range(0.5..1.5);
                    (capped_secs * jitter_factor).min(max_delay.as_secs_f64())
                } else {
                    capped_secs
                };

                Duration::from_secs_f64(final_secs.max(0.0))
            }
        }
    }
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Number of delays waited between attempts.
    pub delays: u32,
    /// Total delay accumulated.
    pub total_delay: Duration,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Last error message if any attempt failed.
    pub last_error: Option<String>,
}

/// Retry an async operation according to `config`.
///
/// `should_retry` decides whether a given error is worth another attempt;
/// errors it rejects are returned immediately.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.effective_attempts();
    let mut stats = RetryStats::default();
    let mut attempt = 0;

    loop {
        stats.attempts = attempt + 1;

        match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!(
                        target: LogTarget::RETRY,
                        attempts = attempt + 1,
                        "operation succeeded after retry"
                    );
                }
                return (Ok(value), stats);
            }
            Err(e) => {
                stats.last_error = Some(e.to_string());

                if !should_retry(&e) {
                    debug!(target: LogTarget::RETRY, error = %e, "error is not retryable");
                    return (Err(e), stats);
                }

                if attempt + 1 >= max_attempts {
                    if max_attempts > 1 {
                        warn!(
                            target: LogTarget::RETRY,
                            attempts = max_attempts,
                            error = %e,
                            "all retry attempts exhausted"
                        );
                    }
                    return (Err(e), stats);
                }

                let delay = config.calculate_delay(attempt);
                stats.delays += 1;
                stats.total_delay += delay;

                warn!(
                    target: LogTarget::RETRY,
                    attempt = attempt + 1,
                    max_attempts,
                    error = %e,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "attempt failed, retrying"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Run `operation`, retrying every failure per `retry`.
///
/// With no config the operation runs exactly once.
pub async fn fetch_with_retry<F, Fut, T, E>(retry: Option<&RetryConfig>, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let single = RetryConfig::fixed(1, Duration::ZERO);
    let config = retry.unwrap_or(&single);
    let (result, _stats) = retry_async(config, operation, |_: &E| true).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn failing_until(successes_after: u32) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<u32, String>>) {
        let counter = Arc::new(AtomicU32::new(0));
        let calls = counter.clone();
        let operation = move || {
            let count = calls.fetch_add(1, Ordering::SeqCst);
            if count < successes_after {
                std::future::ready(Err(format!("failure {}", count + 1)))
            } else {
                std::future::ready(Ok(42))
            }
        };
        (counter, operation)
    }

    #[test]
    fn test_fixed_delay_is_constant() {
        let config = RetryConfig::fixed(5, Duration::from_millis(10));
        assert_eq!(config.calculate_delay(0), Duration::from_millis(10));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(10));
    }

    #[test]
    fn test_exponential_delay_no_jitter() {
        let config = RetryConfig::new()
            .with_delay(Duration::from_secs(1))
            .exponential(false);

        assert_eq!(config.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(config.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(config.calculate_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_exponential_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_delay(Duration::from_secs(10))
            .with_backoff(BackoffPolicy::Exponential {
                factor: 2.0,
                max_delay: Duration::from_secs(30),
                jitter: false,
            });

        assert_eq!(config.calculate_delay(3), Duration::from_secs(30));
    }

    #[test]
    fn test_exponential_delay_with_jitter_stays_in_range() {
        let config = RetryConfig::new()
            .with_delay(Duration::from_secs(2))
            .exponential(true);

        for _ in 0..20 {
            let delay = config.calculate_delay(0);
            assert!(
                delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3),
                "Delay {:?} should be between 1s and 3s",
                delay
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let config = RetryConfig::fixed(3, Duration::from_millis(10));
        let (counter, operation) = failing_until(2);

        let started = tokio::time::Instant::now();
        let (result, stats) = retry_async(&config, operation, |_: &String| true).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.delays, 2);
        assert_eq!(stats.total_delay, Duration::from_millis(20));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(stats.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_returns_original_error() {
        let config = RetryConfig::fixed(3, Duration::from_millis(10));
        let (counter, operation) = failing_until(u32::MAX);

        let (result, stats) = retry_async(&config, operation, |_: &String| true).await;

        assert_eq!(result.unwrap_err(), "failure 3");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(stats.delays, 2);
        assert!(!stats.success);
        assert_eq!(stats.last_error, Some("failure 3".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_fails_without_delay() {
        let config = RetryConfig::fixed(1, Duration::from_millis(10));
        let (counter, operation) = failing_until(u32::MAX);

        let started = tokio::time::Instant::now();
        let (result, stats) = retry_async(&config, operation, |_: &String| true).await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(stats.delays, 0);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_runs_once() {
        let config = RetryConfig::fixed(0, Duration::from_millis(10));
        let (counter, operation) = failing_until(u32::MAX);

        let (result, stats) = retry_async(&config, operation, |_: &String| true).await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(stats.attempts, 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_early() {
        let config = RetryConfig::fixed(3, Duration::from_millis(10));

        let (result, stats) = retry_async(
            &config,
            || async { Err::<i32, _>("permanent failure".to_string()) },
            |e: &String| !e.contains("permanent"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(stats.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_with_retry_without_config_calls_once() {
        let (counter, operation) = failing_until(1);

        let result = fetch_with_retry(None, operation).await;

        assert_eq!(result.unwrap_err(), "failure 1");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_with_retry_recovers() {
        let config = RetryConfig::fixed(3, Duration::from_millis(10));
        let (counter, operation) = failing_until(1);

        let result = fetch_with_retry(Some(&config), operation).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}

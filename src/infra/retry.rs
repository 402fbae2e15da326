//! Bounded retry policy for ledger submissions
//!
//! Provides retry logic for transient failures with:
//! - A hard attempt bound
//! - Fixed or growing backoff, capped
//! - Optional jitter to spread out retries
//! - Custom retry predicates
//!
//! Delays go through `tokio::time::sleep`, so tests drive them with a paused clock.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt)
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps multiplier growth)
    pub max_delay: Duration,
    /// Multiplier for backoff (1.0 = fixed interval, 2.0 = double each time)
    pub multiplier: f64,
    /// Jitter factor (0.0-1.0), 0.0 keeps delays deterministic
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::close_submission()
    }
}

impl RetryConfig {
    /// Policy for close confirmations: 15 attempts, one second apart.
    pub fn close_submission() -> Self {
        Self::fixed(14, Duration::from_secs(1))
    }

    /// Fixed interval between retries, no jitter
    pub fn fixed(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: interval,
            max_delay: interval,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Total attempts allowed, including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Set the total number of attempts (values below 1 are raised to 1)
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_retries = attempts.max(1) - 1;
        self
    }

    /// Set the backoff multiplier (values below 1.0 are raised to 1.0)
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter factor
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for a given retry (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter > 0.0 {
            let jitter_range = capped_delay * self.jitter;
            let mut rng = rand::thread_rng();
            let jitter_offset = rng.gen_range(-jitter_range..=jitter_range);
            (capped_delay + jitter_offset).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// The final result (success or last error)
    pub result: Result<T, E>,
    /// Number of attempts made (1 = succeeded on first try)
    pub attempts: u32,
    /// Total time spent, including delays
    pub total_duration: Duration,
}

/// A retry executor that runs operations under a [`RetryConfig`]
#[derive(Debug, Clone)]
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run an operation, retrying only errors accepted by `should_retry`.
    ///
    /// Stops at the first success, the first non-retryable error, or when the
    /// attempt bound is reached; the last error is returned in that case.
    pub async fn run_with_predicate<F, Fut, T, E, P>(
        &self,
        context: &str,
        mut operation: F,
        should_retry: P,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let start = tokio::time::Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!(
                            context = context,
                            attempts = attempts,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Operation succeeded after retries"
                        );
                    }
                    return RetryResult {
                        result: Ok(value),
                        attempts,
                        total_duration: start.elapsed(),
                    };
                }
                Err(e) => {
                    if !should_retry(&e) {
                        return RetryResult {
                            result: Err(e),
                            attempts,
                            total_duration: start.elapsed(),
                        };
                    }

                    if attempts > self.config.max_retries {
                        tracing::warn!(
                            context = context,
                            attempts = attempts,
                            error = %e,
                            "Operation failed after all retries exhausted"
                        );
                        return RetryResult {
                            result: Err(e),
                            attempts,
                            total_duration: start.elapsed(),
                        };
                    }

                    let delay = self.config.delay_for_attempt(attempts - 1);

                    tracing::warn!(
                        context = context,
                        attempt = attempts,
                        max_attempts = self.config.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Operation failed, will retry"
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

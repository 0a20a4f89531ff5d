//! Retry with exponential backoff for remote sink calls.
//!
//! Every remote call waits `min_call_interval` before each attempt, the
//! first one included, so bursts never reach the remote API. Only errors
//! classified as transient by [`SinkError::is_retryable`] are retried.

use crate::error::SinkError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Lower and upper bound of the jitter factor (±25%).
const JITTER_RANGE: (f64, f64) = (0.75, 1.25);

/// Backoff and rate-limit settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Growth factor between consecutive retries
    pub multiplier: f64,
    /// Upper bound for any single backoff delay
    pub max_delay: Duration,
    /// Randomize each delay by ±25%
    pub jitter: bool,
    /// Pause before every attempt, including the first
    pub min_call_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
            min_call_interval: Duration::from_secs(1),
        }
    }
}

/// What a successful call cost.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Backoff delays slept between attempts
    pub delays: Vec<Duration>,
}

impl RetryStats {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// A call that failed for good.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{operation} failed after {attempts} attempt(s): {source}")]
pub struct RetryError {
    pub operation: String,
    pub attempts: u32,
    /// The last error was retryable but attempts ran out
    pub exhausted: bool,
    #[source]
    pub source: SinkError,
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let cap = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Backoff before retry number `retry`, jittered when enabled.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.backoff_delay(retry);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range(JITTER_RANGE.0..=JITTER_RANGE.1);
        delay.mul_f64(factor)
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> Result<(T, RetryStats), RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SinkError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut stats = RetryStats::default();

        loop {
            if !self.min_call_interval.is_zero() {
                tokio::time::sleep(self.min_call_interval).await;
            }
            stats.attempts += 1;

            match call().await {
                Ok(value) => {
                    if stats.attempts > 1 {
                        tracing::info!(
                            operation,
                            attempts = stats.attempts,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok((value, stats));
                }
                Err(err) if err.is_retryable() && stats.attempts < max_attempts => {
                    let delay = self.delay_for(stats.attempts);
                    tracing::warn!(
                        operation,
                        attempt = stats.attempts,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, retrying"
                    );
                    stats.delays.push(delay);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    let exhausted = err.is_retryable();
                    tracing::error!(
                        operation,
                        attempts = stats.attempts,
                        exhausted,
                        error = %err,
                        "Operation failed"
                    );
                    return Err(RetryError {
                        operation: operation.to_string(),
                        attempts: stats.attempts,
                        exhausted,
                        source: err,
                    });
                }
            }
        }
    }
}

//! Retry with exponential backoff and jitter.
//!
//! ```text
//! delay(attempt) = min(base * multiplier^attempt, max) ± delay * jitter_factor
//! ```
//!
//! Only retryable categories (network, rate limit, service unavailable,
//! timeout) are retried. Circuit-open fast failures are returned as-is.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::{Result, SearchError};

use super::classify::classify;
use super::metrics::MetricsRecorder;

/// Runs an operation until it succeeds, fails permanently, or runs out of
/// attempts.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl RetryExecutor {
    /// Create a retry executor after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Config`] if the policy is invalid.
    pub fn new(config: RetryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            metrics: None,
        })
    }

    /// Count retries on `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The active policy.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff before retry number `attempt + 1`, where `attempt` is the
    /// zero-based index of the attempt that just failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay_ms(attempt);
        let jitter = if self.config.jitter_factor > 0.0 {
            nominal * self.config.jitter_factor * rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        Duration::from_secs_f64((nominal + jitter).max(0.0) / 1_000.0)
    }

    fn nominal_delay_ms(&self, attempt: u32) -> f64 {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let grown = self.config.base_delay_ms as f64 * self.config.backoff_multiplier.powi(exponent);
        grown.min(self.config.max_delay_ms as f64)
    }

    /// Run `op`, retrying retryable failures.
    ///
    /// Each attempt is bounded by the policy's `timeout_ms`; an attempt that
    /// exceeds it fails with [`SearchError::Timeout`].
    ///
    /// # Errors
    ///
    /// Returns the last error once it is non-retryable or `max_retries`
    /// retries have been spent.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = match self.config.attempt_timeout() {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(SearchError::Timeout(format!(
                        "attempt {} exceeded {}ms",
                        attempt + 1,
                        limit.as_millis()
                    ))),
                },
                None => op().await,
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if error.is_circuit_open() {
                return Err(error);
            }

            let classified = classify(&error);
            if !classified.retryable || attempt >= self.config.max_retries {
                tracing::debug!(
                    attempts = attempt + 1,
                    category = %classified.category,
                    "giving up after final attempt"
                );
                return Err(error);
            }

            let delay = self.delay_for_attempt(attempt);
            tracing::debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                category = %classified.category,
                "attempt failed, backing off"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_retry();
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

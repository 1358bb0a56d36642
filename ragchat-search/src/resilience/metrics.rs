//! Per-executor operation metrics and the external telemetry sink.
//!
//! [`MetricsRecorder`] keeps the aggregate [`OperationMetrics`] for one
//! executor. [`MetricsSink`] is the seam to whatever telemetry backend the
//! application runs; the default [`NoopMetricsSink`] discards everything.
//!
//! # Thread Safety
//!
//! All methods take `&self`. Sink implementors use interior mutability as
//! needed and must not panic: the executor calls them inline.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classify::{ClassifiedError, ErrorCategory};

/// Smoothing factor of the latency moving average.
pub const LATENCY_EMA_ALPHA: f64 = 0.1;

/// Aggregate counters for one executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    /// Calls to `execute`.
    pub total_requests: u64,
    /// Calls that returned a primary (non-fallback) value.
    pub successful_requests: u64,
    /// Calls that returned an error to the caller.
    pub failed_requests: u64,
    /// Retries beyond the first attempt.
    pub retried_requests: u64,
    /// CLOSED/HALF_OPEN → OPEN transitions.
    pub circuit_breaker_trips: u64,
    /// Failures answered by the fallback chain.
    pub fallback_activations: u64,
    /// Exponential moving average of successful call latency, in ms.
    pub average_latency_ms: f64,
    /// Failure histogram.
    pub errors_by_category: BTreeMap<ErrorCategory, u64>,
    /// Time of the last update, if any.
    pub last_updated: Option<DateTime<Utc>>,
}

impl OperationMetrics {
    /// Successful share of all requests, `1.0` before any traffic.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            (self.successful_requests + self.fallback_activations) as f64
                / self.total_requests as f64
        }
    }
}

/// Interior-mutable holder of [`OperationMetrics`].
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    inner: Mutex<OperationMetrics>,
}

impl MetricsRecorder {
    /// Create a zeroed recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an incoming request.
    pub fn record_request(&self) {
        self.update(|m| m.total_requests += 1);
    }

    /// Count a success and fold `latency` into the moving average. The
    /// first sample seeds the average.
    pub fn record_success(&self, latency: Duration) {
        let sample = latency.as_secs_f64() * 1_000.0;
        self.update(|m| {
            m.average_latency_ms = if m.successful_requests == 0 {
                sample
            } else {
                m.average_latency_ms * (1.0 - LATENCY_EMA_ALPHA) + sample * LATENCY_EMA_ALPHA
            };
            m.successful_requests += 1;
        });
    }

    /// Count a failure returned to the caller.
    pub fn record_failure(&self) {
        self.update(|m| m.failed_requests += 1);
    }

    /// Count a classified error in the histogram.
    pub fn record_error(&self, category: ErrorCategory) {
        self.update(|m| *m.errors_by_category.entry(category).or_insert(0) += 1);
    }

    /// Count one retry.
    pub fn record_retry(&self) {
        self.update(|m| m.retried_requests += 1);
    }

    /// Count one circuit trip.
    pub fn record_trip(&self) {
        self.update(|m| m.circuit_breaker_trips += 1);
    }

    /// Count one fallback activation.
    pub fn record_fallback(&self) {
        self.update(|m| m.fallback_activations += 1);
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> OperationMetrics {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Zero every counter.
    pub fn reset(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = OperationMetrics::default();
    }

    fn update(&self, f: impl FnOnce(&mut OperationMetrics)) {
        let mut metrics = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut metrics);
        metrics.last_updated = Some(Utc::now());
    }
}

/// Fire-and-forget telemetry interface.
///
/// Implementations can forward to Prometheus, StatsD or a database. None of
/// the methods can fail; errors inside the sink stay inside the sink.
pub trait MetricsSink: Send + Sync {
    /// Latency of one successful provider call.
    fn record_latency(&self, provider: &str, latency_ms: u64);

    /// One successful provider call.
    fn record_success(&self, provider: &str);

    /// One failed provider call.
    fn record_error(&self, provider: &str, error: &ClassifiedError);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_latency(&self, _provider: &str, _latency_ms: u64) {}

    fn record_success(&self, _provider: &str) {}

    fn record_error(&self, _provider: &str, _error: &ClassifiedError) {}
}

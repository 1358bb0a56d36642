//! Resilience primitives: classification, retry, circuit breaking,
//! fallback chains, degradation tracking and the executor composing them.

pub mod circuit_breaker;
pub mod classify;
pub mod degradation;
pub mod executor;
pub mod fallback;
pub mod fallback_cache;
pub mod metrics;
pub mod retry;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitSnapshot, CircuitState};
pub use classify::{classify, classify_message, ClassifiedError, ErrorCategory};
pub use degradation::{DegradationStatus, DegradationTracker, ServiceLevel};
pub use executor::{ExecutionContext, FaultTolerantExecutor, Served};
pub use fallback::{
    FallbackManager, FallbackOutcome, FallbackPayload, ServiceProvider, SharedProvider,
};
pub use fallback_cache::{CacheEntry, CacheStats, FallbackCache};
pub use metrics::{MetricsRecorder, MetricsSink, NoopMetricsSink, OperationMetrics};
pub use retry::RetryExecutor;

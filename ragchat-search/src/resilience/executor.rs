//! Fault-tolerant execution of a single protected call.
//!
//! [`FaultTolerantExecutor`] composes the resilience primitives around one
//! operation:
//!
//! ```text
//! degradation gate → circuit breaker → retry → op
//!                                     ↘ on eligible failure: fallback chain
//! ```
//!
//! Every call updates the executor's [`OperationMetrics`], the shared
//! [`DegradationTracker`] and the [`MetricsSink`].

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ResilienceConfig;
use crate::error::{Result, SearchError};

use super::circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
use super::classify::{classify, ErrorCategory};
use super::degradation::{DegradationTracker, ServiceLevel};
use super::fallback::{FallbackManager, FallbackOutcome, FallbackPayload, SharedProvider};
use super::metrics::{MetricsRecorder, MetricsSink, NoopMetricsSink, OperationMetrics};
use super::retry::RetryExecutor;

/// Per-call options.
#[derive(Debug, Clone)]
pub struct ExecutionContext<A> {
    /// Operation name for logs and fallback resolution.
    pub operation_name: String,
    /// Arguments handed to fallback providers.
    pub args: A,
    /// Key under which successful values are cached and looked up.
    pub cache_key: Option<String>,
    /// Skip the circuit breaker.
    pub bypass_circuit_breaker: bool,
    /// Make exactly one attempt.
    pub bypass_retry: bool,
    /// Most degraded level at which this call may still run.
    pub required_level: Option<ServiceLevel>,
}

impl<A> ExecutionContext<A> {
    /// Context with default options.
    pub fn new(operation_name: impl Into<String>, args: A) -> Self {
        Self {
            operation_name: operation_name.into(),
            args,
            cache_key: None,
            bypass_circuit_breaker: false,
            bypass_retry: false,
            required_level: None,
        }
    }

    /// Cache successful values under `key`.
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Skip the circuit breaker for this call.
    pub fn bypass_circuit_breaker(mut self) -> Self {
        self.bypass_circuit_breaker = true;
        self
    }

    /// Make a single attempt.
    pub fn bypass_retry(mut self) -> Self {
        self.bypass_retry = true;
        self
    }

    /// Refuse to run when the service level is worse than `level`.
    pub fn with_required_level(mut self, level: ServiceLevel) -> Self {
        self.required_level = Some(level);
        self
    }
}

/// Where an executor's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    /// The protected operation succeeded.
    Primary,
    /// The operation failed and the fallback chain resolved the call.
    Fallback(FallbackOutcome),
}

impl Served {
    /// Whether the value is real content, from the operation or a
    /// fallback, rather than an empty placeholder.
    pub fn is_answer(self) -> bool {
        match self {
            Self::Primary => true,
            Self::Fallback(outcome) => outcome.is_answer(),
        }
    }
}

/// Resilience wrapper for one named service.
pub struct FaultTolerantExecutor<A, T> {
    name: String,
    config: ResilienceConfig,
    retry: RetryExecutor,
    breaker: Arc<CircuitBreaker>,
    fallback: FallbackManager<A, T>,
    degradation: Arc<DegradationTracker>,
    metrics: Arc<MetricsRecorder>,
    sink: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<A, T> fmt::Debug for FaultTolerantExecutor<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultTolerantExecutor")
            .field("name", &self.name)
            .field("fallback", &self.fallback)
            .field("level", &self.degradation.level())
            .finish_non_exhaustive()
    }
}

impl<A, T> FaultTolerantExecutor<A, T>
where
    A: Send + Sync + 'static,
    T: FallbackPayload,
{
    /// Create an executor for `name` reporting into `degradation`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Config`] if any section of `config` is invalid.
    pub fn new(
        name: impl Into<String>,
        config: ResilienceConfig,
        degradation: Arc<DegradationTracker>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(MetricsRecorder::new());
        let retry = RetryExecutor::new(config.retry.clone())?.with_metrics(Arc::clone(&metrics));
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())?);
        let fallback = FallbackManager::new(config.fallback.clone())?;
        Ok(Self {
            name: name.into(),
            config,
            retry,
            breaker,
            fallback,
            degradation,
            metrics,
            sink: Arc::new(NoopMetricsSink),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Share a breaker with other executors. Circuits stay keyed by
    /// executor name.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    /// Report provider outcomes to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Protected service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a provider to the fallback chain.
    pub fn add_provider(&self, provider: SharedProvider<A, T>) {
        self.fallback.add_provider(provider);
    }

    /// The fallback chain.
    pub fn fallback(&self) -> &FallbackManager<A, T> {
        &self.fallback
    }

    /// The shared degradation tracker.
    pub fn degradation(&self) -> &Arc<DegradationTracker> {
        &self.degradation
    }

    /// Run `op` under the full resilience stack.
    ///
    /// # Errors
    ///
    /// - [`SearchError::Degraded`] when the service level forbids the call.
    /// - The operation's error when it is not eligible for fallback, or
    ///   when the fallback chain could not answer either.
    pub async fn execute<F, Fut>(&self, ctx: ExecutionContext<A>, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_traced(ctx, op).await.map(|(value, _)| value)
    }

    /// [`FaultTolerantExecutor::execute`], also reporting where the value
    /// came from.
    ///
    /// A failure that the chain could only paper over with an empty
    /// placeholder counts as a failed request, not a fallback activation.
    ///
    /// # Errors
    ///
    /// As for [`FaultTolerantExecutor::execute`].
    pub async fn execute_traced<F, Fut>(&self, ctx: ExecutionContext<A>, op: F) -> Result<(T, Served)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.metrics.record_request();

        if let Some(required) = ctx.required_level {
            if !self.degradation.can_perform_operation(required) {
                let current = self.degradation.level();
                tracing::debug!(
                    service = %self.name,
                    operation = %ctx.operation_name,
                    %required,
                    %current,
                    "operation blocked by degradation level"
                );
                let err = SearchError::Degraded { required, current };
                self.metrics.record_error(ErrorCategory::ServiceUnavailable);
                self.metrics.record_failure();
                return Err(err);
            }
        }

        let started = Instant::now();
        let (outcome, tripped) = self.run_protected(&ctx, op).await;

        match outcome {
            Ok(value) => {
                self.on_success(&ctx, &value, started.elapsed());
                Ok((value, Served::Primary))
            }
            Err(err) => self.on_failure(&ctx, err, tripped).await,
        }
    }

    async fn run_protected<F, Fut>(&self, ctx: &ExecutionContext<A>, mut op: F) -> (Result<T>, bool)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempt = async {
            if ctx.bypass_retry {
                op().await
            } else {
                self.retry.execute(&mut op).await
            }
        };

        if ctx.bypass_circuit_breaker {
            return (attempt.await, false);
        }
        self.breaker.call(&self.name, || attempt).await
    }

    fn on_success(&self, ctx: &ExecutionContext<A>, value: &T, latency: Duration) {
        self.metrics.record_success(latency);
        self.sink
            .record_latency(&self.name, u64::try_from(latency.as_millis()).unwrap_or(u64::MAX));
        self.sink.record_success(&self.name);

        if self.config.fallback.enable_caching {
            if let Some(key) = &ctx.cache_key {
                self.fallback.cache().set(key.clone(), value.clone(), None);
            }
        }
        if self.degradation.is_degraded() {
            self.degradation.recover(1);
        }
    }

    async fn on_failure(
        &self,
        ctx: &ExecutionContext<A>,
        err: SearchError,
        tripped: bool,
    ) -> Result<(T, Served)> {
        let classified = classify(&err);
        self.metrics.record_error(classified.category);
        self.sink.record_error(&self.name, &classified);

        if tripped {
            self.metrics.record_trip();
            self.degradation
                .degrade(format!("circuit opened for {}", self.name), None);
        } else if !err.is_circuit_open() && classified.category.triggers_degradation() {
            self.degradation
                .degrade(format!("{}: {classified}", self.name), None);
        }

        if classified.category.is_fallback_eligible() {
            match self
                .fallback
                .execute_traced(&ctx.operation_name, &ctx.args, ctx.cache_key.as_deref())
                .await
            {
                Ok((value, outcome)) if outcome.is_answer() => {
                    tracing::info!(
                        service = %self.name,
                        operation = %ctx.operation_name,
                        category = %classified.category,
                        ?outcome,
                        "primary failed, answered by fallback"
                    );
                    self.metrics.record_fallback();
                    return Ok((value, Served::Fallback(outcome)));
                }
                Ok((value, outcome)) => {
                    tracing::warn!(
                        service = %self.name,
                        operation = %ctx.operation_name,
                        error = %classified,
                        "operation failed, serving empty placeholder"
                    );
                    self.metrics.record_failure();
                    return Ok((value, Served::Fallback(outcome)));
                }
                Err(fallback_err) => {
                    tracing::debug!(
                        service = %self.name,
                        error = %fallback_err,
                        "fallback chain could not answer"
                    );
                }
            }
        }

        tracing::warn!(
            service = %self.name,
            operation = %ctx.operation_name,
            error = %classified,
            "operation failed"
        );
        self.metrics.record_failure();
        Err(err)
    }

    /// Copy of the aggregate counters.
    pub fn metrics(&self) -> OperationMetrics {
        self.metrics.snapshot()
    }

    /// Zero the aggregate counters.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Circuit state of this service.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state(&self.name)
    }

    /// Circuit snapshot of this service, once it has been called.
    pub fn circuit_snapshot(&self) -> Option<CircuitSnapshot> {
        self.breaker.snapshot(&self.name)
    }

    /// Poll the fallback providers and recover one degradation step when
    /// at least half of them are healthy.
    pub async fn check_health(&self) -> Vec<(String, bool)> {
        let report = self.fallback.health_check_all().await;
        if report.is_empty() {
            return report;
        }
        let healthy = report.iter().filter(|(_, ok)| *ok).count();
        tracing::debug!(service = %self.name, healthy, total = report.len(), "health poll");
        if healthy * 2 >= report.len() && self.degradation.is_degraded() {
            self.degradation.recover(1);
        }
        report
    }

    /// Start the health poll and the fallback cache sweep.
    ///
    /// Tasks hold only a weak reference to the executor and stop on
    /// [`FaultTolerantExecutor::shutdown`].
    pub fn start_background_tasks(self: &Arc<Self>) {
        let mut handles = Vec::new();

        if self.config.health_check.enabled {
            let weak = Arc::downgrade(self);
            let cancel = self.cancel.clone();
            let interval = Duration::from_millis(self.config.health_check.interval_ms);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let Some(executor) = weak.upgrade() else { break };
                            executor.check_health().await;
                        }
                    }
                }
            }));
        }

        if self.config.fallback.enable_caching {
            handles.push(
                Arc::clone(self.fallback.cache())
                    .spawn_sweeper(self.config.fallback.sweep_interval(), self.cancel.child_token()),
            );
        }

        tracing::debug!(service = %self.name, tasks = handles.len(), "background tasks started");
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
    }

    /// Stop background tasks and wait for them to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(service = %self.name, error = %err, "background task ended abnormally");
            }
        }
    }
}

//! Per-service circuit breaker with a rolling failure window.
//!
//! Each protected service name has an independent circuit. Failures are
//! counted within a monitor window; once the window holds enough calls and
//! enough failures, the circuit trips and calls fail fast. After the
//! recovery timeout a limited number of trial calls are admitted; enough
//! consecutive trial successes close the circuit and any trial failure
//! re-opens it.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐ failures ≥ threshold ┌────────┐  recovery   ┌──────────┐
//! │ Closed ├─────────────────────►│  Open  ├────────────►│ HalfOpen │
//! └───▲────┘ (with throughput)    └────────┘   timeout   └────┬─────┘
//!     │                               ▲                       │
//!     │  success_threshold successes  │  any failure          │
//!     └───────────────────────────────┴───────────────────────┘
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::{Result, SearchError};

/// Circuit state for a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow through; failures are counted.
    Closed,
    /// Calls are rejected until the recovery timeout elapses.
    Open,
    /// A limited number of trial calls decide between closing and re-opening.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

#[derive(Debug)]
struct ServiceCircuit {
    state: CircuitState,
    /// Admission times of closed-state calls inside the monitor window.
    calls: VecDeque<Instant>,
    /// Failure times inside the monitor window, or since the trip.
    failures: VecDeque<Instant>,
    success_count: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    trials_in_flight: u32,
}

fn count(times: &VecDeque<Instant>) -> u32 {
    u32::try_from(times.len()).unwrap_or(u32::MAX)
}

fn evict_before(times: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while times
        .front()
        .is_some_and(|at| now.duration_since(*at) >= window)
    {
        times.pop_front();
    }
}

impl ServiceCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            calls: VecDeque::new(),
            failures: VecDeque::new(),
            success_count: 0,
            last_failure_at: None,
            opened_at: None,
            trials_in_flight: 0,
        }
    }

    /// Drop calls and failures that have slid out of the window.
    fn slide_window(&mut self, now: Instant, window: Duration) {
        evict_before(&mut self.calls, now, window);
        evict_before(&mut self.failures, now, window);
    }

    fn trip(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.success_count = 0;
        self.trials_in_flight = 0;
    }

    /// Apply time-driven transitions: the window slides while closed and
    /// open moves to half-open once recovery has elapsed.
    fn refresh(&mut self, now: Instant, window: Duration, recovery: Duration) {
        match self.state {
            CircuitState::Closed => self.slide_window(now, window),
            CircuitState::Open => {
                let recovered = self
                    .opened_at
                    .is_none_or(|at| now.duration_since(at) >= recovery);
                if recovered {
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    self.trials_in_flight = 0;
                }
            }
            CircuitState::HalfOpen => {}
        }
    }
}

/// Point-in-time view of one circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    /// Protected service name.
    pub service: String,
    /// Current state.
    pub state: CircuitState,
    /// Failures in the trailing window (closed) or since the trip.
    pub failure_count: u32,
    /// Consecutive half-open successes.
    pub success_count: u32,
    /// Calls admitted in the trailing window.
    pub total_calls: u32,
    /// Milliseconds since the most recent failure.
    pub last_failure_ms_ago: Option<u64>,
}

/// Breaker for any number of named services.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    services: Mutex<HashMap<String, ServiceCircuit>>,
}

impl CircuitBreaker {
    /// Create a breaker after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Config`] if the thresholds are invalid.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            services: Mutex::new(HashMap::new()),
        })
    }

    /// Active thresholds.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.config.monitor_window_ms)
    }

    fn recovery(&self) -> Duration {
        Duration::from_millis(self.config.recovery_timeout_ms)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ServiceCircuit>> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask permission to call `service`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::CircuitOpen`] while the circuit is open, or
    /// while it is half-open and every trial slot is taken.
    pub fn acquire(&self, service: &str) -> Result<CallPermit<'_>> {
        let now = Instant::now();
        let mut services = self.lock();
        let circuit = services
            .entry(service.to_string())
            .or_insert_with(ServiceCircuit::new);
        circuit.refresh(now, self.window(), self.recovery());

        let trial = match circuit.state {
            CircuitState::Closed => {
                circuit.calls.push_back(now);
                false
            }
            CircuitState::HalfOpen if circuit.trials_in_flight < self.config.half_open_max_calls => {
                circuit.trials_in_flight += 1;
                tracing::debug!(service, "admitting half-open trial call");
                true
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                return Err(SearchError::CircuitOpen {
                    service: service.to_string(),
                });
            }
        };

        Ok(CallPermit {
            breaker: self,
            service: service.to_string(),
            trial,
            settled: false,
        })
    }

    /// Run `op` under the breaker for `service`.
    ///
    /// Returns the operation's own result together with whether this call
    /// tripped the circuit.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::CircuitOpen`] without invoking `op` when the
    /// call is rejected, otherwise whatever `op` returns.
    pub async fn call<T, F, Fut>(&self, service: &str, op: F) -> (Result<T>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = match self.acquire(service) {
            Ok(permit) => permit,
            Err(err) => return (Err(err), false),
        };
        match op().await {
            Ok(value) => {
                permit.success();
                (Ok(value), false)
            }
            Err(err) => {
                let tripped = permit.failure();
                (Err(err), tripped)
            }
        }
    }

    fn settle_success(&self, service: &str, trial: bool) {
        let mut services = self.lock();
        let Some(circuit) = services.get_mut(service) else {
            return;
        };
        if !trial || circuit.state != CircuitState::HalfOpen {
            return;
        }
        circuit.trials_in_flight = circuit.trials_in_flight.saturating_sub(1);
        circuit.success_count += 1;
        if circuit.success_count >= self.config.success_threshold {
            circuit.state = CircuitState::Closed;
            circuit.success_count = 0;
            circuit.opened_at = None;
            circuit.calls.clear();
            circuit.failures.clear();
            tracing::info!(service, "circuit closed");
        }
    }

    fn settle_failure(&self, service: &str, trial: bool) -> bool {
        let now = Instant::now();
        let mut services = self.lock();
        let Some(circuit) = services.get_mut(service) else {
            return false;
        };
        circuit.last_failure_at = Some(now);
        match (circuit.state, trial) {
            (CircuitState::Closed, false) => {
                circuit.failures.push_back(now);
                circuit.slide_window(now, self.window());
                let failures = count(&circuit.failures);
                let calls = count(&circuit.calls);
                let tripped = failures >= self.config.failure_threshold
                    && calls >= self.config.minimum_throughput;
                if tripped {
                    tracing::warn!(
                        service,
                        failures,
                        calls,
                        "circuit opened"
                    );
                    circuit.trip(now);
                }
                tripped
            }
            (CircuitState::HalfOpen, true) => {
                tracing::warn!(service, "half-open trial failed, circuit re-opened");
                circuit.failures.push_back(now);
                circuit.trip(now);
                true
            }
            _ => false,
        }
    }

    fn release_trial(&self, service: &str) {
        let mut services = self.lock();
        if let Some(circuit) = services.get_mut(service) {
            if circuit.state == CircuitState::HalfOpen {
                circuit.trials_in_flight = circuit.trials_in_flight.saturating_sub(1);
            }
        }
    }

    /// Current state of `service`, applying any pending time-driven
    /// transition. Unknown services are closed.
    pub fn state(&self, service: &str) -> CircuitState {
        let now = Instant::now();
        let mut services = self.lock();
        match services.get_mut(service) {
            Some(circuit) => {
                circuit.refresh(now, self.window(), self.recovery());
                circuit.state
            }
            None => CircuitState::Closed,
        }
    }

    /// Snapshot of `service`, or `None` if it has never been called.
    pub fn snapshot(&self, service: &str) -> Option<CircuitSnapshot> {
        let now = Instant::now();
        let mut services = self.lock();
        let circuit = services.get_mut(service)?;
        circuit.refresh(now, self.window(), self.recovery());
        Some(Self::describe(service, circuit, now))
    }

    /// Snapshots of every tracked service, sorted by name.
    pub fn health_report(&self) -> Vec<CircuitSnapshot> {
        let now = Instant::now();
        let (window, recovery) = (self.window(), self.recovery());
        let mut services = self.lock();
        let mut report: Vec<CircuitSnapshot> = services
            .iter_mut()
            .map(|(name, circuit)| {
                circuit.refresh(now, window, recovery);
                Self::describe(name, circuit, now)
            })
            .collect();
        report.sort_by(|a, b| a.service.cmp(&b.service));
        report
    }

    fn describe(service: &str, circuit: &ServiceCircuit, now: Instant) -> CircuitSnapshot {
        CircuitSnapshot {
            service: service.to_string(),
            state: circuit.state,
            failure_count: count(&circuit.failures),
            success_count: circuit.success_count,
            total_calls: count(&circuit.calls),
            last_failure_ms_ago: circuit
                .last_failure_at
                .map(|at| now.duration_since(at).as_millis() as u64),
        }
    }

    /// Forget one service; it starts closed on its next call.
    pub fn reset_service(&self, service: &str) {
        self.lock().remove(service);
    }

    /// Forget every service.
    pub fn reset(&self) {
        self.lock().clear();
    }
}

/// Admission to call a service once.
///
/// Settle it with [`CallPermit::success`] or [`CallPermit::failure`].
/// Dropping an unsettled trial permit frees its half-open slot without
/// counting an outcome.
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    service: String,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this permit is a half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Record a successful call.
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle_success(&self.service, self.trial);
    }

    /// Record a failed call. Returns `true` if it tripped the circuit.
    pub fn failure(mut self) -> bool {
        self.settled = true;
        self.breaker.settle_failure(&self.service, self.trial)
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial(&self.service);
        }
    }
}

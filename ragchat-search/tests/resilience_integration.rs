//! Integration tests for the fault-tolerant executor through the public API.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ragchat_search::{
    CircuitBreakerConfig, CircuitState, DegradationTracker, ExecutionContext, FallbackConfig,
    FallbackMode, FaultTolerantExecutor, ResilienceConfig, RetryConfig, SearchError,
    ServiceLevel, ServiceProvider,
};

type Docs = Vec<String>;

struct Provider {
    name: &'static str,
    priority: u32,
    available: bool,
    docs: Option<Docs>,
    calls: AtomicU32,
}

impl Provider {
    fn new(name: &'static str, priority: u32, available: bool, docs: Option<&[&str]>) -> Arc<Self> {
        Arc::new(Self {
            name,
            priority,
            available,
            docs: docs.map(|d| d.iter().map(|s| (*s).to_string()).collect()),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ServiceProvider<String, Docs> for Provider {
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn execute(&self, _query: &String) -> Result<Option<Docs>, SearchError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.docs.clone())
    }
}

fn config(mode: FallbackMode) -> ResilienceConfig {
    ResilienceConfig {
        retry: RetryConfig {
            max_retries: 1,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            ..Default::default()
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            minimum_throughput: 2,
            recovery_timeout_ms: 1_000,
            success_threshold: 2,
            ..Default::default()
        },
        fallback: FallbackConfig {
            mode,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn executor(mode: FallbackMode) -> FaultTolerantExecutor<String, Docs> {
    FaultTolerantExecutor::new("vector-store", config(mode), Arc::new(DegradationTracker::new()))
        .expect("executor")
}

#[tokio::test(start_paused = true)]
async fn graceful_skips_unavailable_provider_and_uses_next() {
    let exec = executor(FallbackMode::Graceful);
    let a = Provider::new("a", 0, false, Some(&["from-a"]));
    let b = Provider::new("b", 1, true, Some(&["doc1"]));
    exec.add_provider(Arc::clone(&a) as Arc<dyn ServiceProvider<String, Docs>>);
    exec.add_provider(Arc::clone(&b) as Arc<dyn ServiceProvider<String, Docs>>);

    let ctx = ExecutionContext::new("search", "deploy".to_string());
    let value = exec
        .execute(ctx, || async { Err(SearchError::backend("503 service unavailable")) })
        .await
        .expect("fallback answers");

    assert_eq!(value, ["doc1"]);
    assert_eq!(a.calls.load(Ordering::Relaxed), 0);
    assert_eq!(b.calls.load(Ordering::Relaxed), 1);
    assert_eq!(exec.metrics().fallback_activations, 1);
    assert_eq!(exec.metrics().failed_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn circuit_trips_then_recovers_through_half_open() {
    let exec = executor(FallbackMode::FailFast);
    let healthy = Arc::new(AtomicBool::new(false));
    let calls = Arc::new(AtomicU32::new(0));

    let exec = &exec;
    let (switch, counter) = (Arc::clone(&healthy), Arc::clone(&calls));
    let run = move || {
        let healthy = Arc::clone(&switch);
        let calls = Arc::clone(&counter);
        let ctx = ExecutionContext::new("search", "q".to_string()).bypass_retry();
        async move {
            exec.execute(ctx, move || {
                let healthy = Arc::clone(&healthy);
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    if healthy.load(Ordering::Relaxed) {
                        Ok(vec!["ok".to_string()])
                    } else {
                        Err(SearchError::backend("connection refused"))
                    }
                }
            })
            .await
        }
    };

    assert!(run().await.is_err());
    assert!(run().await.is_err());
    assert_eq!(exec.circuit_state(), CircuitState::Open);
    assert!(exec.degradation().is_degraded());

    let err = run().await.unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(calls.load(Ordering::Relaxed), 2);

    tokio::time::advance(Duration::from_millis(1_001)).await;
    healthy.store(true, Ordering::Relaxed);

    assert!(run().await.is_ok());
    assert_eq!(exec.circuit_state(), CircuitState::HalfOpen);
    assert!(run().await.is_ok());
    assert_eq!(exec.circuit_state(), CircuitState::Closed);
    assert_eq!(exec.metrics().circuit_breaker_trips, 1);
}

#[tokio::test(start_paused = true)]
async fn degraded_level_blocks_demanding_operations() {
    let tracker = Arc::new(DegradationTracker::new());
    let exec: FaultTolerantExecutor<String, Docs> =
        FaultTolerantExecutor::new("llm", config(FallbackMode::Graceful), Arc::clone(&tracker))
            .expect("executor");
    tracker.degrade("upstream outage", Some(ServiceLevel::BasicService));

    let blocked = exec
        .execute(
            ExecutionContext::new("generate", String::new())
                .with_required_level(ServiceLevel::FullService),
            || async { Ok(vec!["never".to_string()]) },
        )
        .await;
    assert!(matches!(blocked, Err(SearchError::Degraded { .. })));

    let allowed = exec
        .execute(
            ExecutionContext::new("lookup", String::new())
                .with_required_level(ServiceLevel::BasicService),
            || async { Ok(vec!["served".to_string()]) },
        )
        .await
        .expect("allowed at basic service");
    assert_eq!(allowed, ["served"]);
}

#[tokio::test(start_paused = true)]
async fn cached_mode_serves_last_good_value_after_failure() {
    let exec = executor(FallbackMode::Cached);
    let ctx = || ExecutionContext::new("search", "q".to_string()).with_cache_key("q");

    let first = exec
        .execute(ctx(), || async { Ok(vec!["fresh".to_string()]) })
        .await
        .expect("primary");
    assert_eq!(first, ["fresh"]);

    let second = exec
        .execute(ctx(), || async { Err(SearchError::Timeout("slow".into())) })
        .await
        .expect("cached");
    assert_eq!(second, ["fresh"]);
}

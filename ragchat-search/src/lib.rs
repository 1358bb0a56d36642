//! # ragchat-search
//!
//! Fault-tolerant multi-source retrieval and relevance ranking for ragchat.
//!
//! ## Design
//!
//! - Sources (API, database, in-memory stores) implement [`SearchBackend`]
//! - Each source runs behind its own [`FaultTolerantExecutor`]: degradation
//!   gate, circuit breaker, retry with backoff, then an ordered fallback chain
//! - Queries fan out to all sources concurrently; partial failure still
//!   yields results, total failure yields an empty list
//! - Merged results are scored on seven weighted factors, reranked,
//!   diversified and adjusted for age by the [`RelevanceEngine`]
//! - One [`DegradationTracker`] per application reflects overall health
//!
//! ## Security
//!
//! - Query text is logged only at trace level
//! - Error messages carry backend diagnostics, never credentials
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ragchat_search::backends::InMemoryBackend;
//! use ragchat_search::{
//!     DegradationTracker, Document, EnhancedSearchRequest, ResilienceConfig, SearchConfig,
//!     SearchOrchestrator,
//! };
//!
//! # async fn example() -> ragchat_search::Result<()> {
//! let orchestrator = SearchOrchestrator::new(
//!     SearchConfig::default(),
//!     ResilienceConfig::default(),
//!     Arc::new(DegradationTracker::new()),
//! )?;
//! orchestrator.register_source(Arc::new(InMemoryBackend::with_documents(
//!     "memory",
//!     vec![Document::new("d1", "How to deploy the config service")],
//! )))?;
//!
//! let response = orchestrator
//!     .search_enhanced(&EnhancedSearchRequest::new("deploy config"))
//!     .await;
//! for result in &response.results {
//!     println!("{} {:?}", result.document.id, result.relevance_score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod relevance;
pub mod resilience;
pub mod types;

pub use backend::SearchBackend;
pub use cache::{CacheKey, ResultCache};
pub use config::{
    CircuitBreakerConfig, FallbackConfig, FallbackMode, HealthCheckConfig, ResilienceConfig,
    RetryConfig, SearchConfig,
};
pub use error::{Result, SearchError};
pub use orchestrator::{
    EnhancedSearchRequest, EnhancedSearchResponse, FanOutReport, SearchOrchestrator,
    SearchTiming, SourceError, SourceHealth,
};
pub use relevance::{RankingOptions, RelevanceEngine, RelevanceFactors, RelevanceWeights};
pub use resilience::{
    classify, CircuitBreaker, CircuitState, ClassifiedError, DegradationStatus,
    DegradationTracker, ErrorCategory, ExecutionContext, FallbackCache, FallbackManager,
    FaultTolerantExecutor, MetricsSink, NoopMetricsSink, OperationMetrics, RetryExecutor,
    ServiceLevel, ServiceProvider,
};
pub use types::{Document, QueryContext, SearchOptions, UnifiedSearchResult};

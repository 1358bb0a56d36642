//! Concurrent multi-source fan-out behind per-source fault tolerance.
//!
//! Every registered source gets its own [`FaultTolerantExecutor`], so a
//! failing source trips only its own circuit and never blocks the others.
//! All executors report into one shared [`DegradationTracker`].

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::backend::SearchBackend;
use crate::cache::ResultCache;
use crate::config::{ResilienceConfig, SearchConfig};
use crate::error::{Result, SearchError};
use crate::relevance::RelevanceEngine;
use crate::resilience::{
    classify, CircuitState, DegradationTracker, ErrorCategory, ExecutionContext,
    FaultTolerantExecutor, MetricsSink, NoopMetricsSink, OperationMetrics, Served,
    ServiceProvider,
};
use crate::types::{SearchOptions, UnifiedSearchResult};

use super::dedup::deduplicate;

/// Arguments of one per-source search, also handed to fallback providers.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchArgs {
    /// Query text.
    pub query: String,
    /// Budget and threshold for this source.
    pub options: SearchOptions,
}

type SourceExecutor = FaultTolerantExecutor<SearchArgs, Vec<UnifiedSearchResult>>;

/// Adapts a [`SearchBackend`] into a fallback provider.
struct BackendProvider {
    backend: Arc<dyn SearchBackend>,
    priority: u32,
}

#[async_trait]
impl ServiceProvider<SearchArgs, Vec<UnifiedSearchResult>> for BackendProvider {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    async fn is_available(&self) -> bool {
        self.backend.is_available().await
    }

    async fn execute(&self, args: &SearchArgs) -> Result<Option<Vec<UnifiedSearchResult>>> {
        let hits = self.backend.search(&args.query, &args.options).await?;
        Ok((!hits.is_empty()).then_some(hits))
    }

    async fn health_check(&self) -> Option<bool> {
        match self.backend.health_check().await {
            Some(healthy) => Some(healthy),
            None => Some(self.backend.is_available().await),
        }
    }
}

struct Source {
    backend: Arc<dyn SearchBackend>,
    executor: Arc<SourceExecutor>,
}

/// One source that failed during a fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceError {
    /// Source name.
    pub source: String,
    /// Classified failure category.
    pub category: ErrorCategory,
    /// Error message.
    pub message: String,
    /// `true` when the fallback chain still produced real content; an
    /// empty placeholder does not count.
    pub recovered: bool,
    /// When the failure was observed.
    pub at: DateTime<Utc>,
}

/// Everything a fan-out produced, including failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FanOutReport {
    /// Merged, sorted, truncated results.
    pub results: Vec<UnifiedSearchResult>,
    /// Sources whose primary backend answered.
    pub succeeded: Vec<String>,
    /// Sources that failed or were unknown.
    pub source_errors: Vec<SourceError>,
    /// Result budget handed to each source.
    pub per_source_budget: usize,
}

/// Live view of one registered source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHealth {
    /// Source name.
    pub source: String,
    /// Circuit state of the source's executor.
    pub circuit: CircuitState,
    /// Result of the backend's health probe.
    pub available: bool,
    /// The executor's counters.
    pub metrics: OperationMetrics,
}

/// How a per-source primary call ended.
enum Attempt {
    NotRun,
    Failed(SearchError),
    Succeeded,
}

/// Fans queries out to registered sources and merges the answers.
pub struct SearchOrchestrator {
    pub(super) config: SearchConfig,
    resilience: ResilienceConfig,
    degradation: Arc<DegradationTracker>,
    sink: Arc<dyn MetricsSink>,
    sources: RwLock<BTreeMap<String, Source>>,
    recent_errors: Mutex<VecDeque<SourceError>>,
    background_started: AtomicBool,
    pub(super) relevance: RelevanceEngine,
    pub(super) result_cache: Option<ResultCache>,
}

impl fmt::Debug for SearchOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchOrchestrator")
            .field("sources", &self.source_names())
            .field("level", &self.degradation.level())
            .finish_non_exhaustive()
    }
}

impl SearchOrchestrator {
    /// Create an orchestrator with no sources.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Config`] if either configuration is invalid.
    pub fn new(
        config: SearchConfig,
        resilience: ResilienceConfig,
        degradation: Arc<DegradationTracker>,
    ) -> Result<Self> {
        config.validate()?;
        resilience.validate()?;
        let result_cache = (config.result_cache_ttl_secs > 0).then(|| {
            ResultCache::new(
                config.result_cache_capacity,
                std::time::Duration::from_secs(config.result_cache_ttl_secs),
            )
        });
        Ok(Self {
            config,
            resilience,
            degradation,
            sink: Arc::new(NoopMetricsSink),
            sources: RwLock::new(BTreeMap::new()),
            recent_errors: Mutex::new(VecDeque::new()),
            background_started: AtomicBool::new(false),
            relevance: RelevanceEngine::default(),
            result_cache,
        })
    }

    /// Report per-source outcomes to `sink`. Applies to sources registered
    /// afterwards.
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Use `engine` for enhanced searches.
    pub fn with_relevance_engine(mut self, engine: RelevanceEngine) -> Self {
        self.relevance = engine;
        self
    }

    /// Register a source with no fallback providers.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Config`] if a source of that name exists.
    pub fn register_source(&self, backend: Arc<dyn SearchBackend>) -> Result<()> {
        self.register_source_with_fallbacks(backend, Vec::new())
    }

    /// Register a source whose failures fall back to `fallbacks`, tried in
    /// the given order.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Config`] if a source of that name exists.
    pub fn register_source_with_fallbacks(
        &self,
        backend: Arc<dyn SearchBackend>,
        fallbacks: Vec<Arc<dyn SearchBackend>>,
    ) -> Result<()> {
        let name = backend.name().to_string();
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        if sources.contains_key(&name) {
            return Err(SearchError::Config(format!("source {name} is already registered")));
        }

        let executor = SourceExecutor::new(
            name.clone(),
            self.resilience.clone(),
            Arc::clone(&self.degradation),
        )?
        .with_sink(Arc::clone(&self.sink));
        for (priority, fallback) in (0u32..).zip(fallbacks) {
            executor.add_provider(Arc::new(BackendProvider {
                backend: fallback,
                priority,
            }));
        }
        let executor = Arc::new(executor);
        if self.background_started.load(Ordering::Acquire) {
            executor.start_background_tasks();
        }

        tracing::info!(source = %name, "search source registered");
        sources.insert(name, Source { backend, executor });
        Ok(())
    }

    /// Registered source names, sorted.
    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// The shared degradation tracker.
    pub fn degradation(&self) -> &Arc<DegradationTracker> {
        &self.degradation
    }

    /// Search `sources` (all registered sources when empty) and merge.
    ///
    /// Never fails: failed and unknown sources contribute nothing, and
    /// when every source fails the result is empty.
    pub async fn search_across_sources(
        &self,
        query: &str,
        sources: &[String],
        max_results: usize,
        threshold: f64,
    ) -> Vec<UnifiedSearchResult> {
        self.search_across_sources_detailed(query, sources, max_results, threshold)
            .await
            .results
    }

    /// Like [`SearchOrchestrator::search_across_sources`], also reporting
    /// which sources failed and why.
    ///
    /// # Pipeline
    ///
    /// 1. Split `max_results` evenly (rounded up) across the requested sources
    /// 2. Query every source concurrently through its executor
    /// 3. Record failures; keep whatever succeeded
    /// 4. Drop results below `threshold`, de-duplicate
    /// 5. Sort by similarity (descending) and truncate to `max_results`
    pub async fn search_across_sources_detailed(
        &self,
        query: &str,
        sources: &[String],
        max_results: usize,
        threshold: f64,
    ) -> FanOutReport {
        let requested = if sources.is_empty() {
            self.source_names()
        } else {
            sources.to_vec()
        };
        if requested.is_empty() || max_results == 0 {
            return FanOutReport::default();
        }

        let per_source_budget = max_results.div_ceil(requested.len());
        let options = SearchOptions {
            max_results: per_source_budget,
            threshold,
        };
        tracing::trace!(query, sources = ?requested, "fan-out search");

        let handles: Vec<(String, Option<(Arc<dyn SearchBackend>, Arc<SourceExecutor>)>)> = {
            let registered = self.sources.read().unwrap_or_else(PoisonError::into_inner);
            requested
                .iter()
                .map(|name| {
                    let handle = registered
                        .get(name)
                        .map(|s| (Arc::clone(&s.backend), Arc::clone(&s.executor)));
                    (name.clone(), handle)
                })
                .collect()
        };

        let calls = handles.into_iter().map(|(name, handle)| {
            let options = options.clone();
            async move {
                let outcome = match handle {
                    Some((backend, executor)) => {
                        Self::query_source(&name, backend.as_ref(), &executor, query, options).await
                    }
                    None => (
                        Vec::new(),
                        Some(SourceError {
                            source: name.clone(),
                            category: ErrorCategory::Validation,
                            message: format!("unknown source {name}"),
                            recovered: false,
                            at: Utc::now(),
                        }),
                    ),
                };
                (name, outcome)
            }
        });
        let outcomes = join_all(calls).await;

        let mut report = FanOutReport {
            per_source_budget,
            ..FanOutReport::default()
        };
        let mut merged: Vec<UnifiedSearchResult> = Vec::new();
        for (name, (hits, failure)) in outcomes {
            tracing::debug!(source = %name, count = hits.len(), "source answered");
            merged.extend(hits);
            match failure {
                Some(err) => {
                    tracing::warn!(
                        source = %name,
                        category = %err.category,
                        recovered = err.recovered,
                        error = %err.message,
                        "source search failed"
                    );
                    self.remember_error(err.clone());
                    report.source_errors.push(err);
                }
                None => report.succeeded.push(name),
            }
        }

        merged.retain(|r| r.similarity >= threshold);
        if self.config.deduplicate {
            merged = deduplicate(merged);
        }
        merged.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        merged.truncate(max_results);
        report.results = merged;
        report
    }

    async fn query_source(
        name: &str,
        backend: &dyn SearchBackend,
        executor: &SourceExecutor,
        query: &str,
        options: SearchOptions,
    ) -> (Vec<UnifiedSearchResult>, Option<SourceError>) {
        let args = SearchArgs {
            query: query.to_string(),
            options,
        };
        let cache_key = format!(
            "{}|{}|{}",
            args.query.trim().to_lowercase(),
            args.options.max_results,
            args.options.threshold
        );
        let ctx = ExecutionContext::new("search", args.clone()).with_cache_key(cache_key);

        let attempt = Mutex::new(Attempt::NotRun);
        let (args_ref, attempt_ref) = (&args, &attempt);
        let outcome = executor
            .execute_traced(ctx, move || async move {
                let result = backend.search(&args_ref.query, &args_ref.options).await;
                *attempt_ref.lock().unwrap_or_else(PoisonError::into_inner) = match &result {
                    Ok(_) => Attempt::Succeeded,
                    Err(err) => Attempt::Failed(err.clone()),
                };
                result
            })
            .await;

        let attempt = attempt.into_inner().unwrap_or_else(PoisonError::into_inner);
        match (outcome, attempt) {
            (Ok((hits, Served::Primary)), _) => (hits, None),
            (Ok((hits, served)), attempt) => {
                let cause = match attempt {
                    Attempt::Failed(err) => err,
                    _ => SearchError::CircuitOpen {
                        service: name.to_string(),
                    },
                };
                (hits, Some(source_error(name, &cause, served.is_answer())))
            }
            (Err(err), _) => (Vec::new(), Some(source_error(name, &err, false))),
        }
    }

    fn remember_error(&self, err: SourceError) {
        let cap = self.config.max_recent_errors;
        if cap == 0 {
            return;
        }
        let mut recent = self.recent_errors.lock().unwrap_or_else(PoisonError::into_inner);
        while recent.len() >= cap {
            recent.pop_front();
        }
        recent.push_back(err);
    }

    /// Recent source failures, oldest first.
    pub fn recent_errors(&self) -> Vec<SourceError> {
        self.recent_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Probe every registered source.
    pub async fn source_health(&self) -> Vec<SourceHealth> {
        let sources: Vec<(String, Arc<dyn SearchBackend>, Arc<SourceExecutor>)> = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, s)| (name.clone(), Arc::clone(&s.backend), Arc::clone(&s.executor)))
            .collect();

        let probes = sources.into_iter().map(|(name, backend, executor)| async move {
            let available = match backend.health_check().await {
                Some(healthy) => healthy,
                None => backend.is_available().await,
            };
            SourceHealth {
                source: name,
                circuit: executor.circuit_state(),
                available,
                metrics: executor.metrics(),
            }
        });
        join_all(probes).await
    }

    /// Start every source's health poll and cache sweep. Sources
    /// registered later start theirs on registration.
    pub fn start_background_tasks(&self) {
        if self.background_started.swap(true, Ordering::AcqRel) {
            return;
        }
        for source in self.sources.read().unwrap_or_else(PoisonError::into_inner).values() {
            source.executor.start_background_tasks();
        }
    }

    /// Stop all background tasks and drop cached responses.
    pub async fn shutdown(&self) {
        let executors: Vec<Arc<SourceExecutor>> = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|s| Arc::clone(&s.executor))
            .collect();
        for executor in executors {
            executor.shutdown().await;
        }
        if let Some(cache) = &self.result_cache {
            cache.clear();
        }
        self.background_started.store(false, Ordering::Release);
        tracing::info!("search orchestrator stopped");
    }
}

fn source_error(source: &str, err: &SearchError, recovered: bool) -> SourceError {
    let classified = classify(err);
    SourceError {
        source: source.to_string(),
        category: classified.category,
        message: classified.message,
        recovered,
        at: Utc::now(),
    }
}

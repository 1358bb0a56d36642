//! Fan-out followed by relevance ranking, with timing and response caching.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::cache::CacheKey;
use crate::relevance::RankingOptions;
use crate::resilience::DegradationStatus;
use crate::types::{QueryContext, UnifiedSearchResult};

use super::search::{SearchOrchestrator, SourceError};

/// Candidates fetched per final result, so ranking has room to reorder.
pub const CANDIDATE_MULTIPLIER: usize = 2;

/// A ranked search across sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancedSearchRequest {
    /// Query text.
    pub query: String,
    /// Sources to search; empty means all registered.
    pub sources: Vec<String>,
    /// Final result count; defaults to the orchestrator setting.
    pub max_results: Option<usize>,
    /// Minimum backend similarity; defaults to the orchestrator setting.
    pub threshold: Option<f64>,
    /// Conversation state for context-aware ranking.
    pub context: Option<QueryContext>,
    /// Ranking overrides; defaults to the engine's options.
    pub ranking: Option<RankingOptions>,
}

impl EnhancedSearchRequest {
    /// Request for `query` over all sources with default settings.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Wall-clock breakdown of an enhanced search, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTiming {
    /// Fan-out and merge.
    pub search_ms: u64,
    /// Relevance pipeline.
    pub reranking_ms: u64,
    /// Whole call.
    pub total_ms: u64,
}

/// Ranked results and diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedSearchResponse {
    /// Ranked results, best first.
    pub results: Vec<UnifiedSearchResult>,
    /// Timing breakdown.
    pub timing: SearchTiming,
    /// `true` when served from the response cache.
    pub cached: bool,
    /// Sources that failed during this search.
    pub source_errors: Vec<SourceError>,
    /// Service level at the end of the call.
    pub degradation: DegradationStatus,
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl SearchOrchestrator {
    /// Search, then rank with the relevance engine.
    ///
    /// Identical requests within the response-cache TTL are answered from
    /// the cache. Responses with failed sources are not cached.
    pub async fn search_enhanced(&self, request: &EnhancedSearchRequest) -> EnhancedSearchResponse {
        let started = Instant::now();
        let max_results = request.max_results.unwrap_or(self.config.default_max_results);
        let threshold = request.threshold.unwrap_or(self.config.default_threshold);
        let mut ranking = request
            .ranking
            .clone()
            .unwrap_or_else(|| self.relevance.options().clone());
        ranking.max_results = max_results.max(1);

        let sources = if request.sources.is_empty() {
            self.source_names()
        } else {
            request.sources.clone()
        };
        let key = CacheKey::new(
            &request.query,
            &sources,
            &(max_results, threshold, &request.context, &ranking),
        );

        if let Some(cache) = &self.result_cache {
            if let Some(results) = cache.get(&key).await {
                tracing::debug!(count = results.len(), "enhanced search served from cache");
                let total_ms = elapsed_ms(started);
                return EnhancedSearchResponse {
                    results,
                    timing: SearchTiming {
                        search_ms: 0,
                        reranking_ms: 0,
                        total_ms,
                    },
                    cached: true,
                    source_errors: Vec::new(),
                    degradation: self.degradation().status(),
                };
            }
        }

        let candidates = max_results.saturating_mul(CANDIDATE_MULTIPLIER);
        let report = self
            .search_across_sources_detailed(&request.query, &sources, candidates, threshold)
            .await;
        let search_ms = elapsed_ms(started);

        let rank_started = Instant::now();
        let results = self.relevance.rank_with(
            report.results,
            &request.query,
            request.context.as_ref(),
            &ranking,
        );
        let reranking_ms = elapsed_ms(rank_started);

        if report.source_errors.is_empty() {
            if let Some(cache) = &self.result_cache {
                cache.insert(key, results.clone()).await;
            }
        }

        let timing = SearchTiming {
            search_ms,
            reranking_ms,
            total_ms: elapsed_ms(started),
        };
        tracing::debug!(
            count = results.len(),
            search_ms,
            reranking_ms,
            failed_sources = report.source_errors.len(),
            "enhanced search complete"
        );

        EnhancedSearchResponse {
            results,
            timing,
            cached: false,
            source_errors: report.source_errors,
            degradation: self.degradation().status(),
        }
    }
}

//! Relevance scoring and reranking of merged search results.
//!
//! # Pipeline
//!
//! 1. Score every result on seven weighted factors ([`scoring`])
//! 2. Optionally blend in a cross-encoder style interaction score ([`rerank`])
//! 3. Optionally drop near-duplicates ([`diversity`])
//! 4. Optionally adjust scores by document age ([`temporal`])
//! 5. Sort, truncate and assign 1-based ranks
//!
//! If any stage fails (invalid weights, a non-finite score) the engine logs
//! the failure and returns the input ordered by similarity alone.

pub mod diversity;
pub mod rerank;
pub mod scoring;
pub mod temporal;
pub mod text;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::types::{QueryContext, UnifiedSearchResult};

pub use scoring::{RelevanceFactors, RelevanceWeights, ScoredDocument, Scorer};

/// Ranking switches and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingOptions {
    /// Factor weights.
    pub weights: RelevanceWeights,
    /// Blend in the cross-encoder score.
    pub enable_cross_encoder: bool,
    /// Drop near-duplicates.
    pub enable_diversification: bool,
    /// Jaccard similarity at or above which a document is a duplicate.
    pub diversity_threshold: f64,
    /// Cap on the diversified list.
    pub max_diversified: usize,
    /// Adjust scores by document age.
    pub enable_temporal_decay: bool,
    /// Final result count.
    pub max_results: usize,
    /// Clock used for recency and decay; `None` means now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_time: Option<DateTime<Utc>>,
}

impl Default for RankingOptions {
    fn default() -> Self {
        Self {
            weights: RelevanceWeights::default(),
            enable_cross_encoder: true,
            enable_diversification: true,
            diversity_threshold: diversity::DEFAULT_DIVERSITY_THRESHOLD,
            max_diversified: diversity::DEFAULT_MAX_DIVERSIFIED,
            enable_temporal_decay: true,
            max_results: 10,
            reference_time: None,
        }
    }
}

impl RankingOptions {
    /// Validates weights and thresholds.
    pub fn validate(&self) -> Result<(), SearchError> {
        self.weights.validate()?;
        if !(0.0..=1.0).contains(&self.diversity_threshold) {
            return Err(SearchError::Config(
                "diversity_threshold must be within [0, 1]".into(),
            ));
        }
        if self.max_results == 0 {
            return Err(SearchError::Config(
                "max_results must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Stateless ranking pipeline with default options.
#[derive(Debug, Clone, Default)]
pub struct RelevanceEngine {
    options: RankingOptions,
}

impl RelevanceEngine {
    /// Engine using `options` unless a call overrides them.
    pub fn new(options: RankingOptions) -> Self {
        Self { options }
    }

    /// Default options.
    pub fn options(&self) -> &RankingOptions {
        &self.options
    }

    /// Rank with the engine's own options.
    pub fn rank(
        &self,
        results: Vec<UnifiedSearchResult>,
        query: &str,
        context: Option<&QueryContext>,
    ) -> Vec<UnifiedSearchResult> {
        self.rank_with(results, query, context, &self.options)
    }

    /// Rank with explicit options. Never fails: a stage failure yields
    /// similarity-only ordering.
    pub fn rank_with(
        &self,
        results: Vec<UnifiedSearchResult>,
        query: &str,
        context: Option<&QueryContext>,
        options: &RankingOptions,
    ) -> Vec<UnifiedSearchResult> {
        if results.is_empty() {
            return results;
        }
        match self.score_and_rank(results.clone(), query, context, options) {
            Ok(ranked) => ranked.into_iter().map(ScoredDocument::into_result).collect(),
            Err(err) => {
                tracing::warn!(error = %err, "ranking failed, using similarity order");
                similarity_order(results, options.max_results)
            }
        }
    }

    /// Run the full pipeline and keep the score breakdown.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Config`] for invalid options and
    /// [`SearchError::Ranking`] when a score cannot be computed.
    pub fn score_and_rank(
        &self,
        results: Vec<UnifiedSearchResult>,
        query: &str,
        context: Option<&QueryContext>,
        options: &RankingOptions,
    ) -> Result<Vec<ScoredDocument>, SearchError> {
        options.validate()?;
        let now = options.reference_time.unwrap_or_else(Utc::now);
        let scorer = Scorer::new(query, context, options.weights, now);

        let mut docs = results
            .into_iter()
            .map(|r| scorer.score(r))
            .collect::<Result<Vec<_>, _>>()?;
        sort_by_score(&mut docs);

        if options.enable_cross_encoder {
            docs = rerank::rerank(docs, query);
        }
        if options.enable_diversification {
            docs = diversity::diversify(docs, options.diversity_threshold, options.max_diversified);
        }
        if options.enable_temporal_decay {
            docs = temporal::apply_temporal_decay(docs, now);
        }

        if let Some(bad) = docs.iter().find(|d| !d.relevance_score.is_finite()) {
            return Err(SearchError::Ranking(format!(
                "non-finite score for {}",
                bad.id()
            )));
        }

        sort_by_score(&mut docs);
        docs.truncate(options.max_results);
        for (i, doc) in docs.iter_mut().enumerate() {
            doc.rank = i + 1;
        }
        tracing::debug!(count = docs.len(), "ranked results");
        Ok(docs)
    }
}

fn sort_by_score(docs: &mut [ScoredDocument]) {
    docs.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
}

/// Order by similarity alone, with the similarity as the relevance score.
pub fn similarity_order(mut results: Vec<UnifiedSearchResult>, max_results: usize) -> Vec<UnifiedSearchResult> {
    results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    results.truncate(max_results);
    for (i, result) in results.iter_mut().enumerate() {
        result.relevance_score = Some(result.similarity);
        result.rank = Some(i + 1);
        result.relevance_factors = None;
    }
    results
}

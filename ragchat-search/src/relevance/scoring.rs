//! Multi-factor relevance scoring.
//!
//! Each result is scored on up to seven factors, each in `[0, 1]`:
//!
//! ```text
//! similarity        backend similarity
//! recency           0.5 ^ (age_days / 90), undated = 0.5
//! authority         metadata "authority" or a per-source prior
//! context_relevance overlap with conversation terms, +0.2 for preferred sources
//! keyword_match     fraction of query terms present
//! semantic_match    fraction of query terms present directly or via a synonym
//! user_feedback     explicit feedback, when any exists
//! ```
//!
//! `relevance_score = Σ wᵢ·fᵢ / Σ wᵢ` over the factors present, so a
//! missing `user_feedback` redistributes its weight over the rest.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::types::{QueryContext, UnifiedSearchResult};

use super::text::{query_terms, synonyms_of, word_set};

/// Half-life of the recency factor, in days.
pub const RECENCY_HALF_LIFE_DAYS: f64 = 90.0;

/// Bonus added to context relevance for a preferred source.
pub const PREFERRED_SOURCE_BONUS: f64 = 0.2;

/// Allowed deviation of the weight sum from 1.
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// Per-factor scores of one result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelevanceFactors {
    /// Backend similarity, clamped to `[0, 1]`.
    pub similarity: f64,
    /// Age decay with a [`RECENCY_HALF_LIFE_DAYS`] half-life; 0.5 when undated.
    pub recency: f64,
    /// Metadata `authority` or the per-source prior.
    pub authority: f64,
    /// Overlap with the conversation and previous queries.
    pub context_relevance: f64,
    /// Share of query terms present in the document.
    pub keyword_match: f64,
    /// Query-term coverage counting synonyms.
    pub semantic_match: f64,
    /// Explicit user rating, when one exists for the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_feedback: Option<f64>,
}

/// Factor weights. Must sum to 1 within [`WEIGHT_SUM_TOLERANCE`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceWeights {
    /// Weight of [`RelevanceFactors::similarity`].
    pub similarity: f64,
    /// Weight of [`RelevanceFactors::recency`].
    pub recency: f64,
    /// Weight of [`RelevanceFactors::authority`].
    pub authority: f64,
    /// Weight of [`RelevanceFactors::context_relevance`].
    pub context_relevance: f64,
    /// Weight of [`RelevanceFactors::keyword_match`].
    pub keyword_match: f64,
    /// Weight of [`RelevanceFactors::semantic_match`].
    pub semantic_match: f64,
    /// Weight of [`RelevanceFactors::user_feedback`]; spread over the other
    /// factors when there is no feedback.
    pub user_feedback: f64,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            similarity: 0.35,
            recency: 0.1,
            authority: 0.1,
            context_relevance: 0.1,
            keyword_match: 0.15,
            semantic_match: 0.15,
            user_feedback: 0.05,
        }
    }
}

impl RelevanceWeights {
    /// Weights that rank by backend similarity alone.
    pub fn similarity_only() -> Self {
        Self {
            similarity: 1.0,
            recency: 0.0,
            authority: 0.0,
            context_relevance: 0.0,
            keyword_match: 0.0,
            semantic_match: 0.0,
            user_feedback: 0.0,
        }
    }

    fn as_array(&self) -> [f64; 7] {
        [
            self.similarity,
            self.recency,
            self.authority,
            self.context_relevance,
            self.keyword_match,
            self.semantic_match,
            self.user_feedback,
        ]
    }

    /// Validates that every weight is a finite non-negative number and the
    /// sum is 1 within tolerance.
    pub fn validate(&self) -> Result<(), SearchError> {
        let weights = self.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SearchError::Config(
                "relevance weights must be finite and non-negative".into(),
            ));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(SearchError::Config(format!(
                "relevance weights must sum to 1.0, got {sum:.3}"
            )));
        }
        Ok(())
    }

    /// Weighted mean of the factors present.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Ranking`] when the present factors carry no
    /// weight or the result is not finite.
    pub fn combine(&self, factors: &RelevanceFactors) -> Result<f64, SearchError> {
        let mut pairs = vec![
            (self.similarity, factors.similarity),
            (self.recency, factors.recency),
            (self.authority, factors.authority),
            (self.context_relevance, factors.context_relevance),
            (self.keyword_match, factors.keyword_match),
            (self.semantic_match, factors.semantic_match),
        ];
        if let Some(feedback) = factors.user_feedback {
            pairs.push((self.user_feedback, feedback));
        }

        let total_weight: f64 = pairs.iter().map(|(w, _)| w).sum();
        if total_weight <= 0.0 {
            return Err(SearchError::Ranking(
                "present factors carry no weight".into(),
            ));
        }
        let score = pairs.iter().map(|(w, f)| w * f).sum::<f64>() / total_weight;
        if !score.is_finite() {
            return Err(SearchError::Ranking("non-finite relevance score".into()));
        }
        Ok(score.clamp(0.0, 1.0))
    }
}

/// A result with its score breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    /// The underlying search result.
    pub result: UnifiedSearchResult,
    /// Final score in `[0, 1]`.
    pub relevance_score: f64,
    /// Factor breakdown.
    pub factors: RelevanceFactors,
    /// Weights used.
    pub weights: RelevanceWeights,
    /// 1-based rank, `0` until ranked.
    pub rank: usize,
    /// Per-stage annotations (cross-encoder score, temporal multiplier).
    pub scoring_metadata: serde_json::Map<String, serde_json::Value>,
}

impl ScoredDocument {
    /// Document id.
    pub fn id(&self) -> &str {
        &self.result.document.id
    }

    /// Source that produced the result.
    pub fn source(&self) -> &str {
        &self.result.source
    }

    /// Record a numeric annotation.
    pub fn annotate(&mut self, key: &str, value: f64) {
        if let Some(number) = serde_json::Number::from_f64(value) {
            self.scoring_metadata
                .insert(key.to_string(), serde_json::Value::Number(number));
        }
    }

    /// Fold score, rank and factors back into the search result.
    pub fn into_result(self) -> UnifiedSearchResult {
        let mut result = self.result;
        result.relevance_score = Some(self.relevance_score);
        result.rank = Some(self.rank);
        result.relevance_factors = Some(self.factors);
        result
    }
}

/// Scores results against one query.
#[derive(Debug)]
pub struct Scorer<'a> {
    terms: Vec<String>,
    context: Option<&'a QueryContext>,
    context_terms: HashSet<String>,
    weights: RelevanceWeights,
    now: DateTime<Utc>,
}

impl<'a> Scorer<'a> {
    /// Prepare a scorer for `query`.
    pub fn new(
        query: &str,
        context: Option<&'a QueryContext>,
        weights: RelevanceWeights,
        now: DateTime<Utc>,
    ) -> Self {
        let context_terms = context.map(context_terms).unwrap_or_default();
        Self {
            terms: query_terms(query),
            context,
            context_terms,
            weights,
            now,
        }
    }

    /// Compute the factors of `result`.
    pub fn factors(&self, result: &UnifiedSearchResult) -> RelevanceFactors {
        let words = word_set(&result.document.searchable_text());
        RelevanceFactors {
            similarity: result.similarity.clamp(0.0, 1.0),
            recency: recency(result, self.now),
            authority: authority(result),
            context_relevance: self.context_relevance(result, &words),
            keyword_match: keyword_match(&self.terms, &words),
            semantic_match: semantic_match(&self.terms, &words),
            user_feedback: self.user_feedback(result),
        }
    }

    /// Score `result`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Ranking`] if the weighted score is unusable.
    pub fn score(&self, result: UnifiedSearchResult) -> Result<ScoredDocument, SearchError> {
        let factors = self.factors(&result);
        let relevance_score = self.weights.combine(&factors)?;
        Ok(ScoredDocument {
            result,
            relevance_score,
            factors,
            weights: self.weights,
            rank: 0,
            scoring_metadata: serde_json::Map::new(),
        })
    }

    fn context_relevance(&self, result: &UnifiedSearchResult, words: &HashSet<String>) -> f64 {
        let Some(context) = self.context else {
            return 0.5;
        };
        if self.context_terms.is_empty() && context.preferred_sources.is_empty() {
            return 0.5;
        }
        let overlap = if self.context_terms.is_empty() {
            0.0
        } else {
            self.context_terms.intersection(words).count() as f64 / self.context_terms.len() as f64
        };
        let bonus = if context.preferred_sources.iter().any(|s| s == &result.source) {
            PREFERRED_SOURCE_BONUS
        } else {
            0.0
        };
        (overlap + bonus).clamp(0.0, 1.0)
    }

    fn user_feedback(&self, result: &UnifiedSearchResult) -> Option<f64> {
        self.context
            .and_then(|c| c.user_feedback.get(&result.document.id).copied())
            .or_else(|| result.document.metadata_f64("feedback"))
            .filter(|f| f.is_finite())
            .map(|f| f.clamp(0.0, 1.0))
    }
}

fn context_terms(context: &QueryContext) -> HashSet<String> {
    context
        .conversation_history
        .iter()
        .chain(&context.previous_queries)
        .chain(context.domain.as_ref())
        .flat_map(|text| query_terms(text))
        .collect()
}

/// `0.5 ^ (age_days / 90)`; undated documents score 0.5 and future dates
/// count as brand new.
pub fn recency(result: &UnifiedSearchResult, now: DateTime<Utc>) -> f64 {
    match result.document.last_modified() {
        Some(at) => {
            let age_days = (now - at).num_seconds().max(0) as f64 / 86_400.0;
            0.5_f64.powf(age_days / RECENCY_HALF_LIFE_DAYS)
        }
        None => 0.5,
    }
}

/// Metadata `authority` when present, else a per-source prior.
pub fn authority(result: &UnifiedSearchResult) -> f64 {
    if let Some(value) = result
        .document
        .metadata_f64("authority")
        .filter(|v| v.is_finite())
    {
        return value.clamp(0.0, 1.0);
    }
    match result.source.as_str() {
        "api" => 0.8,
        "database" => 0.75,
        "memory" => 0.6,
        _ => 0.5,
    }
}

/// Fraction of `terms` found in `words`. No terms scores 0.
pub fn keyword_match(terms: &[String], words: &HashSet<String>) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    terms.iter().filter(|t| words.contains(*t)).count() as f64 / terms.len() as f64
}

/// Like [`keyword_match`], but a synonym of a term also counts.
pub fn semantic_match(terms: &[String], words: &HashSet<String>) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let matched = terms
        .iter()
        .filter(|t| words.contains(*t) || synonyms_of(t).any(|s| words.contains(s)))
        .count();
    matched as f64 / terms.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Document;
    use chrono::Duration;

    fn result(id: &str, content: &str, similarity: f64, source: &str) -> UnifiedSearchResult {
        UnifiedSearchResult::new(Document::new(id, content), similarity, source)
    }

    #[test]
    fn default_weights_are_valid() {
        assert!(RelevanceWeights::default().validate().is_ok());
        assert!(RelevanceWeights::similarity_only().validate().is_ok());
    }

    #[test]
    fn weights_outside_tolerance_rejected() {
        let weights = RelevanceWeights {
            similarity: 0.5,
            ..Default::default()
        };
        let err = weights.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));

        let negative = RelevanceWeights {
            similarity: -0.1,
            recency: 0.55,
            ..Default::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn missing_feedback_redistributes_weight() {
        let factors = RelevanceFactors {
            similarity: 1.0,
            recency: 1.0,
            authority: 1.0,
            context_relevance: 1.0,
            keyword_match: 1.0,
            semantic_match: 1.0,
            user_feedback: None,
        };
        let score = RelevanceWeights::default().combine(&factors).expect("score");
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn feedback_only_weights_without_feedback_fail() {
        let weights = RelevanceWeights {
            user_feedback: 1.0,
            ..RelevanceWeights::similarity_only()
        };
        let weights = RelevanceWeights {
            similarity: 0.0,
            ..weights
        };
        let factors = RelevanceFactors {
            similarity: 0.5,
            recency: 0.5,
            authority: 0.5,
            context_relevance: 0.5,
            keyword_match: 0.5,
            semantic_match: 0.5,
            user_feedback: None,
        };
        assert!(matches!(
            weights.combine(&factors),
            Err(SearchError::Ranking(_))
        ));
    }

    #[test]
    fn recency_halves_every_ninety_days() {
        let now = Utc::now();
        let mut fresh = result("a", "", 0.5, "api");
        fresh.document.created_at = Some(now);
        assert!((recency(&fresh, now) - 1.0).abs() < 1e-9);

        let mut old = result("b", "", 0.5, "api");
        old.document.created_at = Some(now - Duration::days(90));
        assert!((recency(&old, now) - 0.5).abs() < 1e-9);

        let undated = result("c", "", 0.5, "api");
        assert!((recency(&undated, now) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn authority_prefers_metadata_then_source_prior() {
        let mut doc = result("a", "", 0.5, "database");
        assert!((authority(&doc) - 0.75).abs() < f64::EPSILON);
        doc.document
            .metadata
            .insert("authority".into(), serde_json::json!(1.4));
        assert!((authority(&doc) - 1.0).abs() < f64::EPSILON);
        assert!((authority(&result("b", "", 0.5, "elsewhere")) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn keyword_and_semantic_match() {
        let terms = query_terms("deploy config");
        let words = word_set("Release notes and configuration reference");
        assert!(keyword_match(&terms, &words).abs() < f64::EPSILON);
        assert!((semantic_match(&terms, &words) - 1.0).abs() < f64::EPSILON);

        let words = word_set("deploy steps");
        assert!((keyword_match(&terms, &words) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn context_relevance_uses_history_and_preferred_sources() {
        let now = Utc::now();
        let no_context = Scorer::new("deploy", None, RelevanceWeights::default(), now);
        let doc = result("a", "kubernetes deploy guide", 0.5, "api");
        assert!((no_context.factors(&doc).context_relevance - 0.5).abs() < f64::EPSILON);

        let context = QueryContext {
            conversation_history: vec!["we use kubernetes clusters".into()],
            preferred_sources: vec!["api".into()],
            ..Default::default()
        };
        let scorer = Scorer::new("deploy", Some(&context), RelevanceWeights::default(), now);
        // terms {use, kubernetes, clusters}: one of three matches, plus bonus
        let expected = 1.0 / 3.0 + PREFERRED_SOURCE_BONUS;
        assert!((scorer.factors(&doc).context_relevance - expected).abs() < 1e-9);
    }

    #[test]
    fn feedback_from_context_overrides_metadata() {
        let now = Utc::now();
        let mut doc = result("a", "text", 0.5, "api");
        doc.document
            .metadata
            .insert("feedback".into(), serde_json::json!(0.2));

        let plain = Scorer::new("text", None, RelevanceWeights::default(), now);
        assert_eq!(plain.factors(&doc).user_feedback, Some(0.2));

        let mut context = QueryContext::default();
        context.user_feedback.insert("a".into(), 0.9);
        let scorer = Scorer::new("text", Some(&context), RelevanceWeights::default(), now);
        assert_eq!(scorer.factors(&doc).user_feedback, Some(0.9));
    }

    #[test]
    fn scored_document_folds_back_into_result() {
        let scorer = Scorer::new("deploy", None, RelevanceWeights::similarity_only(), Utc::now());
        let mut scored = scorer.score(result("a", "deploy", 0.8, "api")).expect("score");
        assert!((scored.relevance_score - 0.8).abs() < 1e-9);
        scored.rank = 1;
        scored.annotate("cross_encoder_score", 0.5);
        assert!(scored.scoring_metadata.contains_key("cross_encoder_score"));

        let folded = scored.into_result();
        assert_eq!(folded.rank, Some(1));
        assert!(folded.relevance_factors.is_some());
    }
}

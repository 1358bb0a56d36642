//! Core types for documents, unified search results and query context.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::relevance::RelevanceFactors;

/// A retrievable document as returned by a search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Backend-unique identifier.
    pub id: String,
    /// Text content used for keyword and phrase matching.
    pub content: String,
    /// Optional display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Canonical location, used for cross-source de-duplication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Arbitrary backend metadata (`authority`, `feedback`, ...).
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Creation time, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Create a document with just an id and content.
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            title: None,
            url: None,
            metadata: serde_json::Map::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// The more recent of `updated_at` and `created_at`.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        match (self.updated_at, self.created_at) {
            (Some(u), Some(c)) => Some(u.max(c)),
            (u, c) => u.or(c),
        }
    }

    /// Read a numeric metadata field.
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(serde_json::Value::as_f64)
    }

    /// Title and content joined, for text matching.
    pub fn searchable_text(&self) -> String {
        match &self.title {
            Some(title) if !title.is_empty() => format!("{title}\n{}", self.content),
            _ => self.content.clone(),
        }
    }
}

/// A search hit from any source, in one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedSearchResult {
    /// The matched document.
    pub document: Document,
    /// Backend similarity in `[0, 1]` (higher is better).
    pub similarity: f64,
    /// `1 - similarity`.
    pub distance: f64,
    /// Name of the source that produced this hit.
    pub source: String,
    /// Final relevance score, set by the relevance engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    /// 1-based rank, set by the relevance engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
    /// Per-factor breakdown, set by the relevance engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_factors: Option<RelevanceFactors>,
}

impl UnifiedSearchResult {
    /// Build an unranked result; `similarity` is clamped to `[0, 1]` and
    /// `distance` derived from it.
    pub fn new(document: Document, similarity: f64, source: impl Into<String>) -> Self {
        let similarity = if similarity.is_finite() {
            similarity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            document,
            similarity,
            distance: 1.0 - similarity,
            source: source.into(),
            relevance_score: None,
            rank: None,
            relevance_factors: None,
        }
    }
}

/// Per-call options passed to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Result budget for this backend.
    pub max_results: usize,
    /// Minimum similarity to return.
    pub threshold: f64,
}

/// Conversation state that sharpens ranking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryContext {
    /// Recent conversation turns, newest last.
    pub conversation_history: Vec<String>,
    /// Earlier queries in the same session.
    pub previous_queries: Vec<String>,
    /// Sources the user or application prefers.
    pub preferred_sources: Vec<String>,
    /// Topic domain hint (e.g. "devops").
    pub domain: Option<String>,
    /// Explicit feedback per document id, in `[0, 1]`.
    pub user_feedback: HashMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn unified_result_derives_distance() {
        let result = UnifiedSearchResult::new(Document::new("a", "text"), 0.75, "memory");
        assert!((result.distance - 0.25).abs() < f64::EPSILON);
        assert!(result.rank.is_none());
        assert!(result.relevance_score.is_none());
    }

    #[test]
    fn unified_result_clamps_similarity() {
        let high = UnifiedSearchResult::new(Document::new("a", ""), 1.7, "api");
        assert!((high.similarity - 1.0).abs() < f64::EPSILON);
        assert!(high.distance.abs() < f64::EPSILON);

        let nan = UnifiedSearchResult::new(Document::new("b", ""), f64::NAN, "api");
        assert!(nan.similarity.abs() < f64::EPSILON);
    }

    #[test]
    fn last_modified_prefers_more_recent() {
        let now = Utc::now();
        let mut doc = Document::new("a", "");
        assert!(doc.last_modified().is_none());

        doc.created_at = Some(now - Duration::days(10));
        assert_eq!(doc.last_modified(), doc.created_at);

        doc.updated_at = Some(now - Duration::days(1));
        assert_eq!(doc.last_modified(), doc.updated_at);

        // An updated_at older than created_at is ignored in favour of the newer.
        doc.updated_at = Some(now - Duration::days(30));
        assert_eq!(doc.last_modified(), doc.created_at);
    }

    #[test]
    fn searchable_text_includes_title() {
        let mut doc = Document::new("a", "body text");
        assert_eq!(doc.searchable_text(), "body text");
        doc.title = Some("Heading".into());
        assert_eq!(doc.searchable_text(), "Heading\nbody text");
    }

    #[test]
    fn metadata_f64_reads_numbers_only() {
        let mut doc = Document::new("a", "");
        doc.metadata.insert("authority".into(), serde_json::json!(0.9));
        doc.metadata.insert("label".into(), serde_json::json!("x"));
        assert_eq!(doc.metadata_f64("authority"), Some(0.9));
        assert_eq!(doc.metadata_f64("label"), None);
        assert_eq!(doc.metadata_f64("missing"), None);
    }

    #[test]
    fn document_deserialises_with_missing_optionals() {
        let doc: Document =
            serde_json::from_str(r#"{"id": "d1", "content": "hello"}"#).expect("deserialize");
        assert_eq!(doc.id, "d1");
        assert!(doc.metadata.is_empty());
        assert!(doc.created_at.is_none());
    }
}

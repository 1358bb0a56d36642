//! Age-bucketed score adjustment.
//!
//! | age          | multiplier |
//! |--------------|------------|
//! | ≤ 7 days     | 1.10       |
//! | ≤ 30 days    | 1.05       |
//! | ≤ 90 days    | 1.00       |
//! | ≤ 365 days   | 0.95       |
//! | older        | 0.90       |
//!
//! Adjusted scores are capped at 1.0. Undated documents are unchanged.

use chrono::{DateTime, Utc};

use super::scoring::ScoredDocument;

/// Multiplier for a document `age_days` old.
pub fn decay_multiplier(age_days: f64) -> f64 {
    match age_days {
        a if a <= 7.0 => 1.10,
        a if a <= 30.0 => 1.05,
        a if a <= 90.0 => 1.00,
        a if a <= 365.0 => 0.95,
        _ => 0.90,
    }
}

/// Apply [`decay_multiplier`] to every dated document, relative to `now`.
pub fn apply_temporal_decay(mut docs: Vec<ScoredDocument>, now: DateTime<Utc>) -> Vec<ScoredDocument> {
    for doc in &mut docs {
        let Some(at) = doc.result.document.last_modified() else {
            continue;
        };
        let age_days = (now - at).num_seconds().max(0) as f64 / 86_400.0;
        let multiplier = decay_multiplier(age_days);
        doc.relevance_score = (doc.relevance_score * multiplier).min(1.0);
        doc.annotate("temporal_multiplier", multiplier);
    }
    docs
}

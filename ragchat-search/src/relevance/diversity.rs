//! Greedy near-duplicate suppression.
//!
//! Walks the ranked list in order and keeps a document only if its word-set
//! Jaccard similarity to every document already kept is below the
//! threshold. Stops once `max_kept` documents are kept.

use std::collections::HashSet;

use super::scoring::ScoredDocument;
use super::text::{jaccard, word_set};

/// Default similarity at or above which a document counts as a duplicate.
pub const DEFAULT_DIVERSITY_THRESHOLD: f64 = 0.8;

/// Default cap on the diversified list.
pub const DEFAULT_MAX_DIVERSIFIED: usize = 10;

/// Keep documents that are sufficiently different from all higher-ranked
/// kept documents.
pub fn diversify(docs: Vec<ScoredDocument>, threshold: f64, max_kept: usize) -> Vec<ScoredDocument> {
    let mut kept: Vec<ScoredDocument> = Vec::with_capacity(docs.len().min(max_kept));
    let mut kept_words: Vec<HashSet<String>> = Vec::new();

    for doc in docs {
        if kept.len() >= max_kept {
            break;
        }
        let words = word_set(&doc.result.document.searchable_text());
        if kept_words.iter().all(|k| jaccard(k, &words) < threshold) {
            kept_words.push(words);
            kept.push(doc);
        } else {
            tracing::trace!(id = doc.id(), "dropped near-duplicate");
        }
    }
    kept
}

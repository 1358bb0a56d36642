//! Cross-encoder style reranking from lexical query/document interaction.
//!
//! ```text
//! cross = 0.4 · exact phrase
//!       + 0.3 · longest consecutive query-word run / query words
//!       + 0.1 · each synonym pair bridging query and document
//!       + 0.2 · best sentence keyword coverage
//! capped at 1.0
//!
//! score' = 0.7 · score + 0.3 · cross
//! ```

use std::collections::HashSet;

use super::scoring::ScoredDocument;
use super::text::{query_terms, sentences, tokenize, word_set, SYNONYM_PAIRS};

const EXACT_PHRASE_BONUS: f64 = 0.4;
const RUN_WEIGHT: f64 = 0.3;
const SYNONYM_BONUS: f64 = 0.1;
const SENTENCE_WEIGHT: f64 = 0.2;

/// Share of the original score kept after reranking.
pub const ORIGINAL_SHARE: f64 = 0.7;

/// Interaction score of `query` against `text`, in `[0, 1]`.
pub fn cross_encoder_score(query: &str, text: &str) -> f64 {
    let query_words = tokenize(query);
    if query_words.is_empty() {
        return 0.0;
    }
    let doc_words = tokenize(text);
    let mut score = 0.0;

    let phrase = query_words.join(" ");
    if doc_words.join(" ").contains(&phrase) {
        score += EXACT_PHRASE_BONUS;
    }

    score += RUN_WEIGHT * longest_run(&query_words, &doc_words) as f64 / query_words.len() as f64;

    let query_set: HashSet<&str> = query_words.iter().map(String::as_str).collect();
    let doc_set: HashSet<&str> = doc_words.iter().map(String::as_str).collect();
    let bridges = SYNONYM_PAIRS
        .iter()
        .filter(|(a, b)| {
            (query_set.contains(a) && doc_set.contains(b))
                || (query_set.contains(b) && doc_set.contains(a))
        })
        .count();
    score += SYNONYM_BONUS * bridges as f64;

    let terms = query_terms(query);
    if !terms.is_empty() {
        let best = sentences(text)
            .into_iter()
            .map(|sentence| {
                let words = word_set(sentence);
                terms.iter().filter(|t| words.contains(*t)).count() as f64 / terms.len() as f64
            })
            .fold(0.0_f64, f64::max);
        score += SENTENCE_WEIGHT * best;
    }

    score.min(1.0)
}

/// Length of the longest run of consecutive query words appearing
/// contiguously in the document.
fn longest_run(query: &[String], doc: &[String]) -> usize {
    let mut best = 0;
    for qi in 0..query.len() {
        for di in 0..doc.len() {
            let run = query[qi..]
                .iter()
                .zip(&doc[di..])
                .take_while(|(q, d)| q == d)
                .count();
            best = best.max(run);
        }
    }
    best
}

/// Blend each score with its cross-encoder score and re-sort.
pub fn rerank(mut docs: Vec<ScoredDocument>, query: &str) -> Vec<ScoredDocument> {
    for doc in &mut docs {
        let cross = cross_encoder_score(query, &doc.result.document.searchable_text());
        doc.relevance_score =
            (ORIGINAL_SHARE * doc.relevance_score + (1.0 - ORIGINAL_SHARE) * cross).clamp(0.0, 1.0);
        doc.annotate("cross_encoder_score", cross);
    }
    docs.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    docs
}

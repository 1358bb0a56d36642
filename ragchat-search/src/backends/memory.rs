//! In-memory search backend.
//!
//! Scores documents by query-term coverage: the fraction of distinct,
//! non-stop-word query terms that appear in the document's title or
//! content. Useful as a local provider, for the CLI, and in tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::backend::SearchBackend;
use crate::error::SearchError;
use crate::relevance::text::{query_terms, word_set};
use crate::types::{Document, SearchOptions, UnifiedSearchResult};

/// A thread-safe document store answering term-overlap queries.
#[derive(Debug)]
pub struct InMemoryBackend {
    name: String,
    documents: RwLock<Vec<Document>>,
    available: AtomicBool,
}

impl InMemoryBackend {
    /// Create an empty backend reporting itself as `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Create a backend pre-loaded with `documents`.
    pub fn with_documents(name: impl Into<String>, documents: Vec<Document>) -> Self {
        let backend = Self::new(name);
        *backend
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner) = documents;
        backend
    }

    /// Add or replace a document (matched by id).
    pub fn upsert(&self, document: Document) {
        let mut docs = self
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match docs.iter_mut().find(|d| d.id == document.id) {
            Some(existing) => *existing = document,
            None => docs.push(document),
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when no documents are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Toggle availability; an unavailable backend fails every search.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    fn score(terms: &[String], document: &Document) -> f64 {
        if terms.is_empty() {
            return 0.0;
        }
        let words: HashSet<String> = word_set(&document.searchable_text());
        let matched = terms.iter().filter(|t| words.contains(*t)).count();
        matched as f64 / terms.len() as f64
    }
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<UnifiedSearchResult>, SearchError> {
        tracing::trace!(backend = %self.name, query, "in-memory search");

        if !self.available.load(Ordering::Relaxed) {
            return Err(SearchError::backend(format!(
                "{} backend unavailable",
                self.name
            )));
        }

        let terms = query_terms(query);
        let docs = self
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut hits: Vec<UnifiedSearchResult> = docs
            .iter()
            .filter_map(|doc| {
                let similarity = Self::score(&terms, doc);
                (similarity > 0.0 && similarity >= options.threshold)
                    .then(|| UnifiedSearchResult::new(doc.clone(), similarity, self.name.clone()))
            })
            .collect();

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(options.max_results);

        tracing::debug!(backend = %self.name, count = hits.len(), "in-memory search complete");
        Ok(hits)
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn health_check(&self) -> Option<bool> {
        Some(self.available.load(Ordering::Relaxed))
    }
}

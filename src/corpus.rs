//! JSON document corpus loading.
//!
//! A corpus file maps source names to document lists:
//!
//! ```json
//! { "memory": [{ "id": "d1", "content": "..." }], "api": [] }
//! ```
//!
//! Each entry becomes one [`InMemoryBackend`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use ragchat_search::backends::InMemoryBackend;
use ragchat_search::{Document, SearchBackend};

use crate::error::{AppError, Result};

/// Parse a corpus from JSON text.
///
/// # Errors
///
/// Returns [`AppError::Corpus`] if the text is not a valid corpus.
pub fn parse_corpus(json: &str) -> Result<Vec<Arc<dyn SearchBackend>>> {
    let sources: BTreeMap<String, Vec<Document>> =
        serde_json::from_str(json).map_err(|e| AppError::Corpus(e.to_string()))?;
    if sources.is_empty() {
        return Err(AppError::Corpus("corpus names no sources".into()));
    }
    Ok(sources
        .into_iter()
        .map(|(name, documents)| {
            tracing::debug!(source = %name, documents = documents.len(), "loaded corpus source");
            Arc::new(InMemoryBackend::with_documents(name, documents)) as Arc<dyn SearchBackend>
        })
        .collect())
}

/// Load a corpus file.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read, or
/// [`AppError::Corpus`] if it is not a valid corpus.
pub fn load_corpus(path: &Path) -> Result<Vec<Arc<dyn SearchBackend>>> {
    let content = std::fs::read_to_string(path)?;
    parse_corpus(&content)
}

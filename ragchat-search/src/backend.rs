//! Trait definition for pluggable search backends.
//!
//! API-, database- and memory-backed providers implement [`SearchBackend`]
//! so the orchestrator can fan a query out to them uniformly. The trait is
//! object safe; backends are registered as `Arc<dyn SearchBackend>`.

use async_trait::async_trait;

use crate::error::SearchError;
use crate::types::{SearchOptions, UnifiedSearchResult};

/// A pluggable search backend.
///
/// Implementations own their transport (HTTP, SQL, in-process) and report
/// failures as [`SearchError`] values whose messages carry enough detail
/// (status codes, driver messages) for classification.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Stable source name, e.g. `"api"`, `"database"`, `"memory"`.
    fn name(&self) -> &str;

    /// Run a query and return at most `options.max_results` hits with
    /// similarity at or above `options.threshold`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError`] when the backend cannot answer.
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<UnifiedSearchResult>, SearchError>;

    /// Cheap readiness probe.
    async fn is_available(&self) -> bool {
        true
    }

    /// Deeper health probe. `None` means the backend has none and callers
    /// should fall back to [`SearchBackend::is_available`].
    async fn health_check(&self) -> Option<bool> {
        None
    }
}

//! Application-wide search services.
//!
//! [`SearchServices`] is created once at startup and passed to whatever
//! needs it. It owns the degradation tracker, the orchestrator and the
//! orchestrator's background tasks.

use std::collections::HashMap;
use std::sync::Arc;

use ragchat_search::{
    DegradationStatus, DegradationTracker, EnhancedSearchRequest, EnhancedSearchResponse,
    RelevanceEngine, SearchBackend, SearchOrchestrator, SourceHealth,
};

use crate::config::AppConfig;
use crate::error::{AppError, Result};

/// Running search stack.
#[derive(Debug)]
pub struct SearchServices {
    degradation: Arc<DegradationTracker>,
    orchestrator: SearchOrchestrator,
}

impl SearchServices {
    /// Validate `config`, register `backends` as sources and start
    /// background health polling.
    ///
    /// With an empty source list in `config` every backend becomes a
    /// source of its own. Otherwise only the listed sources are
    /// registered, each with its configured fallbacks.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] for invalid settings or for a source
    /// or fallback name that matches no backend.
    pub fn start(config: &AppConfig, backends: Vec<Arc<dyn SearchBackend>>) -> Result<Self> {
        config.validate()?;

        let degradation = Arc::new(DegradationTracker::with_max_reasons(
            config.search.max_recent_errors,
        ));
        let orchestrator = SearchOrchestrator::new(
            config.search.clone(),
            config.resilience.clone(),
            Arc::clone(&degradation),
        )?
        .with_relevance_engine(RelevanceEngine::new(config.ranking.clone()));

        let by_name: HashMap<String, Arc<dyn SearchBackend>> = backends
            .into_iter()
            .map(|b| (b.name().to_string(), b))
            .collect();
        let lookup = |name: &str| {
            by_name
                .get(name)
                .cloned()
                .ok_or_else(|| AppError::Config(format!("no backend named {name}")))
        };

        if config.sources.is_empty() {
            for backend in by_name.values() {
                orchestrator.register_source(Arc::clone(backend))?;
            }
        } else {
            for source in &config.sources {
                let fallbacks = source
                    .fallbacks
                    .iter()
                    .map(|name| lookup(name))
                    .collect::<Result<Vec<_>>>()?;
                orchestrator.register_source_with_fallbacks(lookup(&source.name)?, fallbacks)?;
            }
        }

        orchestrator.start_background_tasks();
        tracing::info!(sources = ?orchestrator.source_names(), "search services started");
        Ok(Self {
            degradation,
            orchestrator,
        })
    }

    /// The orchestrator.
    pub fn orchestrator(&self) -> &SearchOrchestrator {
        &self.orchestrator
    }

    /// Ranked search across sources.
    pub async fn search(&self, request: &EnhancedSearchRequest) -> EnhancedSearchResponse {
        self.orchestrator.search_enhanced(request).await
    }

    /// Per-source health.
    pub async fn health(&self) -> Vec<SourceHealth> {
        self.orchestrator.source_health().await
    }

    /// Current service level.
    pub fn degradation(&self) -> DegradationStatus {
        self.degradation.status()
    }

    /// Stop background tasks.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
        tracing::info!("search services stopped");
    }
}

//! Ordered fallback provider chain.
//!
//! A [`FallbackManager`] holds providers sorted by ascending priority and a
//! [`FallbackCache`] of last-good values. [`FallbackManager::execute`]:
//!
//! 1. returns a fresh cached value for the cache key, if any;
//! 2. tries each available provider in priority order, each call bounded
//!    by the fallback timeout; errors and timeouts are misses, and the
//!    first value is cached and returned;
//! 3. once every provider has missed, resolves according to the
//!    configured [`FallbackMode`].
//!
//! In `partial` mode step 2 is a single concurrent pass instead: every
//! available provider is called once and the answers are merged when
//! enough of them produced a value. No provider is ever called twice for
//! one resolution.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use crate::config::{FallbackConfig, FallbackMode};
use crate::error::{Result, SearchError};

use super::fallback_cache::FallbackCache;

/// Upper bound on a provider availability probe.
pub const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// A value type the fallback chain can synthesise.
pub trait FallbackPayload: Clone + Send + Sync + 'static {
    /// The value returned when nothing else is available.
    fn empty() -> Self;

    /// Combine values from several providers, highest priority first.
    ///
    /// The default keeps the highest-priority value.
    fn merge_partial(parts: Vec<Self>) -> Option<Self> {
        parts.into_iter().next()
    }
}

impl<U: Clone + Send + Sync + 'static> FallbackPayload for Vec<U> {
    fn empty() -> Self {
        Vec::new()
    }

    fn merge_partial(parts: Vec<Self>) -> Option<Self> {
        if parts.is_empty() {
            return None;
        }
        Some(parts.into_iter().flatten().collect())
    }
}

/// One alternative way of producing a `T` from arguments `A`.
#[async_trait]
pub trait ServiceProvider<A, T>: Send + Sync {
    /// Provider name for logs and health reports.
    fn name(&self) -> &str;

    /// Lower is tried first.
    fn priority(&self) -> u32;

    /// Cheap availability probe.
    async fn is_available(&self) -> bool {
        true
    }

    /// Produce a value, `Ok(None)` when the provider has nothing.
    async fn execute(&self, args: &A) -> Result<Option<T>>;

    /// Deeper health probe, `None` when unsupported.
    async fn health_check(&self) -> Option<bool> {
        None
    }

    /// Fixed value served in graceful mode when everything else misses.
    fn static_fallback(&self) -> Option<T> {
        None
    }
}

/// Where a resolved fallback value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackOutcome {
    /// Fresh entry in the last-good cache.
    Cached,
    /// A provider answered.
    Provider,
    /// Several providers' answers merged.
    Merged,
    /// Expired entry in the last-good cache.
    Stale,
    /// A provider's static fallback.
    Static,
    /// Nothing answered; the payload's empty value stands in.
    Empty,
}

impl FallbackOutcome {
    /// Whether the value carries real content rather than a placeholder.
    pub fn is_answer(self) -> bool {
        self != Self::Empty
    }
}

/// Shared handle to a provider.
pub type SharedProvider<A, T> = Arc<dyn ServiceProvider<A, T>>;

/// Priority-ordered provider chain backed by a last-good cache.
pub struct FallbackManager<A, T> {
    config: FallbackConfig,
    providers: RwLock<Vec<SharedProvider<A, T>>>,
    cache: Arc<FallbackCache<T>>,
}

impl<A, T> fmt::Debug for FallbackManager<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        f.debug_struct("FallbackManager")
            .field("mode", &self.config.mode)
            .field("providers", &names)
            .finish_non_exhaustive()
    }
}

impl<A, T> FallbackManager<A, T>
where
    A: Send + Sync + 'static,
    T: FallbackPayload,
{
    /// Create an empty chain after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Config`] if the settings are invalid.
    pub fn new(config: FallbackConfig) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(FallbackCache::new(config.max_cache_size, config.cache_ttl()));
        Ok(Self {
            config,
            providers: RwLock::new(Vec::new()),
            cache,
        })
    }

    /// Active settings.
    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// The last-good cache.
    pub fn cache(&self) -> &Arc<FallbackCache<T>> {
        &self.cache
    }

    /// Register a provider, keeping the chain sorted by priority. Equal
    /// priorities keep registration order.
    pub fn add_provider(&self, provider: SharedProvider<A, T>) {
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(
            provider = provider.name(),
            priority = provider.priority(),
            "registered fallback provider"
        );
        providers.push(provider);
        providers.sort_by_key(|p| p.priority());
    }

    /// Providers in the order they are tried.
    pub fn providers(&self) -> Vec<SharedProvider<A, T>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve `operation` through the chain.
    ///
    /// # Errors
    ///
    /// In `fail_fast` mode, the last provider error (or
    /// [`SearchError::AllProvidersFailed`]). In `cached` and `partial` mode,
    /// [`SearchError::AllProvidersFailed`] when there is nothing to serve.
    /// `graceful` and `silent` never fail.
    pub async fn execute(&self, operation: &str, args: &A, cache_key: Option<&str>) -> Result<T> {
        self.execute_traced(operation, args, cache_key)
            .await
            .map(|(value, _)| value)
    }

    /// [`FallbackManager::execute`], also reporting where the value came
    /// from.
    ///
    /// # Errors
    ///
    /// As for [`FallbackManager::execute`].
    pub async fn execute_traced(
        &self,
        operation: &str,
        args: &A,
        cache_key: Option<&str>,
    ) -> Result<(T, FallbackOutcome)> {
        let cache_key = cache_key.filter(|_| self.config.enable_caching);

        if let Some(key) = cache_key {
            if self.cache.has(key) {
                if let Some(value) = self.cache.get(key) {
                    tracing::debug!(operation, "fallback served from cache");
                    return Ok((value, FallbackOutcome::Cached));
                }
            }
        }

        let providers = self.providers();
        if self.config.mode == FallbackMode::Partial && self.config.enable_partial_results {
            return match self.partial(operation, args, &providers).await {
                Some(value) => {
                    if let Some(key) = cache_key {
                        self.cache.set(key, value.clone(), None);
                    }
                    Ok((value, FallbackOutcome::Merged))
                }
                None => self.resolve(operation, cache_key, &providers, None),
            };
        }

        let mut last_error: Option<SearchError> = None;

        for provider in &providers {
            if !probe_available(provider.as_ref()).await {
                tracing::debug!(operation, provider = provider.name(), "provider unavailable, skipping");
                continue;
            }
            match self.call_provider(provider.as_ref(), args).await {
                Ok(Some(value)) => {
                    if let Some(key) = cache_key {
                        self.cache.set(key, value.clone(), None);
                    }
                    tracing::info!(operation, provider = provider.name(), "fallback provider answered");
                    return Ok((value, FallbackOutcome::Provider));
                }
                Ok(None) => {
                    tracing::debug!(operation, provider = provider.name(), "provider returned nothing");
                }
                Err(err) => {
                    tracing::warn!(operation, provider = provider.name(), error = %err, "fallback provider failed");
                    last_error = Some(err);
                }
            }
        }

        self.resolve(operation, cache_key, &providers, last_error)
    }

    async fn call_provider(&self, provider: &dyn ServiceProvider<A, T>, args: &A) -> Result<Option<T>> {
        let limit = self.config.fallback_timeout();
        match tokio::time::timeout(limit, provider.execute(args)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SearchError::Timeout(format!(
                "provider {} exceeded {}ms",
                provider.name(),
                limit.as_millis()
            ))),
        }
    }

    /// Every provider has missed; settle according to the mode without
    /// calling any of them again.
    fn resolve(
        &self,
        operation: &str,
        cache_key: Option<&str>,
        providers: &[SharedProvider<A, T>],
        last_error: Option<SearchError>,
    ) -> Result<(T, FallbackOutcome)> {
        let exhausted = || {
            SearchError::AllProvidersFailed(format!("{operation}: no provider produced a value"))
        };
        let stale = || {
            cache_key
                .and_then(|key| self.cache.get_stale(key))
                .map(|value| (value, FallbackOutcome::Stale))
        };

        match self.config.mode {
            FallbackMode::FailFast => Err(last_error.unwrap_or_else(exhausted)),
            FallbackMode::Silent => Ok((T::empty(), FallbackOutcome::Empty)),
            FallbackMode::Cached | FallbackMode::Partial => stale().ok_or_else(exhausted),
            FallbackMode::Graceful => {
                if let Some(served) = stale() {
                    tracing::info!(operation, "serving stale cached value");
                    return Ok(served);
                }
                // The pass above already saw every provider miss, so there
                // is nothing left to merge.
                if let Some(value) = providers.iter().find_map(|p| p.static_fallback()) {
                    tracing::info!(operation, "serving static fallback");
                    return Ok((value, FallbackOutcome::Static));
                }
                tracing::warn!(operation, "every fallback missed, returning empty result");
                Ok((T::empty(), FallbackOutcome::Empty))
            }
        }
    }

    /// Call every available provider once, concurrently, and merge what
    /// came back if enough of them answered. Unavailable providers count
    /// toward the total.
    async fn partial(&self, operation: &str, args: &A, providers: &[SharedProvider<A, T>]) -> Option<T> {
        if !self.config.enable_partial_results || providers.is_empty() {
            return None;
        }

        let attempts = providers.iter().map(|provider| async move {
            if !probe_available(provider.as_ref()).await {
                return None;
            }
            self.call_provider(provider.as_ref(), args).await.ok().flatten()
        });
        let values: Vec<T> = join_all(attempts).await.into_iter().flatten().collect();

        let ratio = values.len() as f64 / providers.len() as f64;
        if values.is_empty() || ratio < self.config.partial_results_threshold {
            tracing::debug!(
                operation,
                successful = values.len(),
                total = providers.len(),
                "not enough providers for a partial result"
            );
            return None;
        }
        tracing::info!(
            operation,
            successful = values.len(),
            total = providers.len(),
            "serving partial result"
        );
        T::merge_partial(values)
    }

    /// Health of every provider, in chain order. Providers without a health
    /// probe report their availability.
    pub async fn health_check_all(&self) -> Vec<(String, bool)> {
        let providers = self.providers();
        let checks = providers.iter().map(|provider| async move {
            let healthy = match tokio::time::timeout(AVAILABILITY_TIMEOUT, provider.health_check()).await {
                Ok(Some(healthy)) => healthy,
                Ok(None) => probe_available(provider.as_ref()).await,
                Err(_) => false,
            };
            (provider.name().to_string(), healthy)
        });
        join_all(checks).await
    }
}

async fn probe_available<A, T>(provider: &dyn ServiceProvider<A, T>) -> bool {
    tokio::time::timeout(AVAILABILITY_TIMEOUT, provider.is_available())
        .await
        .unwrap_or(false)
}

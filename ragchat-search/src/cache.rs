//! In-memory cache of ranked search responses.
//!
//! Keyed by the normalised query, the sorted source set and a hash of every
//! parameter that affects ranking. Uses [`moka`] for async-friendly caching
//! with a TTL and bounded capacity. Each orchestrator owns its own cache.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;

use crate::types::UnifiedSearchResult;

/// Composite cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Lowercased, trimmed, whitespace-collapsed query.
    query: String,
    /// Hash of the sorted source names.
    source_hash: u64,
    /// Hash of the remaining request parameters.
    params_hash: u64,
}

impl CacheKey {
    /// Build a deterministic key. Source order does not matter; `params`
    /// is anything serialisable that changes the answer (limits, context,
    /// ranking options).
    pub fn new<P: Serialize>(query: &str, sources: &[String], params: &P) -> Self {
        let query = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        let params_hash = match serde_json::to_string(params) {
            Ok(encoded) => hash_one(&encoded),
            // Unserialisable params still get a stable, if coarse, key.
            Err(_) => 0,
        };
        Self {
            query,
            source_hash: hash_sources(sources),
            params_hash,
        }
    }
}

fn hash_sources(sources: &[String]) -> u64 {
    let mut sorted: Vec<&str> = sources.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    let mut hasher = DefaultHasher::new();
    for source in sorted {
        source.hash(&mut hasher);
    }
    hasher.finish()
}

fn hash_one(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Bounded TTL cache of ranked results.
#[derive(Clone)]
pub struct ResultCache {
    inner: Cache<CacheKey, Vec<UnifiedSearchResult>>,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

impl ResultCache {
    /// Cache holding at most `capacity` responses for `ttl` each.
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Cached results for `key`, if fresh.
    pub async fn get(&self, key: &CacheKey) -> Option<Vec<UnifiedSearchResult>> {
        self.inner.get(key).await
    }

    /// Store results under `key`.
    pub async fn insert(&self, key: CacheKey, results: Vec<UnifiedSearchResult>) {
        self.inner.insert(key, results).await;
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.inner.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Document;

    fn sources(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn key_ignores_source_order() {
        let a = CacheKey::new("deploy", &sources(&["api", "memory"]), &10);
        let b = CacheKey::new("deploy", &sources(&["memory", "api"]), &10);
        assert_eq!(a, b);
    }

    #[test]
    fn key_normalises_query() {
        let a = CacheKey::new("  Deploy   CONFIG ", &sources(&["api"]), &10);
        let b = CacheKey::new("deploy config", &sources(&["api"]), &10);
        assert_eq!(a, b);
    }

    #[test]
    fn key_differs_by_sources_and_params() {
        let base = CacheKey::new("deploy", &sources(&["api"]), &(10, 0.5));
        assert_ne!(base, CacheKey::new("deploy", &sources(&["database"]), &(10, 0.5)));
        assert_ne!(base, CacheKey::new("deploy", &sources(&["api"]), &(5, 0.5)));
        assert_ne!(base, CacheKey::new("deploy", &sources(&["api"]), &(10, 0.7)));
    }

    #[tokio::test]
    async fn insert_then_get() {
        let cache = ResultCache::new(10, Duration::from_secs(60));
        let key = CacheKey::new("deploy", &sources(&["api"]), &10);
        assert!(cache.get(&key).await.is_none());

        let hit = UnifiedSearchResult::new(Document::new("d1", "deploy"), 0.9, "api");
        cache.insert(key.clone(), vec![hit]).await;
        let cached = cache.get(&key).await.expect("cached");
        assert_eq!(cached[0].document.id, "d1");

        cache.clear();
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn caches_are_independent() {
        let a = ResultCache::new(10, Duration::from_secs(60));
        let b = ResultCache::new(10, Duration::from_secs(60));
        let key = CacheKey::new("deploy", &sources(&["api"]), &10);
        a.insert(key.clone(), Vec::new()).await;
        assert!(a.get(&key).await.is_some());
        assert!(b.get(&key).await.is_none());
    }
}

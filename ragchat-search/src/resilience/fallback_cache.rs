//! Bounded, TTL-based store of last-good values.
//!
//! Entries expire individually. Expired entries are misses for [`get`] and
//! are removed lazily on lookup or by the background sweep, but remain
//! readable through [`get_stale`] until then, so a fallback chain can serve
//! old data during an outage.
//!
//! When a new key is inserted at capacity, the entry with the oldest
//! insertion time is evicted. Overwriting an existing key never evicts.
//!
//! [`get`]: FallbackCache::get
//! [`get_stale`]: FallbackCache::get_stale

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A cached value with its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// Cached value.
    pub data: T,
    /// When the value was stored.
    pub inserted_at: Instant,
    /// When the value stops being fresh.
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently stored, fresh or not.
    pub size: usize,
    /// Capacity.
    pub max_size: usize,
    /// Fresh lookups that found a value.
    pub hits: u64,
    /// Lookups that found nothing fresh.
    pub misses: u64,
    /// Entries removed to make room.
    pub evictions: u64,
    /// Entries removed because they expired.
    pub expirations: u64,
}

#[derive(Debug)]
struct CacheInner<T> {
    entries: HashMap<String, CacheEntry<T>>,
    stats: CacheStats,
}

/// Thread-safe last-good cache.
#[derive(Debug)]
pub struct FallbackCache<T> {
    max_size: usize,
    default_ttl: Duration,
    inner: Mutex<CacheInner<T>>,
}

impl<T: Clone> FallbackCache<T> {
    /// Create a cache holding at most `max_size` entries (minimum 1).
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            max_size,
            default_ttl,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                stats: CacheStats {
                    max_size,
                    ..CacheStats::default()
                },
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` under `key` for `ttl` (or the default TTL).
    pub fn set(&self, key: impl Into<String>, value: T, ttl: Option<Duration>) {
        let key = key.into();
        let now = Instant::now();
        let entry = CacheEntry {
            data: value,
            inserted_at: now,
            expires_at: now + ttl.unwrap_or(self.default_ttl),
        };

        let mut inner = self.lock();
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_size {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
                inner.stats.evictions += 1;
                tracing::trace!(key = %oldest, "evicted oldest fallback cache entry");
            }
        }
        inner.entries.insert(key, entry);
    }

    /// Fresh value for `key`. An expired entry is removed and counts as a
    /// miss.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.entries.get(key).map(|e| e.is_expired(now)) {
            None => {
                inner.stats.misses += 1;
                None
            }
            Some(true) => {
                inner.entries.remove(key);
                inner.stats.expirations += 1;
                inner.stats.misses += 1;
                None
            }
            Some(false) => {
                inner.stats.hits += 1;
                inner.entries.get(key).map(|e| e.data.clone())
            }
        }
    }

    /// Value for `key` whether or not it has expired, as long as it has not
    /// been removed yet. Does not touch the hit/miss counters.
    pub fn get_stale(&self, key: &str) -> Option<T> {
        self.lock().entries.get(key).map(|e| e.data.clone())
    }

    /// Whether a fresh value exists for `key`.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Remove `key`. Returns `true` if it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Remove every entry. Counters are kept.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            size: inner.entries.len(),
            ..inner.stats
        }
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| !e.is_expired(now));
        let removed = before - inner.entries.len();
        inner.stats.expirations += removed as u64;
        removed
    }
}

impl<T: Clone + Send + Sync + 'static> FallbackCache<T> {
    /// Spawn a task that calls [`FallbackCache::sweep_expired`] every
    /// `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "swept expired fallback cache entries");
                        }
                    }
                }
            }
        })
    }
}

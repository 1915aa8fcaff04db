//! Generic TTL cache and the caching tier built from it.

pub mod tier;

pub use tier::{CacheTier, CacheTierStats};

use moka::future::Cache as MokaCache;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// Hit/miss counters and live size of one cache.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: u64,
}

/// Bounded map where every entry expires `ttl` after insertion.
///
/// Expiry is checked per entry on access, so no reader waits on a
/// cache-wide lock. The caching tier holds one instance per concern,
/// each with its own lifetime.
pub struct Cache<K, V> {
    inner: MokaCache<K, V>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> Cache<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self::build(max_entries, ttl, false)
    }

    /// Like [`Cache::new`], but also allows [`Cache::invalidate_if`].
    pub fn with_predicates(max_entries: usize, ttl: Duration) -> Self {
        Self::build(max_entries, ttl, true)
    }

    fn build(max_entries: usize, ttl: Duration, predicates: bool) -> Self {
        let mut builder = MokaCache::builder()
            .max_capacity(max_entries as u64)
            .time_to_live(ttl);
        if predicates {
            builder = builder.support_invalidation_closures();
        }

        Self {
            inner: builder.build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Live value for `key`; expired entries count as misses.
    pub async fn get(&self, key: &K) -> Option<V> {
        let found = self.inner.get(key).await;
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        trace!(hit = found.is_some(), "Cache lookup");
        found
    }

    /// Insert or replace, evicting the least recently used entry when full.
    pub async fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value).await;
    }

    /// Return the cached value or run `init` once for all concurrent callers
    /// of the same key. Errors are not cached.
    pub async fn try_get_with<F, E>(&self, key: K, init: F) -> Result<V, Arc<E>>
    where
        F: Future<Output = Result<V, E>>,
        E: Send + Sync + 'static,
    {
        if let Some(value) = self.inner.get(&key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.inner.try_get_with(key, init).await
    }

    pub async fn remove(&self, key: &K) -> Option<V> {
        self.inner.remove(key).await
    }

    /// Drop every entry matching `predicate`. Only valid on caches built with
    /// [`Cache::with_predicates`]; elsewhere it logs and does nothing.
    pub fn invalidate_if<F>(&self, predicate: F)
    where
        F: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        if let Err(e) = self.inner.invalidate_entries_if(predicate) {
            warn!(error = %e, "Predicate invalidation not supported by this cache");
        }
    }

    /// Check if a live entry exists without touching hit/miss counters.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Snapshot of the live entries.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.inner
            .iter()
            .map(|(k, v)| ((*k).clone(), v))
            .collect()
    }

    /// Apply pending evictions so the `stats` size is exact.
    #[cfg(test)]
    pub async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.inner.entry_count(),
        }
    }
}

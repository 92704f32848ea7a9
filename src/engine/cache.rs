//! Result caching.
//!
//! Results are memoized per request shape plus an *invalidation key*
//! derived from the database file's modification time. Any write to the
//! file changes the key, so stale entries die on lookup without an
//! explicit invalidation call. Entries also expire after a fixed TTL and
//! are LRU-evicted past a size bound.
//!
//! Prepared-statement caching is handled per connection by `rusqlite`'s
//! statement cache (`prepare_cached`); the executor routes every query
//! through it so repeated query shapes skip recompilation.
//!
//! # Lock Poisoning
//!
//! Fail-open semantics: a poisoned lock turns `get` into a miss and `put`
//! into a no-op. Caching is a performance optimization; serving a live
//! query is always a valid fallback.

use crate::models::QueryResult;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// One cached result with its freshness metadata.
#[derive(Debug, Clone)]
struct CacheEntry {
    result: QueryResult,
    /// File-modification fingerprint at store time.
    invalidation_key: u128,
    stored_at: Instant,
}

/// TTL + LRU cache of executed query results.
pub struct ResultCache {
    entries: RwLock<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl ResultCache {
    /// Creates a cache bounded to `capacity` entries with the given TTL.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Looks up a result for `request_key`.
    ///
    /// Misses when the entry is absent, older than the TTL, or stored under
    /// a different invalidation key (the file changed since it was cached).
    /// Stale entries are dropped on lookup, never served.
    pub fn get(&self, request_key: &str, invalidation_key: u128) -> Option<QueryResult> {
        let Ok(mut entries) = self.entries.write() else {
            tracing::warn!("result cache lock poisoned, treating as miss");
            return None;
        };

        let entry = entries.get(request_key)?;
        if entry.invalidation_key != invalidation_key || entry.stored_at.elapsed() > self.ttl {
            entries.pop(request_key);
            metrics::counter!("tabserve_result_cache_stale_total").increment(1);
            return None;
        }
        metrics::counter!("tabserve_result_cache_hit_total").increment(1);
        Some(entry.result.clone().as_cache_hit())
    }

    /// Stores a result under `request_key`.
    ///
    /// Past the capacity bound the least-recently-used entry is evicted.
    pub fn put(&self, request_key: String, invalidation_key: u128, result: QueryResult) {
        let Ok(mut entries) = self.entries.write() else {
            tracing::warn!("result cache lock poisoned, skipping store");
            return;
        };
        if entries.len() == entries.cap().get() {
            metrics::counter!("tabserve_result_cache_evicted_total").increment(1);
        }
        entries.put(
            request_key,
            CacheEntry {
                result,
                invalidation_key,
                stored_at: Instant::now(),
            },
        );
    }

    /// Number of live entries (stale entries included until next lookup).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// True when the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

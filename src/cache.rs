//! Bounded TTL response cache.
//!
//! Memoizes ranked results under a query fingerprint for a short window.
//! The cache is an explicit owned component with injected TTL and capacity,
//! backed by an LRU map. Eviction and expiry both surface as a plain miss;
//! callers cannot (and must not) distinguish them.

use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::{Language, QueryFilters, RankedResult};

/// Derive the cache key for a query.
///
/// Computed over the *normalized* query text plus language, k, and active
/// filters — two raw queries that normalize identically share an entry.
pub fn fingerprint(
    normalized_query: &str,
    language: Language,
    k: usize,
    filters: &QueryFilters,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_query.as_bytes());
    hasher.update([0u8]);
    hasher.update(language.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update((k as u64).to_le_bytes());
    hasher.update([filters.verified_only as u8]);
    if let Some(source) = &filters.source_name {
        hasher.update(source.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

struct CachedEntry {
    result: RankedResult,
    expires_at: Instant,
}

/// LRU response cache with per-entry expiry.
pub struct ResponseCache {
    entries: Mutex<LruCache<String, CachedEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a cached result. Expired entries are dropped and reported
    /// as a miss.
    pub fn get(&self, fingerprint: &str) -> Option<RankedResult> {
        let mut entries = self.entries.lock().unwrap();

        if let Some(entry) = entries.get(fingerprint) {
            if entry.expires_at > Instant::now() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.result.clone());
            }
            entries.pop(fingerprint);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, fingerprint: String, result: RankedResult) {
        let mut entries = self.entries.lock().unwrap();
        entries.put(
            fingerprint,
            CachedEntry {
                result,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn invalidate(&self, fingerprint: &str) {
        self.entries.lock().unwrap().pop(fingerprint);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Fraction of lookups served from cache since startup; 0.0 before the
    /// first lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

//! # Cache
//!
//! An explicit, injectable cache for collaborator lookups.
//!
//! Keys are typed: operation name, requester fingerprint and a digest of
//! the parameters. Results visible to one requester are never served to a
//! requester with a different fingerprint. The backing store is a trait so
//! callers can swap the bundled in-memory TTL/LRU store for something else,
//! and tests construct a fresh instance each time.

use crate::MetaError;
use crate::config::CacheConfig;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Typed cache key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    pub operation: String,
    pub requester: String,
    /// blake3 of the parameters, first 16 hex characters.
    pub params: String,
}

impl CacheKey {
    /// Build a key, hashing `params` (each part followed by a 0 byte).
    #[must_use]
    pub fn new(operation: &str, requester: &str, params: &[&str]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for p in params {
            hasher.update(p.as_bytes());
            hasher.update(&[0]);
        }
        Self {
            operation: operation.to_string(),
            requester: requester.to_string(),
            params: hasher.finalize().to_hex().as_str()[..16].to_string(),
        }
    }

    /// Flat string form for string-keyed stores.
    #[must_use]
    pub fn to_storage_key(&self) -> String {
        format!("{}:{}:{}", self.operation, self.requester, self.params)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})@{}", self.operation, self.params, self.requester)
    }
}

/// Pluggable cache backing store.
pub trait CacheStore<V: Clone> {
    /// A live entry, or `None` when absent or expired.
    fn get(&self, key: &CacheKey) -> Option<V>;

    fn put(&self, key: CacheKey, value: V);

    /// Drop every entry.
    fn clear(&self);

    /// Return the cached value or compute, store and return it.
    ///
    /// Errors from `compute` are returned and nothing is stored.
    fn get_or_try_insert<F>(&self, key: CacheKey, compute: F) -> Result<V, MetaError>
    where
        F: FnOnce() -> Result<V, MetaError>,
    {
        if let Some(v) = self.get(&key) {
            return Ok(v);
        }
        let v = compute()?;
        self.put(key, v.clone());
        Ok(v)
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
    last_used: u64,
}

#[derive(Debug)]
struct Inner<V> {
    entries: BTreeMap<CacheKey, Entry<V>>,
    tick: u64,
    stats: CacheStats,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// In-memory store with a TTL and an LRU capacity bound.
#[derive(Debug)]
pub struct MemoryCache<V> {
    inner: Mutex<Inner<V>>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Clone> MemoryCache<V> {
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                tick: 0,
                stats: CacheStats::default(),
            }),
            ttl,
            capacity: capacity.max(1),
        }
    }

    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.capacity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<V>> {
        // Entries are replaced whole, so a poisoned map is still consistent.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<V: Clone> CacheStore<V> for MemoryCache<V> {
    fn get(&self, key: &CacheKey) -> Option<V> {
        let mut inner = self.lock();
        inner.tick = inner.tick.wrapping_add(1);
        let tick = inner.tick;
        let now = Instant::now();

        if inner.entries.get(key).is_some_and(|e| e.expires_at <= now) {
            inner.entries.remove(key);
        }
        let hit = inner.entries.get_mut(key).map(|entry| {
            entry.last_used = tick;
            entry.value.clone()
        });
        if hit.is_some() {
            inner.stats.hits += 1;
            tracing::trace!(key = %key, "cache hit");
        } else {
            inner.stats.misses += 1;
            tracing::trace!(key = %key, "cache miss");
        }
        hit
    }

    fn put(&self, key: CacheKey, value: V) {
        let mut inner = self.lock();
        inner.tick = inner.tick.wrapping_add(1);
        let tick = inner.tick;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
                inner.stats.evictions += 1;
            }
        }
        inner.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
                last_used: tick,
            },
        );
    }

    fn clear(&self) {
        self.lock().entries.clear();
    }
}

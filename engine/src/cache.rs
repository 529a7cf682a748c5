//! Load-scoped lookup cache.
//!
//! Adapters that resolve the same backing-store object many times during one
//! `load()` (site ids, device roles, parent references) keep a [`LoadCache`]
//! and compute each value at most once. The cache is scoped to a single load:
//! `invalidate` must run before the next load starts, otherwise stale ids
//! leak across runs.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Hit/miss counters for one cache, reset on [`LoadCache::invalidate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache, 0.0 when unused.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A compute-if-absent map for one adapter load.
///
/// Values are whatever the adapter resolves repeatedly, typically backing
/// store primary keys. Keys are free-form; adapters that cache several kinds
/// of object prefix the key with the object kind (`"site:lax"`).
#[derive(Debug, Clone, Default)]
pub struct LoadCache<V> {
    entries: HashMap<String, V>,
    stats: CacheStats,
}

impl<V> LoadCache<V> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Look up `key`, computing and storing the value on a miss.
    ///
    /// The compute closure runs at most once per key per load. A failed
    /// computation stores nothing, so a later lookup retries it.
    pub fn get_or_insert_with<F>(&mut self, key: impl Into<String>, compute: F) -> Result<&V>
    where
        F: FnOnce() -> Result<V>,
    {
        match self.entries.entry(key.into()) {
            Entry::Occupied(entry) => {
                self.stats.hits += 1;
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => {
                self.stats.misses += 1;
                Ok(entry.insert(compute()?))
            }
        }
    }

    /// Look up `key` without computing.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        match self.entries.get(key) {
            Some(value) => {
                self.stats.hits += 1;
                Some(value)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Store a value for a key that must not be cached yet.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Result<()> {
        let key = key.into();
        match self.entries.entry(key) {
            Entry::Occupied(entry) => Err(Error::AlreadyExists {
                model: "cache entry".into(),
                uid: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(())
            }
        }
    }

    /// Drop every entry and reset the counters. Call before each load.
    pub fn invalidate(&mut self) {
        self.entries.clear();
        self.stats = CacheStats::default();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counters since the last `invalidate`.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

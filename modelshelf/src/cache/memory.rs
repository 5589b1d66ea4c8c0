//! In-memory cache tier with TTL and LRU eviction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::stats::CacheStats;
use super::types::{path_is_ancestor, CacheKey, FreshnessToken};

/// Entry in the memory cache.
#[derive(Debug, Clone)]
struct MemoryEntry {
    /// Structured key, kept for scoped invalidation
    key: CacheKey,
    /// Serialized payload; every hit hands out a fresh copy
    payload: Vec<u8>,
    /// Freshness token the payload was stored with
    token: Option<FreshnessToken>,
    /// Insertion time for absolute expiry
    inserted_at: Instant,
    /// Entry TTL, independent of access pattern
    ttl: Duration,
    /// Recency stamp from the cache's monotonic counter
    last_accessed: u64,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

/// Bounded in-memory tier holding deep copies of hot entries.
///
/// Capacity is an item count; inserting beyond it evicts the exact
/// least-recently-accessed entry first. Recency uses a monotonic counter
/// rather than wall-clock reads, so ordering is total even for accesses
/// within the same clock tick.
pub struct MemoryCache {
    /// Cache storage, keyed by the composed key string
    entries: Mutex<HashMap<String, MemoryEntry>>,
    /// Maximum number of entries
    max_items: usize,
    /// Monotonic recency counter
    clock: AtomicU64,
    /// Shared statistics
    stats: Arc<Mutex<CacheStats>>,
}

impl MemoryCache {
    /// Create a new memory cache bounded to `max_items` entries.
    pub fn new(max_items: usize, stats: Arc<Mutex<CacheStats>>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_items,
            clock: AtomicU64::new(0),
            stats,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Get a cached entry.
    ///
    /// Returns a fresh copy of the payload bytes and the stored token.
    /// Expired entries are dropped on the way out and reported as misses.
    pub fn get(&self, key: &CacheKey) -> Option<(Vec<u8>, Option<FreshnessToken>)> {
        let composed = key.composed();
        let mut entries = self.entries.lock().unwrap();

        let expired = match entries.get(&composed) {
            Some(entry) => entry.is_expired(),
            None => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.record_memory_miss();
                }
                return None;
            }
        };

        if expired {
            entries.remove(&composed);
            if let Ok(mut stats) = self.stats.lock() {
                stats.record_memory_expired(1);
                stats.record_memory_miss();
            }
            return None;
        }

        let entry = entries.get_mut(&composed)?;
        entry.last_accessed = self.tick();
        let result = (entry.payload.clone(), entry.token.clone());
        if let Ok(mut stats) = self.stats.lock() {
            stats.record_memory_hit();
        }
        Some(result)
    }

    /// Insert or replace an entry.
    ///
    /// When the cache is full and the key is new, the least-recently-
    /// accessed entry is evicted first so capacity is never exceeded.
    pub fn insert(
        &self,
        key: &CacheKey,
        payload: Vec<u8>,
        token: Option<FreshnessToken>,
        ttl: Duration,
    ) {
        if self.max_items == 0 {
            return;
        }

        let composed = key.composed();
        let mut entries = self.entries.lock().unwrap();

        if !entries.contains_key(&composed) && entries.len() >= self.max_items {
            let evicted = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone());
            if let Some(victim) = evicted {
                entries.remove(&victim);
                if let Ok(mut stats) = self.stats.lock() {
                    stats.record_memory_eviction(1);
                }
            }
        }

        entries.insert(
            composed,
            MemoryEntry {
                key: key.clone(),
                payload,
                token,
                inserted_at: Instant::now(),
                ttl,
                last_accessed: self.tick(),
            },
        );
    }

    /// Remove one entry. Returns true if it was present.
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.entries.lock().unwrap().remove(&key.composed()).is_some()
    }

    /// Remove every entry belonging to a source. Returns the count removed.
    pub fn remove_by_source(&self, source_id: &str) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| e.key.source_id() != source_id);
        before - entries.len()
    }

    /// Remove listing entries covering `directory_path` of a source.
    ///
    /// An entry is removed when its directory equals the given path, or is
    /// an ancestor of it and the listing was recursive. Non-recursive
    /// ancestor listings are untouched: a change in `a/b/c` does not alter
    /// what a flat listing of `a` shows.
    pub fn remove_listings_under(&self, source_id: &str, directory_path: &str) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| match &e.key {
            CacheKey::Listing {
                source_id: entry_source,
                directory_path: entry_dir,
                recursive,
                ..
            } => {
                let covers = entry_dir == directory_path
                    || (*recursive && path_is_ancestor(entry_dir, directory_path));
                !(entry_source == source_id && covers)
            }
            CacheKey::Metadata { .. } => true,
        });
        before - entries.len()
    }

    /// Drop every expired entry. Returns the count removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired());
        let removed = before - entries.len();
        if removed > 0 {
            if let Ok(mut stats) = self.stats.lock() {
                stats.record_memory_expired(removed as u64);
            }
        }
        removed
    }

    /// Check for a key without touching recency or statistics.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().unwrap().contains_key(&key.composed())
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// True when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity in entries.
    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

//! Two-tier metadata cache orchestrator.
//!
//! `MetadataCache` coordinates the in-memory tier and the persistent store
//! behind a read-through, write-invalidate contract:
//!
//! 1. Check the in-memory tier (fast)
//! 2. On miss, check the persistent store; valid rows are promoted into
//!    memory with their *stored* freshness token
//! 3. On full miss the caller fetches from origin and feeds the result
//!    back through [`MetadataCache::set`]
//!
//! The cache never performs origin I/O. Recomputing a freshness token is
//! the caller's job; comparing it against the stored one — and discarding
//! the entry on mismatch — happens here, whenever the caller passes its
//! current token into [`MetadataCache::get`].
//!
//! This is an explicit service object: construct it once and hand it to
//! every consumer by reference.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::CacheSettings;
use super::memory::MemoryCache;
use super::stats::{CacheStats, CacheStatsReport, StoreTableCounts};
use super::store::{PersistentStore, SweepOutcome};
use super::types::{normalize_path, CacheError, CacheKey, FreshnessToken, Lookup};
use crate::time::unix_millis_now;

/// Two-tier read-through cache for object metadata and directory listings.
pub struct MetadataCache {
    settings: CacheSettings,
    memory: MemoryCache,
    /// Persistent tier; `None` when disabled or degraded after a failed open.
    store: Option<PersistentStore>,
    stats: Arc<Mutex<CacheStats>>,
}

impl MetadataCache {
    /// Create the cache service from settings.
    ///
    /// A persistent store that cannot be opened degrades the service to
    /// memory-only operation; this is logged, never fatal.
    pub fn new(settings: CacheSettings) -> Self {
        let stats = Arc::new(Mutex::new(CacheStats::new()));
        let memory = MemoryCache::new(settings.memory.max_items, Arc::clone(&stats));

        let store = if settings.enabled() {
            match PersistentStore::open(&settings.store.db_path) {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!(
                        path = %settings.store.db_path.display(),
                        error = %e,
                        "failed to open persistent cache store, degrading to memory-only"
                    );
                    None
                }
            }
        } else {
            info!("metadata cache disabled by configuration");
            None
        };

        Self {
            settings,
            memory,
            store,
            stats,
        }
    }

    /// Whether the cache is enabled at all.
    pub fn enabled(&self) -> bool {
        self.settings.enabled()
    }

    /// Whether the persistent tier is available.
    pub fn store_available(&self) -> bool {
        self.store.is_some()
    }

    /// Look up a cached payload.
    ///
    /// When `current` is supplied, the stored freshness token must equal it
    /// exactly; a mismatch discards the entry from both tiers and reports a
    /// miss. Expired and corrupt records are likewise dropped on the way
    /// out — corruption never surfaces as an error to the caller.
    pub fn get<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        current: Option<&FreshnessToken>,
    ) -> Result<Lookup<T>, CacheError> {
        if !self.enabled() {
            return Ok(Lookup::Miss);
        }

        if let Some((bytes, token)) = self.memory.get(key) {
            if token_is_stale(current, token.as_ref()) {
                debug!(key = %key.composed(), "freshness token mismatch, discarding entry");
                self.record(|s| s.record_stale_discard());
                self.invalidate(key)?;
                return Ok(Lookup::Miss);
            }
            match serde_json::from_slice(&bytes) {
                Ok(payload) => return Ok(Lookup::Hit { payload, token }),
                Err(e) => {
                    // Should not happen for bytes we serialized ourselves;
                    // drop the entry and fall through to the store.
                    warn!(key = %key.composed(), error = %e, "undecodable in-memory entry dropped");
                    self.memory.remove(key);
                }
            }
        }

        let Some(store) = &self.store else {
            return Ok(Lookup::Miss);
        };

        let Some(record) = store.get(key)? else {
            self.record(|s| s.record_store_miss());
            return Ok(Lookup::Miss);
        };

        if record.is_expired_at(unix_millis_now()) {
            debug!(key = %key.composed(), "stored record expired, deleting");
            store.delete(key)?;
            self.record(|s| {
                s.record_store_expired(1);
                s.record_store_miss();
            });
            return Ok(Lookup::Miss);
        }

        if token_is_stale(current, record.token.as_ref()) {
            debug!(key = %key.composed(), "stored record stale, deleting");
            store.delete(key)?;
            self.record(|s| {
                s.record_stale_discard();
                s.record_store_miss();
            });
            return Ok(Lookup::Miss);
        }

        match serde_json::from_slice::<T>(&record.payload) {
            Ok(payload) => {
                self.record(|s| s.record_store_hit());
                // Promote with the token the record was stored with; full
                // revalidation against origin stays with the caller.
                self.memory.insert(
                    key,
                    record.payload,
                    record.token.clone(),
                    self.settings.memory_ttl(key.kind()),
                );
                Ok(Lookup::Hit {
                    payload,
                    token: record.token,
                })
            }
            Err(e) => {
                warn!(
                    key = %key.composed(),
                    error = %e,
                    "corrupt cache record dropped, treating as miss"
                );
                store.delete(key)?;
                self.record(|s| {
                    s.record_corrupt_dropped();
                    s.record_store_miss();
                });
                Ok(Lookup::Miss)
            }
        }
    }

    /// Store a payload in both tiers.
    ///
    /// The in-memory tier always receives a deep copy. Kinds configured as
    /// durable are also written through to the persistent store, where the
    /// write is best-effort: a store failure is logged and counted but the
    /// in-memory entry is kept, bounded by its TTL.
    ///
    /// `ttl` overrides the per-kind defaults for both tiers when given.
    pub fn set<T: Serialize>(
        &self,
        key: &CacheKey,
        payload: &T,
        token: Option<FreshnessToken>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if !self.enabled() {
            return Ok(());
        }

        let bytes = serde_json::to_vec(payload)?;
        let kind = key.kind();

        self.memory.insert(
            key,
            bytes.clone(),
            token.clone(),
            ttl.unwrap_or_else(|| self.settings.memory_ttl(kind)),
        );

        if self.settings.durable(kind) {
            if let Some(store) = &self.store {
                let store_ttl = ttl.unwrap_or_else(|| self.settings.store_ttl(kind));
                match store.put(key, &bytes, token.as_ref(), store_ttl) {
                    Ok(()) => self.record(|s| s.record_store_write()),
                    Err(e) => {
                        warn!(
                            key = %key.composed(),
                            error = %e,
                            "durable cache write failed, keeping in-memory entry"
                        );
                        self.record(|s| s.record_store_write_failure());
                    }
                }
            }
        }

        Ok(())
    }

    /// Remove one entry from both tiers unconditionally.
    pub fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.memory.remove(key);
        if let Some(store) = &self.store {
            store.delete(key)?;
        }
        Ok(())
    }

    /// Remove every listing covering `directory_path` of a source.
    ///
    /// Covers the exact directory plus recursive listings of any ancestor:
    /// a modified file under `a/b/c` invalidates a recursive listing
    /// cached for `a/b` or `a`, but not a flat listing of `a`.
    pub fn invalidate_listings_under(
        &self,
        source_id: &str,
        directory_path: &str,
    ) -> Result<usize, CacheError> {
        let normalized = normalize_path(directory_path);
        let mut removed = self.memory.remove_listings_under(source_id, &normalized);
        if let Some(store) = &self.store {
            removed += store.delete_listings_under(source_id, &normalized)?;
        }
        debug!(source = source_id, dir = %normalized, removed, "invalidated listings");
        Ok(removed)
    }

    /// Remove every record belonging to one source, both kinds, both tiers.
    pub fn invalidate_by_source(&self, source_id: &str) -> Result<usize, CacheError> {
        let mut removed = self.memory.remove_by_source(source_id);
        if let Some(store) = &self.store {
            removed += store.delete_by_source(source_id)?;
        }
        info!(source = source_id, removed, "invalidated all cache records for source");
        Ok(removed)
    }

    /// Wipe both tiers.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.memory.clear();
        if let Some(store) = &self.store {
            store.clear()?;
        }
        Ok(())
    }

    /// Run one sweep pass: purge expired memory entries, then TTL-expire
    /// and LRU-trim the persistent tables.
    pub fn sweep(&self) -> Result<SweepOutcome, CacheError> {
        self.memory.purge_expired();

        let outcome = match &self.store {
            Some(store) => store.sweep(self.settings.store.max_items_per_table)?,
            None => SweepOutcome::default(),
        };

        if outcome.expired > 0 || outcome.evicted > 0 {
            debug!(
                expired = outcome.expired,
                evicted = outcome.evicted,
                "cache sweep removed rows"
            );
            self.record(|s| {
                s.record_store_expired(outcome.expired);
                s.record_store_eviction(outcome.evicted);
            });
        }

        Ok(outcome)
    }

    /// Snapshot of counters and current tier sizes.
    pub fn stats(&self) -> CacheStatsReport {
        let (store_counts, store_file_size_bytes) = match &self.store {
            Some(store) => (
                store.counts().unwrap_or_default(),
                store.file_size_bytes(),
            ),
            None => (StoreTableCounts::default(), 0),
        };

        CacheStatsReport {
            stats: self.stats.lock().unwrap().clone(),
            memory_items: self.memory.len(),
            memory_max_items: self.memory.max_items(),
            store_counts,
            store_file_size_bytes,
            store_available: self.store.is_some(),
            enabled: self.enabled(),
        }
    }

    /// Sweep interval from configuration, for the daemon.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.settings.store.sweep_interval_secs)
    }

    /// Stats-logging interval from configuration, zero when disabled.
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.settings.store.stats_interval_secs)
    }

    fn record(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}

/// A stored token is stale when the caller supplied a current one and the
/// stored value does not equal it exactly. Without a caller-side token
/// there is nothing to compare, and `None` stored against `Some` current
/// always revalidates.
fn token_is_stale(current: Option<&FreshnessToken>, stored: Option<&FreshnessToken>) -> bool {
    match current {
        None => false,
        Some(cur) => stored != Some(cur),
    }
}

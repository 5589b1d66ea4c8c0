//! Cache configuration.
//!
//! Pure data types with hard-coded defaults. Loading these values from the
//! application's configuration file is the app shell's job; the cache only
//! consumes the resulting structs, so it stays functional when no
//! configuration can be read at all.

use std::path::PathBuf;
use std::time::Duration;

use super::types::CacheKind;

/// In-memory tier configuration.
#[derive(Debug, Clone)]
pub struct MemorySettings {
    /// Maximum number of entries held in memory (default: 512)
    pub max_items: usize,
    /// TTL for object-metadata entries (default: 10 minutes)
    pub metadata_ttl: Duration,
    /// TTL for listing entries (default: 5 minutes)
    pub listing_ttl: Duration,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_items: 512,
            metadata_ttl: Duration::from_secs(10 * 60),
            listing_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Persistent tier configuration.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Location of the store file (default: platform cache dir)
    pub db_path: PathBuf,
    /// Maximum rows kept per table; the sweep evicts LRU rows beyond this
    /// (default: 20,000)
    pub max_items_per_table: usize,
    /// TTL for object-metadata rows (default: 7 days)
    pub metadata_ttl: Duration,
    /// TTL for listing rows (default: 24 hours)
    pub listing_ttl: Duration,
    /// Whether object-metadata entries are written through to the store
    pub durable_metadata: bool,
    /// Whether listing entries are written through to the store
    pub durable_listings: bool,
    /// Sweep daemon interval in seconds (default: 300)
    pub sweep_interval_secs: u64,
    /// Stats logging interval in seconds, 0 disables (default: 0)
    pub stats_interval_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        let db_path = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("modelshelf")
            .join("metadata-cache.db");

        Self {
            db_path,
            max_items_per_table: 20_000,
            metadata_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            listing_ttl: Duration::from_secs(24 * 60 * 60),
            durable_metadata: true,
            durable_listings: true,
            sweep_interval_secs: 300,
            stats_interval_secs: 0,
        }
    }
}

/// Complete cache configuration.
#[derive(Debug, Clone, Default)]
pub struct CacheSettings {
    /// Global kill switch; when false every lookup is a miss and writes
    /// are dropped
    pub disabled: bool,
    /// In-memory tier settings
    pub memory: MemorySettings,
    /// Persistent tier settings
    pub store: StoreSettings,
}

impl CacheSettings {
    /// Create a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the cache is enabled.
    pub fn enabled(&self) -> bool {
        !self.disabled
    }

    /// Disable the cache entirely.
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Set the in-memory capacity in entries.
    pub fn with_memory_max_items(mut self, max_items: usize) -> Self {
        self.memory.max_items = max_items;
        self
    }

    /// Set the store file location.
    pub fn with_db_path(mut self, path: PathBuf) -> Self {
        self.store.db_path = path;
        self
    }

    /// Set the per-table row quota for the persistent store.
    pub fn with_store_max_items(mut self, max_items: usize) -> Self {
        self.store.max_items_per_table = max_items;
        self
    }

    /// Set both tiers' TTL for one kind.
    pub fn with_ttl(mut self, kind: CacheKind, memory: Duration, store: Duration) -> Self {
        match kind {
            CacheKind::Metadata => {
                self.memory.metadata_ttl = memory;
                self.store.metadata_ttl = store;
            }
            CacheKind::Listing => {
                self.memory.listing_ttl = memory;
                self.store.listing_ttl = store;
            }
        }
        self
    }

    /// Set the sweep daemon interval.
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.store.sweep_interval_secs = secs;
        self
    }

    /// Default in-memory TTL for a kind.
    pub fn memory_ttl(&self, kind: CacheKind) -> Duration {
        match kind {
            CacheKind::Metadata => self.memory.metadata_ttl,
            CacheKind::Listing => self.memory.listing_ttl,
        }
    }

    /// Default persistent TTL for a kind.
    pub fn store_ttl(&self, kind: CacheKind) -> Duration {
        match kind {
            CacheKind::Metadata => self.store.metadata_ttl,
            CacheKind::Listing => self.store.listing_ttl,
        }
    }

    /// Whether entries of this kind are written through to the store.
    pub fn durable(&self, kind: CacheKind) -> bool {
        match kind {
            CacheKind::Metadata => self.store.durable_metadata,
            CacheKind::Listing => self.store.durable_listings,
        }
    }
}

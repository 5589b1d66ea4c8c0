//! Cache statistics tracking and reporting.

use std::time::Instant;

/// Counters shared by both cache tiers.
#[derive(Debug, Clone)]
pub struct CacheStats {
    // In-memory tier (L1)
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub memory_evictions: u64,
    pub memory_expired: u64,

    // Persistent tier (L2)
    pub store_hits: u64,
    pub store_misses: u64,
    pub store_writes: u64,
    pub store_write_failures: u64,
    pub store_expired: u64,
    pub store_evictions: u64,
    pub store_corrupt_dropped: u64,

    // Token revalidation
    pub stale_discards: u64,

    // Timing
    pub created_at: Instant,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStats {
    /// Create a new statistics tracker.
    pub fn new() -> Self {
        Self {
            memory_hits: 0,
            memory_misses: 0,
            memory_evictions: 0,
            memory_expired: 0,
            store_hits: 0,
            store_misses: 0,
            store_writes: 0,
            store_write_failures: 0,
            store_expired: 0,
            store_evictions: 0,
            store_corrupt_dropped: 0,
            stale_discards: 0,
            created_at: Instant::now(),
        }
    }

    /// Memory-tier hit rate (0.0 to 1.0).
    pub fn memory_hit_rate(&self) -> f64 {
        let total = self.memory_hits + self.memory_misses;
        if total == 0 {
            0.0
        } else {
            self.memory_hits as f64 / total as f64
        }
    }

    /// Persistent-tier hit rate (0.0 to 1.0).
    pub fn store_hit_rate(&self) -> f64 {
        let total = self.store_hits + self.store_misses;
        if total == 0 {
            0.0
        } else {
            self.store_hits as f64 / total as f64
        }
    }

    /// Overall hit rate across both tiers (0.0 to 1.0).
    ///
    /// A store miss is a full miss; a store hit was a memory miss first.
    pub fn overall_hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.store_hits;
        let total = hits + self.store_misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Uptime since statistics started.
    pub fn uptime(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn record_memory_hit(&mut self) {
        self.memory_hits += 1;
    }

    pub fn record_memory_miss(&mut self) {
        self.memory_misses += 1;
    }

    pub fn record_memory_eviction(&mut self, count: u64) {
        self.memory_evictions += count;
    }

    pub fn record_memory_expired(&mut self, count: u64) {
        self.memory_expired += count;
    }

    pub fn record_store_hit(&mut self) {
        self.store_hits += 1;
    }

    pub fn record_store_miss(&mut self) {
        self.store_misses += 1;
    }

    pub fn record_store_write(&mut self) {
        self.store_writes += 1;
    }

    pub fn record_store_write_failure(&mut self) {
        self.store_write_failures += 1;
    }

    pub fn record_store_expired(&mut self, count: u64) {
        self.store_expired += count;
    }

    pub fn record_store_eviction(&mut self, count: u64) {
        self.store_evictions += count;
    }

    pub fn record_corrupt_dropped(&mut self) {
        self.store_corrupt_dropped += 1;
    }

    pub fn record_stale_discard(&mut self) {
        self.stale_discards += 1;
    }
}

/// Live row counts for the persistent store, per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreTableCounts {
    pub metadata_rows: u64,
    pub listing_rows: u64,
}

/// Snapshot of cache state for reporting.
///
/// Combines the cumulative counters with the tiers' current sizes, which
/// are sampled at snapshot time rather than tracked incrementally.
#[derive(Debug, Clone)]
pub struct CacheStatsReport {
    pub stats: CacheStats,
    /// Entries currently held by the in-memory tier.
    pub memory_items: usize,
    /// Configured in-memory capacity.
    pub memory_max_items: usize,
    /// Row counts per persistent table (zero when degraded to memory-only).
    pub store_counts: StoreTableCounts,
    /// Size of the store file on disk in bytes (zero when degraded).
    pub store_file_size_bytes: u64,
    /// Whether the persistent tier is available.
    pub store_available: bool,
    /// Global kill-switch state.
    pub enabled: bool,
}

impl CacheStatsReport {
    /// Format the snapshot as a human-readable block for display surfaces.
    pub fn format(&self) -> String {
        let stats = &self.stats;

        format!(
            r#"ModelShelf Metadata Cache
Enabled: {}

MEMORY TIER
  Entries:     {} / {}
  Hits:        {}
  Misses:      {}
  Hit Rate:    {:.1}%
  Evictions:   {}
  Expired:     {}

PERSISTENT TIER ({})
  Metadata:    {} rows
  Listings:    {} rows
  File Size:   {:.2} MB
  Hits:        {}
  Misses:      {}
  Hit Rate:    {:.1}%
  Writes:      {}
  Failures:    {}
  Expired:     {}
  Evictions:   {}
  Corrupt:     {}

REVALIDATION
  Stale discards: {}

OVERALL
  Hit Rate:    {:.1}%
  Uptime:      {}s
"#,
            self.enabled,
            self.memory_items,
            self.memory_max_items,
            stats.memory_hits,
            stats.memory_misses,
            stats.memory_hit_rate() * 100.0,
            stats.memory_evictions,
            stats.memory_expired,
            if self.store_available {
                "available"
            } else {
                "degraded"
            },
            self.store_counts.metadata_rows,
            self.store_counts.listing_rows,
            self.store_file_size_bytes as f64 / (1024.0 * 1024.0),
            stats.store_hits,
            stats.store_misses,
            stats.store_hit_rate() * 100.0,
            stats.store_writes,
            stats.store_write_failures,
            stats.store_expired,
            stats.store_evictions,
            stats.store_corrupt_dropped,
            stats.stale_discards,
            stats.overall_hit_rate() * 100.0,
            stats.uptime().as_secs(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_start_at_zero() {
        let stats = CacheStats::default();

        assert_eq!(stats.memory_hits, 0);
        assert_eq!(stats.store_hits, 0);
        assert_eq!(stats.stale_discards, 0);
    }

    #[test]
    fn memory_hit_rate_no_requests() {
        let stats = CacheStats::new();
        assert_eq!(stats.memory_hit_rate(), 0.0);
    }

    #[test]
    fn memory_hit_rate_mixed() {
        let mut stats = CacheStats::new();
        stats.memory_hits = 75;
        stats.memory_misses = 25;

        assert_eq!(stats.memory_hit_rate(), 0.75);
    }

    #[test]
    fn overall_hit_rate_counts_both_tiers() {
        let mut stats = CacheStats::new();
        stats.memory_hits = 70;
        stats.store_hits = 20;
        stats.store_misses = 10;

        // 90 hits out of 100 requests
        assert_eq!(stats.overall_hit_rate(), 0.9);
    }

    #[test]
    fn record_helpers_increment() {
        let mut stats = CacheStats::new();
        stats.record_memory_hit();
        stats.record_memory_hit();
        stats.record_memory_miss();
        stats.record_store_hit();
        stats.record_store_miss();
        stats.record_store_write();
        stats.record_store_write_failure();
        stats.record_corrupt_dropped();
        stats.record_stale_discard();
        stats.record_memory_eviction(3);
        stats.record_store_eviction(2);
        stats.record_store_expired(4);
        stats.record_memory_expired(1);

        assert_eq!(stats.memory_hits, 2);
        assert_eq!(stats.memory_misses, 1);
        assert_eq!(stats.store_hits, 1);
        assert_eq!(stats.store_misses, 1);
        assert_eq!(stats.store_writes, 1);
        assert_eq!(stats.store_write_failures, 1);
        assert_eq!(stats.store_corrupt_dropped, 1);
        assert_eq!(stats.stale_discards, 1);
        assert_eq!(stats.memory_evictions, 3);
        assert_eq!(stats.store_evictions, 2);
        assert_eq!(stats.store_expired, 4);
        assert_eq!(stats.memory_expired, 1);
    }

    #[test]
    fn report_format_contains_sections() {
        let mut stats = CacheStats::new();
        stats.memory_hits = 100;
        stats.memory_misses = 10;

        let report = CacheStatsReport {
            stats,
            memory_items: 42,
            memory_max_items: 512,
            store_counts: StoreTableCounts {
                metadata_rows: 7,
                listing_rows: 3,
            },
            store_file_size_bytes: 1024 * 1024,
            store_available: true,
            enabled: true,
        };

        let formatted = report.format();
        assert!(formatted.contains("MEMORY TIER"));
        assert!(formatted.contains("PERSISTENT TIER (available)"));
        assert!(formatted.contains("Entries:     42 / 512"));
        assert!(formatted.contains("Metadata:    7 rows"));
        assert!(formatted.contains("OVERALL"));
    }

    #[test]
    fn report_format_shows_degraded_store() {
        let report = CacheStatsReport {
            stats: CacheStats::new(),
            memory_items: 0,
            memory_max_items: 512,
            store_counts: StoreTableCounts::default(),
            store_file_size_bytes: 0,
            store_available: false,
            enabled: true,
        };

        assert!(report.format().contains("PERSISTENT TIER (degraded)"));
    }

    #[test]
    fn uptime_increases() {
        let stats = CacheStats::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(stats.uptime().as_millis() >= 10);
    }
}

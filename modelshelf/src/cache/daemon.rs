//! Background daemon for cache maintenance.
//!
//! The daemon runs in a separate thread and periodically sweeps both
//! tiers: TTL-expired entries go first, then LRU rows beyond the
//! persistent store's per-table quota. It can also log a stats summary at
//! its own interval for long-running sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::system::MetadataCache;

/// Background sweep daemon for the metadata cache.
///
/// The daemon can be cleanly shut down by calling `shutdown()` or by
/// dropping the instance.
pub struct SweepDaemon {
    /// Handle to the daemon thread
    thread_handle: Option<JoinHandle<()>>,
    /// Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl SweepDaemon {
    /// Start the daemon for the given cache.
    ///
    /// Sweep and stats intervals come from the cache's configuration; a
    /// zero stats interval disables the periodic summary.
    pub fn start(cache: Arc<MetadataCache>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let thread_handle = thread::Builder::new()
            .name("cache-sweep".to_string())
            .spawn(move || {
                Self::run_loop(cache, shutdown_clone);
            })
            .expect("Failed to spawn cache sweep daemon thread");

        info!("cache sweep daemon started");

        Self {
            thread_handle: Some(thread_handle),
            shutdown,
        }
    }

    /// The main daemon loop.
    fn run_loop(cache: Arc<MetadataCache>, shutdown: Arc<AtomicBool>) {
        let sweep_interval = cache.sweep_interval();
        let stats_interval = cache.stats_interval();

        // Sleep in short slices so shutdown stays responsive
        let check_interval = Duration::from_secs(1);
        let mut sweep_elapsed = Duration::ZERO;
        let mut stats_elapsed = Duration::ZERO;

        loop {
            if shutdown.load(Ordering::Relaxed) {
                debug!("cache sweep daemon received shutdown signal");
                break;
            }

            thread::sleep(check_interval);
            sweep_elapsed += check_interval;
            stats_elapsed += check_interval;

            if sweep_elapsed >= sweep_interval {
                sweep_elapsed = Duration::ZERO;
                match cache.sweep() {
                    Ok(outcome) if outcome.expired > 0 || outcome.evicted > 0 => {
                        debug!(
                            expired = outcome.expired,
                            evicted = outcome.evicted,
                            "sweep pass complete"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "cache sweep failed"),
                }
            }

            if !stats_interval.is_zero() && stats_elapsed >= stats_interval {
                stats_elapsed = Duration::ZERO;
                Self::log_stats(&cache);
            }
        }

        debug!("cache sweep daemon stopped");
    }

    /// Log a one-line stats summary.
    fn log_stats(cache: &MetadataCache) {
        let report = cache.stats();
        info!(
            memory_items = report.memory_items,
            memory_max = report.memory_max_items,
            memory_hit_rate = format!("{:.1}%", report.stats.memory_hit_rate() * 100.0),
            metadata_rows = report.store_counts.metadata_rows,
            listing_rows = report.store_counts.listing_rows,
            store_file_mb = report.store_file_size_bytes / (1024 * 1024),
            store_hit_rate = format!("{:.1}%", report.stats.store_hit_rate() * 100.0),
            overall_hit_rate = format!("{:.1}%", report.stats.overall_hit_rate() * 100.0),
            "metadata cache statistics"
        );
    }

    /// Signal the daemon to shut down.
    ///
    /// Non-blocking; the daemon stops at its next check slice. Call
    /// `join()` afterwards to wait for the thread.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Wait for the daemon thread to finish.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                warn!("cache sweep daemon thread panicked: {:?}", e);
            }
        }
    }

    /// Check if the daemon is still running.
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for SweepDaemon {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}

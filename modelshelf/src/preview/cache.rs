//! Reference-counted preview cache with deferred disposal.
//!
//! Scroll-driven UIs mount and unmount the same previews in rapid bursts.
//! This cache turns the expensive byte-fetch into a cheap local handle:
//! concurrent requests for one key share a single fetch, and a handle
//! whose last holder releases it survives a grace window before its memory
//! is reclaimed, so an immediate re-mount costs nothing.
//!
//! # Architecture
//!
//! ```text
//! acquire("k") ─┐
//! acquire("k") ─┼──► one fetch ──► Ready(refCount = 3)
//! acquire("k") ─┘
//!
//! release × 3 ──► refCount = 0 ──► grace timer ──► disposed
//!                        ▲                │
//!                        └── acquire cancels ┘
//! ```
//!
//! Disposal timers re-check the reference count and a generation stamp at
//! fire time, so a handle re-acquired between scheduling and firing is
//! never destroyed out from under its holder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::fetch::{FetchError, PreviewFetcher};

/// Waiters per key are typically 1-4; one message is ever sent.
const BROADCAST_CAPACITY: usize = 16;

/// Preview cache configuration.
#[derive(Debug, Clone)]
pub struct PreviewCacheConfig {
    /// Delay between the last release and actual disposal (default: 5s)
    pub grace_period: Duration,
}

impl Default for PreviewCacheConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
        }
    }
}

impl PreviewCacheConfig {
    /// Set the disposal grace window.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

/// A cached preview held by at least one acquirer.
///
/// Handles are plain data; releasing is an explicit
/// [`PreviewCache::release`] call with the same key.
#[derive(Debug, Clone)]
pub struct PreviewHandle {
    key: String,
    bytes: Bytes,
}

impl PreviewHandle {
    /// The key this handle was acquired under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The preview bytes; cloning is cheap.
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }
}

/// Statistics snapshot for the preview cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewCacheStats {
    /// Origin fetches started
    pub fetches: u64,
    /// Fetches that failed
    pub fetch_failures: u64,
    /// Acquires that attached to an in-flight fetch
    pub coalesced: u64,
    /// Acquires served from a cached handle
    pub hits: u64,
    /// Handles destroyed after their grace window
    pub disposals: u64,
    /// Cached handles currently live
    pub items: usize,
    /// Fetches currently in flight
    pub in_flight: usize,
}

struct ReadyEntry {
    bytes: Bytes,
    ref_count: u32,
    /// Stamp of the currently scheduled disposal, if any
    disposal_gen: u64,
    disposal: Option<CancellationToken>,
}

enum Slot {
    /// A fetch is in flight; waiters subscribe to the sender.
    Pending {
        tx: broadcast::Sender<Result<Bytes, FetchError>>,
        waiters: u32,
    },
    /// Bytes are cached and reference-counted.
    Ready(ReadyEntry),
}

#[derive(Default)]
struct Counters {
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    coalesced: AtomicU64,
    hits: AtomicU64,
    disposals: AtomicU64,
    generation: AtomicU64,
}

/// Reference-counted cache of decoded preview bytes.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct PreviewCache {
    fetcher: Arc<dyn PreviewFetcher>,
    slots: Arc<DashMap<String, Slot>>,
    grace_period: Duration,
    counters: Arc<Counters>,
}

impl PreviewCache {
    /// Create a preview cache fronting the given fetcher.
    pub fn new(fetcher: Arc<dyn PreviewFetcher>, config: PreviewCacheConfig) -> Self {
        Self {
            fetcher,
            slots: Arc::new(DashMap::new()),
            grace_period: config.grace_period,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Acquire a handle for `key`, fetching at most once.
    ///
    /// A cached handle is returned immediately with its reference count
    /// incremented (cancelling any pending disposal). If a fetch for the
    /// key is already in flight the caller attaches to it; otherwise this
    /// call runs the single fetch itself. On failure nothing is cached and
    /// every attached caller receives the error.
    pub async fn acquire(&self, key: &str) -> Result<PreviewHandle, FetchError> {
        enum Action {
            Hit(Bytes),
            Wait(broadcast::Receiver<Result<Bytes, FetchError>>),
            Fetch,
        }

        let action = match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => match occupied.get_mut() {
                Slot::Ready(entry) => {
                    entry.ref_count += 1;
                    if let Some(token) = entry.disposal.take() {
                        token.cancel();
                        debug!(key, "pending disposal cancelled by acquire");
                    }
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    Action::Hit(entry.bytes.clone())
                }
                Slot::Pending { tx, waiters } => {
                    *waiters += 1;
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    Action::Wait(tx.subscribe())
                }
            },
            Entry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
                vacant.insert(Slot::Pending { tx, waiters: 1 });
                Action::Fetch
            }
        };

        match action {
            Action::Hit(bytes) => Ok(PreviewHandle {
                key: key.to_string(),
                bytes,
            }),
            Action::Wait(mut rx) => match rx.recv().await {
                Ok(Ok(bytes)) => Ok(PreviewHandle {
                    key: key.to_string(),
                    bytes,
                }),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(FetchError::Interrupted),
            },
            Action::Fetch => {
                self.counters.fetches.fetch_add(1, Ordering::Relaxed);
                match self.fetcher.fetch(key).await {
                    Ok(bytes) => {
                        self.complete_fetch(key, bytes.clone());
                        Ok(PreviewHandle {
                            key: key.to_string(),
                            bytes,
                        })
                    }
                    Err(e) => {
                        self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
                        // No negative caching: drop the slot so the next
                        // acquire retries, and fail every waiter.
                        if let Some((_, slot)) = self.slots.remove(key) {
                            if let Slot::Pending { tx, .. } = slot {
                                let _ = tx.send(Err(e.clone()));
                            }
                        }
                        warn!(key, error = %e, "preview fetch failed");
                        Err(e)
                    }
                }
            }
        }
    }

    /// Swap the pending slot to ready, crediting every attached waiter.
    fn complete_fetch(&self, key: &str, bytes: Bytes) {
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let waiters = match occupied.get() {
                    Slot::Pending { waiters, .. } => *waiters,
                    // Slot was replaced under us; count only this caller
                    Slot::Ready(_) => 1,
                };
                let previous = occupied.insert(Slot::Ready(ReadyEntry {
                    bytes: bytes.clone(),
                    ref_count: waiters,
                    disposal_gen: 0,
                    disposal: None,
                }));
                if let Slot::Pending { tx, .. } = previous {
                    let _ = tx.send(Ok(bytes));
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Ready(ReadyEntry {
                    bytes,
                    ref_count: 1,
                    disposal_gen: 0,
                    disposal: None,
                }));
            }
        }
    }

    /// Release one reference to `key`.
    ///
    /// When the count reaches zero the handle is not destroyed; a disposal
    /// is scheduled after the grace window, and only fires if the count is
    /// still zero (and no newer disposal superseded it) at that moment.
    pub fn release(&self, key: &str) {
        let scheduled = match self.slots.get_mut(key) {
            None => {
                debug!(key, "release for unknown preview key ignored");
                None
            }
            Some(mut slot) => match slot.value_mut() {
                Slot::Pending { .. } => {
                    debug!(key, "release ignored while fetch in flight");
                    None
                }
                Slot::Ready(entry) => {
                    entry.ref_count = entry.ref_count.saturating_sub(1);
                    if entry.ref_count == 0 && entry.disposal.is_none() {
                        let token = CancellationToken::new();
                        let generation =
                            self.counters.generation.fetch_add(1, Ordering::Relaxed) + 1;
                        entry.disposal = Some(token.clone());
                        entry.disposal_gen = generation;
                        Some((token, generation))
                    } else {
                        None
                    }
                }
            },
        };

        if let Some((token, generation)) = scheduled {
            self.spawn_disposal(key.to_string(), token, generation);
        }
    }

    fn spawn_disposal(&self, key: String, token: CancellationToken, generation: u64) {
        let slots = Arc::clone(&self.slots);
        let counters = Arc::clone(&self.counters);
        let grace = self.grace_period;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(grace) => {
                    // Reference state is re-checked now, not at schedule
                    // time: an acquire issued in between must win.
                    if let Entry::Occupied(occupied) = slots.entry(key.clone()) {
                        let disposable = matches!(
                            occupied.get(),
                            Slot::Ready(entry)
                                if entry.ref_count == 0 && entry.disposal_gen == generation
                        );
                        if disposable {
                            occupied.remove();
                            counters.disposals.fetch_add(1, Ordering::Relaxed);
                            debug!(key, "preview handle disposed after grace window");
                        }
                    }
                }
            }
        });
    }

    /// Current reference count for a cached key.
    ///
    /// `None` when the key is absent or its fetch is still in flight.
    pub fn ref_count(&self, key: &str) -> Option<u32> {
        self.slots.get(key).and_then(|slot| match slot.value() {
            Slot::Ready(entry) => Some(entry.ref_count),
            Slot::Pending { .. } => None,
        })
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> PreviewCacheStats {
        let mut items = 0;
        let mut in_flight = 0;
        for slot in self.slots.iter() {
            match slot.value() {
                Slot::Ready(_) => items += 1,
                Slot::Pending { .. } => in_flight += 1,
            }
        }

        PreviewCacheStats {
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            fetch_failures: self.counters.fetch_failures.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            disposals: self.counters.disposals.load(Ordering::Relaxed),
            items,
            in_flight,
        }
    }
}

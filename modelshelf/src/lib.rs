//! ModelShelf - metadata caching core for a desktop asset catalog browser.
//!
//! This library provides the caching layer behind a catalog of
//! machine-learning model assets and their sidecar metadata files:
//!
//! - [`cache::MetadataCache`] — two-tier (memory + SQLite) read-through
//!   cache for object metadata and directory listings, validated by
//!   caller-supplied freshness tokens
//! - [`cache::ContentDigestCalculator`] — cheap staleness fingerprints for
//!   directory listings
//! - [`preview::PreviewCache`] — reference-counted cache of preview bytes
//!   with fetch deduplication and grace-delayed disposal
//!
//! # High-Level Flow
//!
//! ```ignore
//! use modelshelf::cache::{CacheKey, CacheSettings, Lookup, MetadataCache};
//!
//! let cache = MetadataCache::new(CacheSettings::default());
//!
//! let key = CacheKey::metadata("local", "models/a.safetensors");
//! let current = stat_token_from_origin()?;
//!
//! match cache.get(&key, Some(&current))? {
//!     Lookup::Hit { payload, .. } => serve(payload),
//!     Lookup::Miss => {
//!         let meta = origin.fetch_object_metadata("models/a.safetensors")?;
//!         cache.set(&key, &meta, Some(current), None)?;
//!         serve(meta)
//!     }
//! }
//! ```

pub mod cache;
pub mod logging;
pub mod preview;
pub mod provider;
pub mod time;

/// Version of the ModelShelf library.
///
/// Synchronized across all components in the workspace; defined in
/// `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

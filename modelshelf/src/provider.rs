//! Collaborator interfaces required from the origin layer.
//!
//! The cache never touches origin storage itself; backends (local walker,
//! remote file-protocol client) implement [`AssetProvider`] and the
//! data-access layer wires the two together: compute a key and a current
//! freshness token, ask the cache, fetch from the provider on a miss, and
//! feed the result back in.
//!
//! Any component that modifies a metadata file is obliged to call
//! `MetadataCache::invalidate` for the object's key and
//! `MetadataCache::invalidate_listings_under` for its containing
//! directory afterwards.

use thiserror::Error;

use crate::cache::FreshnessToken;

/// Stat pair of a file in origin storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime_ms: u64,
    /// Size in bytes.
    pub size: u64,
}

impl From<FileStat> for FreshnessToken {
    fn from(stat: FileStat) -> Self {
        FreshnessToken::stat(stat.mtime_ms, stat.size)
    }
}

/// One file in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingItem {
    /// Path relative to the listed directory, forward slashes.
    pub relative_path: String,
    /// Size in bytes.
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime_ms: u64,
}

/// Origin-layer errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The object does not exist in origin storage
    #[error("not found: {0}")]
    NotFound(String),

    /// Local I/O failed
    #[error("provider I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A remote backend failed
    #[error("provider backend error: {0}")]
    Backend(String),
}

/// Storage backend the cache fronts.
///
/// Implementations must not consult the cache from inside these methods;
/// the data-access layer owns that loop.
pub trait AssetProvider: Send + Sync {
    /// Read the raw sidecar metadata for an asset.
    fn fetch_object_metadata(&self, path: &str) -> Result<Vec<u8>, ProviderError>;

    /// Enumerate assets under a directory.
    fn fetch_directory_listing(
        &self,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<ListingItem>, ProviderError>;

    /// Stat one file.
    fn stat_file(&self, path: &str) -> Result<FileStat, ProviderError>;
}

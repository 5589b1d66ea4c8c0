//! Core types for the metadata cache.

use thiserror::Error;

/// Field separator for composed cache keys.
///
/// ASCII unit separator cannot appear in source ids or normalized paths,
/// so distinct query shapes never alias after composition.
const KEY_SEP: char = '\u{1F}';

/// The logical kind of a cached record.
///
/// Each kind maps to one table in the persistent store and carries its own
/// TTL defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Per-object sidecar metadata (one record per asset file).
    Metadata,
    /// Directory listings (one record per query shape).
    Listing,
}

impl CacheKind {
    /// Short name used in log messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Metadata => "metadata",
            CacheKind::Listing => "listing",
        }
    }
}

/// Cache key uniquely identifying a cached record.
///
/// Keys are structured rather than pre-composed strings so the cache can
/// answer scoped invalidations (by source, by directory subtree) without
/// parsing anything back out of a flat key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Key for an object-metadata record.
    Metadata {
        /// Origin the object belongs to (e.g. "local", "civitai").
        source_id: String,
        /// Normalized path of the asset file within the source.
        normalized_path: String,
    },
    /// Key for a directory-listing record.
    Listing {
        /// Origin the listing belongs to.
        source_id: String,
        /// Normalized directory path within the source.
        directory_path: String,
        /// Whether the listing covered the whole subtree.
        recursive: bool,
        /// Hash of the tracked extension set used for the query.
        ext_set_hash: String,
    },
}

/// Normalize a path for key composition: forward slashes, no trailing slash.
pub(crate) fn normalize_path(path: &str) -> String {
    let p = path.replace('\\', "/");
    let trimmed = p.trim_end_matches('/');
    if trimmed.is_empty() && !p.is_empty() {
        // Path was all slashes (filesystem root)
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

impl CacheKey {
    /// Create a key for an object-metadata record.
    pub fn metadata(source_id: impl Into<String>, path: &str) -> Self {
        CacheKey::Metadata {
            source_id: source_id.into(),
            normalized_path: normalize_path(path),
        }
    }

    /// Create a key for a directory-listing record.
    pub fn listing(
        source_id: impl Into<String>,
        directory_path: &str,
        recursive: bool,
        ext_set_hash: impl Into<String>,
    ) -> Self {
        CacheKey::Listing {
            source_id: source_id.into(),
            directory_path: normalize_path(directory_path),
            recursive,
            ext_set_hash: ext_set_hash.into(),
        }
    }

    /// The kind of record this key addresses.
    pub fn kind(&self) -> CacheKind {
        match self {
            CacheKey::Metadata { .. } => CacheKind::Metadata,
            CacheKey::Listing { .. } => CacheKind::Listing,
        }
    }

    /// The source this key belongs to.
    pub fn source_id(&self) -> &str {
        match self {
            CacheKey::Metadata { source_id, .. } => source_id,
            CacheKey::Listing { source_id, .. } => source_id,
        }
    }

    /// Deterministic string composition of the key.
    ///
    /// Used as the primary key in the persistent store and as the map key
    /// in the in-memory tier. The kind prefix and unit separator guarantee
    /// that a metadata key can never collide with a listing key, and that
    /// `(dir, recursive=true)` never aliases `(dir, recursive=false)`.
    pub fn composed(&self) -> String {
        match self {
            CacheKey::Metadata {
                source_id,
                normalized_path,
            } => format!("meta{KEY_SEP}{source_id}{KEY_SEP}{normalized_path}"),
            CacheKey::Listing {
                source_id,
                directory_path,
                recursive,
                ext_set_hash,
            } => format!(
                "list{KEY_SEP}{source_id}{KEY_SEP}{directory_path}{KEY_SEP}{}{KEY_SEP}{ext_set_hash}",
                if *recursive { "r" } else { "n" }
            ),
        }
    }
}

/// True when `ancestor` is a proper path ancestor of `descendant`.
///
/// Both paths must already be normalized (forward slashes, no trailing
/// slash). The empty string denotes a source root and is an ancestor of
/// every non-empty path.
pub(crate) fn path_is_ancestor(ancestor: &str, descendant: &str) -> bool {
    if descendant.is_empty() || ancestor == descendant {
        return false;
    }
    if ancestor.is_empty() {
        return true;
    }
    if ancestor == "/" {
        return descendant.starts_with('/');
    }
    descendant.len() > ancestor.len()
        && descendant.starts_with(ancestor)
        && descendant.as_bytes()[ancestor.len()] == b'/'
}

/// Caller-supplied value deciding whether a cached payload still matches
/// its origin.
///
/// Comparison is exact equality in both directions: a "newer" stat pair is
/// just as stale as an older one, since external edits can move mtime and
/// size backwards too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreshnessToken {
    /// Stat pair of the backing file.
    Stat { mtime_ms: u64, size: u64 },
    /// Content digest over a directory's relevant file metadata.
    Digest(String),
}

impl FreshnessToken {
    /// Token from a file's stat pair.
    pub fn stat(mtime_ms: u64, size: u64) -> Self {
        FreshnessToken::Stat { mtime_ms, size }
    }

    /// Token from a content digest (lowercase hex).
    pub fn digest(digest: impl Into<String>) -> Self {
        FreshnessToken::Digest(digest.into())
    }
}

/// Result of a cache lookup.
///
/// `Miss` covers everything the caller should refill from origin: absent,
/// expired, stale token, or a corrupt record that was dropped during the
/// lookup. Hard failures (store I/O, serialization of a `set` payload)
/// surface as `Err(CacheError)` instead, so callers can tell recovery from
/// breakage apart.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// The cached payload and the freshness token it was stored with.
    Hit {
        payload: T,
        token: Option<FreshnessToken>,
    },
    /// Nothing usable cached; fetch from origin and `set` the result.
    Miss,
}

impl<T> Lookup<T> {
    /// Returns true for a hit.
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit { .. })
    }

    /// Returns true for a miss.
    pub fn is_miss(&self) -> bool {
        matches!(self, Lookup::Miss)
    }

    /// Extract the payload, discarding the token.
    pub fn into_payload(self) -> Option<T> {
        match self {
            Lookup::Hit { payload, .. } => Some(payload),
            Lookup::Miss => None,
        }
    }
}

/// Cache-related errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error during cache operations
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistent store error
    #[error("cache store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Payload could not be serialized for storage
    #[error("cache payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

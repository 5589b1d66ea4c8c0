//! Content digests for listing freshness checks.
//!
//! A listing's digest is a SHA-256 over the sorted `path:size:mtime`
//! strings of every tracked file under the directory. Recomputing it costs
//! one stat pass, which is far cheaper than rebuilding the listing itself,
//! and any file addition, removal, resize, or touch changes the digest.
//!
//! This is a change detector, not a security primitive: collision
//! resistance is a convenience property, nothing relies on it for
//! integrity.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::time::system_time_to_millis;

/// Separator between entries in the digest input.
const ENTRY_SEP: &str = "\n";

/// One file's contribution to a content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestEntry {
    /// Path relative to the digested directory, forward slashes.
    pub relative_path: String,
    /// File size in bytes.
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime_ms: u64,
}

impl DigestEntry {
    fn line(&self) -> String {
        format!("{}:{}:{}", self.relative_path, self.size, self.mtime_ms)
    }
}

/// Digest a set of file entries, independent of enumeration order.
///
/// An empty set yields the SHA-256 of the empty string, which is the
/// canonical "nothing relevant here" digest — distinct from "digest not
/// computed", which callers represent as `None`.
pub fn digest_entries(entries: &[DigestEntry]) -> String {
    let mut lines: Vec<String> = entries.iter().map(DigestEntry::line).collect();
    lines.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(lines.join(ENTRY_SEP).as_bytes());
    hex::encode(hasher.finalize())
}

/// The canonical digest of an empty (but existing) directory.
pub fn empty_digest() -> String {
    digest_entries(&[])
}

/// Hash of a tracked extension set, for listing key derivation.
///
/// Extensions are lowercased, stripped of leading dots, and deduplicated
/// before hashing, so `["JSON", ".json"]` and `["json"]` hash identically.
pub fn extension_set_hash<I, S>(extensions: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let normalized: BTreeSet<String> = extensions
        .into_iter()
        .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(
        normalized
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(ENTRY_SEP)
            .as_bytes(),
    );
    hex::encode(hasher.finalize())
}

/// Computes content digests for directories on a local filesystem.
///
/// Remote sources compute their digests from listing data they already
/// hold; this walker is for the local backend, where a stat pass is the
/// cheap option.
#[derive(Debug, Clone)]
pub struct ContentDigestCalculator {
    extensions: BTreeSet<String>,
}

impl ContentDigestCalculator {
    /// Create a calculator tracking the given extension set.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { extensions }
    }

    /// Hash of this calculator's extension set.
    pub fn extension_set_hash(&self) -> String {
        extension_set_hash(self.extensions.iter())
    }

    /// Digest the tracked contents of `root`.
    ///
    /// Enumerates files under `root` (the whole subtree when `recursive`),
    /// keeps those whose extension is tracked, and digests their
    /// `path:size:mtime` triples. Returns an error if the directory cannot
    /// be read; an existing directory with no tracked files yields
    /// [`empty_digest`].
    pub fn digest_directory(&self, root: &Path, recursive: bool) -> io::Result<String> {
        let mut walker = WalkDir::new(root).min_depth(1);
        if !recursive {
            walker = walker.max_depth(1);
        }

        let mut entries = Vec::new();
        for item in walker {
            let item = item.map_err(io::Error::other)?;
            if !item.file_type().is_file() {
                continue;
            }
            if !self.tracks(item.path()) {
                continue;
            }

            let meta = item.metadata().map_err(io::Error::other)?;
            let mtime_ms = meta.modified().map(system_time_to_millis).unwrap_or(0);

            let relative_path = item
                .path()
                .strip_prefix(root)
                .unwrap_or(item.path())
                .to_string_lossy()
                .replace('\\', "/");

            entries.push(DigestEntry {
                relative_path,
                size: meta.len(),
                mtime_ms,
            });
        }

        Ok(digest_entries(&entries))
    }

    /// Whether a path's extension is in the tracked set.
    fn tracks(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn entry(path: &str, size: u64, mtime_ms: u64) -> DigestEntry {
        DigestEntry {
            relative_path: path.to_string(),
            size,
            mtime_ms,
        }
    }

    #[test]
    fn digest_is_order_independent() {
        let forward = vec![
            entry("a.safetensors", 100, 1000),
            entry("b.safetensors", 200, 2000),
            entry("sub/c.json", 50, 1500),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        assert_eq!(digest_entries(&forward), digest_entries(&reversed));
    }

    #[test]
    fn digest_changes_on_mtime() {
        let before = vec![entry("a.json", 100, 1000)];
        let after = vec![entry("a.json", 100, 2000)];

        assert_ne!(digest_entries(&before), digest_entries(&after));
    }

    #[test]
    fn digest_changes_on_size() {
        let before = vec![entry("a.json", 100, 1000)];
        let after = vec![entry("a.json", 101, 1000)];

        assert_ne!(digest_entries(&before), digest_entries(&after));
    }

    #[test]
    fn digest_changes_on_added_file() {
        let before = vec![entry("a.json", 100, 1000)];
        let after = vec![entry("a.json", 100, 1000), entry("b.json", 1, 1)];

        assert_ne!(digest_entries(&before), digest_entries(&after));
    }

    #[test]
    fn empty_set_is_sha256_of_empty_string() {
        assert_eq!(
            empty_digest(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn extension_hash_normalizes() {
        let a = extension_set_hash(["JSON", ".safetensors"]);
        let b = extension_set_hash(["safetensors", "json", "json"]);

        assert_eq!(a, b);
        assert_ne!(a, extension_set_hash(["json"]));
    }

    #[test]
    fn directory_digest_filters_extensions() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.safetensors"), vec![0u8; 10]).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let calc = ContentDigestCalculator::new(["safetensors"]);
        let with_txt = ContentDigestCalculator::new(["safetensors", "txt"]);

        let d1 = calc.digest_directory(dir.path(), false).unwrap();
        let d2 = with_txt.digest_directory(dir.path(), false).unwrap();

        assert_ne!(d1, d2);
    }

    #[test]
    fn directory_digest_respects_recursion() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        fs::write(dir.path().join("sub/b.json"), "{}").unwrap();

        let calc = ContentDigestCalculator::new(["json"]);

        let flat = calc.digest_directory(dir.path(), false).unwrap();
        let deep = calc.digest_directory(dir.path(), true).unwrap();

        assert_ne!(flat, deep);
    }

    #[test]
    fn empty_directory_yields_canonical_digest() {
        let dir = TempDir::new().unwrap();
        let calc = ContentDigestCalculator::new(["json"]);

        let digest = calc.digest_directory(dir.path(), true).unwrap();
        assert_eq!(digest, empty_digest());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let calc = ContentDigestCalculator::new(["json"]);
        let result = calc.digest_directory(Path::new("/nonexistent/modelshelf-test"), true);

        assert!(result.is_err());
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.JSON"), "{}").unwrap();

        let calc = ContentDigestCalculator::new(["json"]);
        let digest = calc.digest_directory(dir.path(), false).unwrap();

        assert_ne!(digest, empty_digest());
    }
}

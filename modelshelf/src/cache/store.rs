//! Persistent cache tier backed by a single SQLite file.
//!
//! Two tables, one per cache kind, keyed by the composed cache key, with
//! secondary indexes on `source_id` and `last_accessed_at` so source-scoped
//! invalidation and LRU-ordered eviction never scan full tables.
//!
//! The store is deliberately dumb: it persists and retrieves records and
//! runs the sweep, while TTL interpretation, payload deserialization, and
//! statistics live in the orchestrator above it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::stats::StoreTableCounts;
use super::types::{path_is_ancestor, CacheError, CacheKey, FreshnessToken};
use crate::time::unix_millis_now;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS object_meta (
    cache_key        TEXT PRIMARY KEY,
    source_id        TEXT NOT NULL,
    normalized_path  TEXT NOT NULL,
    payload          BLOB NOT NULL,
    src_mtime_ms     INTEGER,
    src_size         INTEGER,
    cached_at        INTEGER NOT NULL,
    ttl_secs         INTEGER NOT NULL,
    last_accessed_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_object_meta_source ON object_meta(source_id);
CREATE INDEX IF NOT EXISTS idx_object_meta_accessed ON object_meta(last_accessed_at);

CREATE TABLE IF NOT EXISTS listings (
    cache_key        TEXT PRIMARY KEY,
    source_id        TEXT NOT NULL,
    directory_path   TEXT NOT NULL,
    recursive        INTEGER NOT NULL,
    ext_set_hash     TEXT NOT NULL,
    content_digest   TEXT,
    payload          BLOB NOT NULL,
    cached_at        INTEGER NOT NULL,
    ttl_secs         INTEGER NOT NULL,
    last_accessed_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_listings_source ON listings(source_id);
CREATE INDEX IF NOT EXISTS idx_listings_accessed ON listings(last_accessed_at);
"#;

/// A record as retrieved from the store.
///
/// TTL has not been interpreted yet; `cached_at_ms` and `ttl` are returned
/// so the orchestrator can decide expiry itself.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub payload: Vec<u8>,
    pub token: Option<FreshnessToken>,
    pub cached_at_ms: u64,
    pub ttl: Duration,
}

impl StoredRecord {
    /// Whether the record is past its absolute expiry at `now_ms`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.cached_at_ms.saturating_add(self.ttl.as_millis() as u64)
    }
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Rows removed because their TTL lapsed.
    pub expired: u64,
    /// Rows removed because a table exceeded its quota.
    pub evicted: u64,
}

/// Durable, single-file cache store.
pub struct PersistentStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl PersistentStore {
    /// Open (creating if needed) the store at `db_path`.
    ///
    /// Fails when the file or its directory cannot be created or opened;
    /// the orchestrator treats that as a degradation to memory-only
    /// operation, not a fatal error.
    pub fn open(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // journal_mode returns the resulting mode as a row
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;

        debug!(path = %db_path.display(), "persistent cache store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
        })
    }

    /// Fetch a record by key, updating its `last_accessed_at`.
    ///
    /// Expired records are returned as-is; expiry is the orchestrator's
    /// call to make (and to delete).
    pub fn get(&self, key: &CacheKey) -> Result<Option<StoredRecord>, CacheError> {
        let composed = key.composed();
        let conn = self.conn.lock().unwrap();

        let record = match key {
            CacheKey::Metadata { .. } => conn
                .query_row(
                    "SELECT payload, src_mtime_ms, src_size, cached_at, ttl_secs
                     FROM object_meta WHERE cache_key = ?1",
                    params![composed],
                    |row| {
                        let mtime: Option<i64> = row.get(1)?;
                        let size: Option<i64> = row.get(2)?;
                        let token = match (mtime, size) {
                            (Some(m), Some(s)) => {
                                Some(FreshnessToken::stat(m as u64, s as u64))
                            }
                            _ => None,
                        };
                        Ok(StoredRecord {
                            payload: row.get(0)?,
                            token,
                            cached_at_ms: row.get::<_, i64>(3)? as u64,
                            ttl: Duration::from_secs(row.get::<_, i64>(4)? as u64),
                        })
                    },
                )
                .optional()?,
            CacheKey::Listing { .. } => conn
                .query_row(
                    "SELECT payload, content_digest, cached_at, ttl_secs
                     FROM listings WHERE cache_key = ?1",
                    params![composed],
                    |row| {
                        let digest: Option<String> = row.get(1)?;
                        Ok(StoredRecord {
                            payload: row.get(0)?,
                            token: digest.map(FreshnessToken::Digest),
                            cached_at_ms: row.get::<_, i64>(2)? as u64,
                            ttl: Duration::from_secs(row.get::<_, i64>(3)? as u64),
                        })
                    },
                )
                .optional()?,
        };

        if record.is_some() {
            let table = table_for(key);
            conn.execute(
                &format!("UPDATE {table} SET last_accessed_at = ?1 WHERE cache_key = ?2"),
                params![unix_millis_now() as i64, composed],
            )?;
        }

        Ok(record)
    }

    /// Insert or replace a record (last write wins).
    pub fn put(
        &self,
        key: &CacheKey,
        payload: &[u8],
        token: Option<&FreshnessToken>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let now = unix_millis_now() as i64;
        let conn = self.conn.lock().unwrap();

        match key {
            CacheKey::Metadata {
                source_id,
                normalized_path,
            } => {
                let (mtime, size) = match token {
                    Some(FreshnessToken::Stat { mtime_ms, size }) => {
                        (Some(*mtime_ms as i64), Some(*size as i64))
                    }
                    _ => (None, None),
                };
                conn.execute(
                    "INSERT OR REPLACE INTO object_meta
                     (cache_key, source_id, normalized_path, payload,
                      src_mtime_ms, src_size, cached_at, ttl_secs, last_accessed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        key.composed(),
                        source_id,
                        normalized_path,
                        payload,
                        mtime,
                        size,
                        now,
                        ttl.as_secs() as i64,
                        now,
                    ],
                )?;
            }
            CacheKey::Listing {
                source_id,
                directory_path,
                recursive,
                ext_set_hash,
            } => {
                let digest = match token {
                    Some(FreshnessToken::Digest(d)) => Some(d.as_str()),
                    _ => None,
                };
                conn.execute(
                    "INSERT OR REPLACE INTO listings
                     (cache_key, source_id, directory_path, recursive, ext_set_hash,
                      content_digest, payload, cached_at, ttl_secs, last_accessed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        key.composed(),
                        source_id,
                        directory_path,
                        *recursive as i64,
                        ext_set_hash,
                        digest,
                        payload,
                        now,
                        ttl.as_secs() as i64,
                        now,
                    ],
                )?;
            }
        }

        Ok(())
    }

    /// Delete one record. Returns true if a row was removed.
    pub fn delete(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let table = table_for(key);
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            &format!("DELETE FROM {table} WHERE cache_key = ?1"),
            params![key.composed()],
        )?;
        Ok(changed > 0)
    }

    /// Delete every record belonging to a source, both tables.
    pub fn delete_by_source(&self, source_id: &str) -> Result<usize, CacheError> {
        let conn = self.conn.lock().unwrap();
        let mut removed = conn.execute(
            "DELETE FROM object_meta WHERE source_id = ?1",
            params![source_id],
        )?;
        removed += conn.execute(
            "DELETE FROM listings WHERE source_id = ?1",
            params![source_id],
        )?;
        Ok(removed)
    }

    /// Delete listing records covering `directory_path`.
    ///
    /// Matches the exact directory, plus recursive listings of any
    /// ancestor. Matching runs in Rust rather than SQL `LIKE` so wildcard
    /// characters in paths cannot over- or under-match.
    pub fn delete_listings_under(
        &self,
        source_id: &str,
        directory_path: &str,
    ) -> Result<usize, CacheError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let victims: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT cache_key, directory_path, recursive
                 FROM listings WHERE source_id = ?1",
            )?;
            let rows = stmt.query_map(params![source_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? != 0,
                ))
            })?;

            let mut victims = Vec::new();
            for row in rows {
                let (cache_key, entry_dir, recursive) = row?;
                if entry_dir == directory_path
                    || (recursive && path_is_ancestor(&entry_dir, directory_path))
                {
                    victims.push(cache_key);
                }
            }
            victims
        };

        let removed = victims.len();
        {
            let mut stmt = tx.prepare("DELETE FROM listings WHERE cache_key = ?1")?;
            for key in &victims {
                stmt.execute(params![key])?;
            }
        }
        tx.commit()?;

        Ok(removed)
    }

    /// Remove expired rows, then LRU rows beyond the per-table quota.
    pub fn sweep(&self, max_items_per_table: usize) -> Result<SweepOutcome, CacheError> {
        let now = unix_millis_now() as i64;
        let conn = self.conn.lock().unwrap();
        let mut outcome = SweepOutcome::default();

        for table in ["object_meta", "listings"] {
            let expired = conn.execute(
                &format!("DELETE FROM {table} WHERE cached_at + ttl_secs * 1000 <= ?1"),
                params![now],
            )?;
            outcome.expired += expired as u64;

            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {table}"),
                [],
                |row| row.get(0),
            )?;
            let excess = (count as usize).saturating_sub(max_items_per_table);
            if excess > 0 {
                let evicted = conn.execute(
                    &format!(
                        "DELETE FROM {table} WHERE cache_key IN
                         (SELECT cache_key FROM {table}
                          ORDER BY last_accessed_at ASC, cache_key ASC LIMIT ?1)"
                    ),
                    params![excess as i64],
                )?;
                outcome.evicted += evicted as u64;
            }
        }

        Ok(outcome)
    }

    /// Current row counts per table.
    pub fn counts(&self) -> Result<StoreTableCounts, CacheError> {
        let conn = self.conn.lock().unwrap();
        let metadata_rows: i64 =
            conn.query_row("SELECT COUNT(*) FROM object_meta", [], |row| row.get(0))?;
        let listing_rows: i64 =
            conn.query_row("SELECT COUNT(*) FROM listings", [], |row| row.get(0))?;
        Ok(StoreTableCounts {
            metadata_rows: metadata_rows as u64,
            listing_rows: listing_rows as u64,
        })
    }

    /// Size of the store on disk, including the WAL sidecar.
    pub fn file_size_bytes(&self) -> u64 {
        let main = fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);
        let mut wal_path = self.db_path.as_os_str().to_owned();
        wal_path.push("-wal");
        let wal = fs::metadata(PathBuf::from(wal_path))
            .map(|m| m.len())
            .unwrap_or(0);
        main + wal
    }

    /// Remove every row from both tables.
    pub fn clear(&self) -> Result<(), CacheError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM object_meta", [])?;
        conn.execute("DELETE FROM listings", [])?;
        Ok(())
    }
}

fn table_for(key: &CacheKey) -> &'static str {
    match key {
        CacheKey::Metadata { .. } => "object_meta",
        CacheKey::Listing { .. } => "listings",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> PersistentStore {
        PersistentStore::open(&dir.path().join("cache.db")).unwrap()
    }

    fn hour() -> Duration {
        Duration::from_secs(3600)
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("cache.db");

        let store = PersistentStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.counts().unwrap(), StoreTableCounts::default());
    }

    #[test]
    fn open_fails_when_parent_is_a_file() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let result = PersistentStore::open(&blocker.join("cache.db"));
        assert!(result.is_err());
    }

    #[test]
    fn metadata_roundtrip_preserves_token() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let key = CacheKey::metadata("local", "models/a.safetensors");
        let token = FreshnessToken::stat(1000, 100);

        store.put(&key, b"payload", Some(&token), hour()).unwrap();

        let record = store.get(&key).unwrap().unwrap();
        assert_eq!(record.payload, b"payload");
        assert_eq!(record.token, Some(token));
        assert!(!record.is_expired_at(unix_millis_now()));
    }

    #[test]
    fn listing_roundtrip_preserves_digest() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let key = CacheKey::listing("local", "models", true, "exthash");
        let token = FreshnessToken::digest("d1");

        store.put(&key, b"items", Some(&token), hour()).unwrap();

        let record = store.get(&key).unwrap().unwrap();
        assert_eq!(record.payload, b"items");
        assert_eq!(record.token, Some(FreshnessToken::digest("d1")));
    }

    #[test]
    fn listing_without_digest_roundtrips_as_none() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let key = CacheKey::listing("local", "models", false, "exthash");

        store.put(&key, b"items", None, hour()).unwrap();

        let record = store.get(&key).unwrap().unwrap();
        assert_eq!(record.token, None);
    }

    #[test]
    fn absent_key_is_none() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let record = store.get(&CacheKey::metadata("local", "nope")).unwrap();
        assert!(record.is_none());
    }

    #[test]
    fn put_overwrites_existing_row() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let key = CacheKey::metadata("local", "a");

        store.put(&key, b"old", None, hour()).unwrap();
        store.put(&key, b"new", None, hour()).unwrap();

        let record = store.get(&key).unwrap().unwrap();
        assert_eq!(record.payload, b"new");
        assert_eq!(store.counts().unwrap().metadata_rows, 1);
    }

    #[test]
    fn delete_removes_row() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let key = CacheKey::metadata("local", "a");

        store.put(&key, b"x", None, hour()).unwrap();
        assert!(store.delete(&key).unwrap());
        assert!(!store.delete(&key).unwrap());
        assert!(store.get(&key).unwrap().is_none());
    }

    #[test]
    fn delete_by_source_spans_both_tables() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .put(&CacheKey::metadata("local", "a"), b"x", None, hour())
            .unwrap();
        store
            .put(&CacheKey::listing("local", "m", true, "h"), b"y", None, hour())
            .unwrap();
        store
            .put(&CacheKey::metadata("remote", "a"), b"z", None, hour())
            .unwrap();

        assert_eq!(store.delete_by_source("local").unwrap(), 2);

        let counts = store.counts().unwrap();
        assert_eq!(counts.metadata_rows, 1);
        assert_eq!(counts.listing_rows, 0);
    }

    #[test]
    fn delete_listings_under_respects_recursion() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let recursive_root = CacheKey::listing("local", "models", true, "h");
        let flat_root = CacheKey::listing("local", "models", false, "h");
        let exact = CacheKey::listing("local", "models/loras", true, "h");
        let sibling = CacheKey::listing("local", "models/other", false, "h");

        for key in [&recursive_root, &flat_root, &exact, &sibling] {
            store.put(key, b"x", None, hour()).unwrap();
        }

        let removed = store.delete_listings_under("local", "models/loras").unwrap();
        assert_eq!(removed, 2);
        assert!(store.get(&recursive_root).unwrap().is_none());
        assert!(store.get(&flat_root).unwrap().is_some());
        assert!(store.get(&exact).unwrap().is_none());
        assert!(store.get(&sibling).unwrap().is_some());
    }

    #[test]
    fn delete_listings_under_is_literal_about_wildcards() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        // An underscore in SQL LIKE would match any character; make sure
        // "a_b" never covers "axb".
        let tricky = CacheKey::listing("local", "a_b", true, "h");
        store.put(&tricky, b"x", None, hour()).unwrap();

        assert_eq!(store.delete_listings_under("local", "axb/sub").unwrap(), 0);
        assert!(store.get(&tricky).unwrap().is_some());
    }

    #[test]
    fn sweep_removes_expired_rows() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .put(
                &CacheKey::metadata("local", "dead"),
                b"x",
                None,
                Duration::ZERO,
            )
            .unwrap();
        store
            .put(&CacheKey::metadata("local", "live"), b"y", None, hour())
            .unwrap();

        let outcome = store.sweep(100).unwrap();
        assert_eq!(outcome.expired, 1);
        assert_eq!(outcome.evicted, 0);
        assert!(store.get(&CacheKey::metadata("local", "dead")).unwrap().is_none());
        assert!(store.get(&CacheKey::metadata("local", "live")).unwrap().is_some());
    }

    #[test]
    fn sweep_evicts_lru_rows_beyond_quota() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for name in ["one", "two", "three"] {
            store
                .put(&CacheKey::metadata("local", name), b"x", None, hour())
                .unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }

        // Touch "one" so "two" becomes the LRU row
        store.get(&CacheKey::metadata("local", "one")).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let outcome = store.sweep(2).unwrap();
        assert_eq!(outcome.evicted, 1);
        assert!(store.get(&CacheKey::metadata("local", "one")).unwrap().is_some());
        assert!(store.get(&CacheKey::metadata("local", "two")).unwrap().is_none());
        assert!(store.get(&CacheKey::metadata("local", "three")).unwrap().is_some());
    }

    #[test]
    fn counts_and_file_size_reflect_contents() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .put(&CacheKey::metadata("local", "a"), b"x", None, hour())
            .unwrap();
        store
            .put(&CacheKey::listing("local", "m", false, "h"), b"y", None, hour())
            .unwrap();

        let counts = store.counts().unwrap();
        assert_eq!(counts.metadata_rows, 1);
        assert_eq!(counts.listing_rows, 1);
        assert!(store.file_size_bytes() > 0);
    }

    #[test]
    fn clear_empties_both_tables() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .put(&CacheKey::metadata("local", "a"), b"x", None, hour())
            .unwrap();
        store
            .put(&CacheKey::listing("local", "m", false, "h"), b"y", None, hour())
            .unwrap();

        store.clear().unwrap();
        assert_eq!(store.counts().unwrap(), StoreTableCounts::default());
    }

    #[test]
    fn reopen_sees_persisted_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let key = CacheKey::metadata("local", "a");

        {
            let store = PersistentStore::open(&path).unwrap();
            store.put(&key, b"persisted", None, hour()).unwrap();
        }

        let store = PersistentStore::open(&path).unwrap();
        let record = store.get(&key).unwrap().unwrap();
        assert_eq!(record.payload, b"persisted");
    }
}

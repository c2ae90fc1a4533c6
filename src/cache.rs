//! Result cache keyed by a deterministic query fingerprint.
//!
//! Two requests with identical SQL and output format collapse to the same
//! cache slot regardless of their query ids. Values are the fully encoded
//! payload bytes, written only after successful, non-cancelled executions.
//! Entries have no expiry; they persist until externally evicted.

use std::collections::HashMap;
use std::path::Path;

use log::debug;
use parking_lot::RwLock;
use redb::{Database, TableDefinition};
use sha2::{Digest, Sha256};

use crate::command::OutputFormat;
use crate::error::{GatewayError, Result};

const RESULTS: TableDefinition<&str, &[u8]> = TableDefinition::new("query_results");

/// Deterministic cache key for `(sql, format)`.
///
/// Pure function of its inputs, independent of process restarts, so the
/// cache may be backed by persistent storage.
pub fn fingerprint(sql: &str, format: OutputFormat) -> String {
    let digest = Sha256::digest(sql.as_bytes());
    format!("{}.{}", hex::encode(digest), format.as_str())
}

/// Persistent key → bytes store for encoded query results.
///
/// Reads and writes are independent of the cursor registry and executor: a
/// cache hit never touches either.
pub trait ResultCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// On-disk cache backed by redb.
pub struct RedbCache {
    db: Database,
}

impl RedbCache {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Database::create(path.as_ref()).map_err(cache_err)?;
        debug!("result cache opened at {}", path.as_ref().display());
        Ok(Self { db })
    }
}

impl ResultCache for RedbCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(cache_err)?;
        let table = match txn.open_table(RESULTS) {
            Ok(table) => table,
            // First read before any write: the table does not exist yet.
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(cache_err(e)),
        };
        let value = table.get(key).map_err(cache_err)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let txn = self.db.begin_write().map_err(cache_err)?;
        {
            let mut table = txn.open_table(RESULTS).map_err(cache_err)?;
            table.insert(key, value).map_err(cache_err)?;
        }
        txn.commit().map_err(cache_err)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let txn = self.db.begin_write().map_err(cache_err)?;
        txn.delete_table(RESULTS).map_err(cache_err)?;
        txn.commit().map_err(cache_err)?;
        Ok(())
    }
}

/// In-memory cache, used in tests and when persistence is disabled.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}

fn cache_err<E: std::fmt::Display>(err: E) -> GatewayError {
    GatewayError::Cache(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint("select 1", OutputFormat::Json);
        let b = fingerprint("select 1", OutputFormat::Json);
        assert_eq!(a, b);
        assert!(a.ends_with(".json"));
    }

    #[test]
    fn test_fingerprint_varies_by_format_and_sql() {
        let json = fingerprint("select 1", OutputFormat::Json);
        let arrow = fingerprint("select 1", OutputFormat::Arrow);
        let other = fingerprint("select 2", OutputFormat::Json);
        assert_ne!(json, arrow);
        assert_ne!(json, other);
    }

    #[test]
    fn test_memory_cache_round_trip() {
        let cache = MemoryCache::new();
        let key = fingerprint("select 1", OutputFormat::Json);
        assert_eq!(cache.get(&key).unwrap(), None);

        cache.put(&key, b"[{\"1\":1}]").unwrap();
        assert_eq!(cache.get(&key).unwrap(), Some(b"[{\"1\":1}]".to_vec()));

        cache.clear().unwrap();
        assert_eq!(cache.get(&key).unwrap(), None);
    }

    #[test]
    fn test_redb_cache_miss_before_first_write() {
        let dir = TempDir::new().unwrap();
        let cache = RedbCache::open(dir.path().join("cache.redb")).unwrap();
        assert_eq!(cache.get("missing").unwrap(), None);
    }

    #[test]
    fn test_redb_cache_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.redb");
        let key = fingerprint("select 42", OutputFormat::Arrow);

        {
            let cache = RedbCache::open(&path).unwrap();
            cache.put(&key, &[1, 2, 3]).unwrap();
        }

        let cache = RedbCache::open(&path).unwrap();
        assert_eq!(cache.get(&key).unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_redb_cache_clear() {
        let dir = TempDir::new().unwrap();
        let cache = RedbCache::open(dir.path().join("cache.redb")).unwrap();
        cache.put("k", b"v").unwrap();
        cache.clear().unwrap();
        assert_eq!(cache.get("k").unwrap(), None);
    }
}

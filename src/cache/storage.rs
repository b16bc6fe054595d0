//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Metadata about a single stored entry.
#[derive(Debug, Clone)]
pub struct StoredEntry {
  pub key: String,
  /// Length of the stored JSON text in bytes
  pub size: usize,
  /// When the entry was last written (informational, entries never expire)
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Backends deal in raw JSON text keyed by string; typing and parsing live in
/// [`PersistentCache`](super::PersistentCache).
pub trait CacheStorage: Send + Sync {
  /// Get the stored text for a key.
  fn get_raw(&self, key: &str) -> Result<Option<String>>;

  /// Store text under a key, replacing any previous value.
  fn put_raw(&self, key: &str, data: &str) -> Result<()>;

  /// Delete a key. Deleting an absent key is not an error.
  fn delete(&self, key: &str) -> Result<()>;

  /// Delete every key starting with `prefix`, returning how many were removed.
  fn delete_prefix(&self, prefix: &str) -> Result<usize>;

  /// List stored entries ordered by key.
  fn entries(&self) -> Result<Vec<StoredEntry>>;

  /// Remove everything.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get_raw(&self, _key: &str) -> Result<Option<String>> {
    Ok(None) // Always miss
  }

  fn put_raw(&self, _key: &str, _data: &str) -> Result<()> {
    Ok(()) // Discard
  }

  fn delete(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn delete_prefix(&self, _prefix: &str) -> Result<usize> {
    Ok(0)
  }

  fn entries(&self) -> Result<Vec<StoredEntry>> {
    Ok(Vec::new())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database. Nothing survives the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path for a given backend URL.
  ///
  /// The file name carries a short hash of the URL so caches for different
  /// backends never mix.
  pub fn default_path(api_url: &str) -> Result<PathBuf> {
    use sha2::{Digest, Sha256};

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    let mut hasher = Sha256::new();
    hasher.update(api_url.trim_end_matches('/').as_bytes());
    let digest = hex::encode(hasher.finalize());

    Ok(
      data_dir
        .join("ambassador")
        .join(format!("cache-{}.db", &digest[..16])),
    )
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One JSON document per key
CREATE TABLE IF NOT EXISTS kv_cache (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl CacheStorage for SqliteStorage {
  fn get_raw(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT data FROM kv_cache WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))
  }

  fn put_raw(&self, key: &str, data: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_cache (key, data, cached_at) VALUES (?, ?, datetime('now'))",
        params![key, data],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", key, e))?;

    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM kv_cache WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to delete cache entry {}: {}", key, e))?;

    Ok(())
  }

  fn delete_prefix(&self, prefix: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // substr instead of LIKE so '%' and '_' in keys are matched literally
    conn
      .execute(
        "DELETE FROM kv_cache WHERE substr(key, 1, length(?1)) = ?1",
        params![prefix],
      )
      .map_err(|e| eyre!("Failed to delete cache entries under {}: {}", prefix, e))
  }

  fn entries(&self) -> Result<Vec<StoredEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT key, length(CAST(data AS BLOB)), cached_at FROM kv_cache ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare entry listing: {}", e))?;

    let rows = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to list cache entries: {}", e))?
      .collect::<rusqlite::Result<Vec<(String, i64, String)>>>()
      .map_err(|e| eyre!("Failed to decode cache entry: {}", e))?;

    rows
      .into_iter()
      .map(|(key, size, cached_at)| {
        Ok(StoredEntry {
          key,
          size: usize::try_from(size).unwrap_or_default(),
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM kv_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;

    Ok(())
  }
}

/// In-memory storage whose reads or writes can be switched to fail.
#[cfg(test)]
pub(crate) struct FailingStorage {
  inner: SqliteStorage,
  pub fail_reads: std::sync::Arc<std::sync::atomic::AtomicBool>,
  pub fail_writes: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
impl FailingStorage {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
      fail_reads: Default::default(),
      fail_writes: Default::default(),
    }
  }

  pub fn failing_reads() -> Self {
    let storage = Self::new();
    storage.fail_reads.store(true, std::sync::atomic::Ordering::SeqCst);
    storage
  }

  pub fn failing_writes() -> Self {
    let storage = Self::new();
    storage.fail_writes.store(true, std::sync::atomic::Ordering::SeqCst);
    storage
  }
}

#[cfg(test)]
impl CacheStorage for FailingStorage {
  fn get_raw(&self, key: &str) -> Result<Option<String>> {
    if self.fail_reads.load(std::sync::atomic::Ordering::SeqCst) {
      return Err(eyre!("disk I/O error"));
    }
    self.inner.get_raw(key)
  }

  fn put_raw(&self, key: &str, data: &str) -> Result<()> {
    if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
      return Err(eyre!("quota exceeded"));
    }
    self.inner.put_raw(key, data)
  }

  fn delete(&self, key: &str) -> Result<()> {
    self.inner.delete(key)
  }

  fn delete_prefix(&self, prefix: &str) -> Result<usize> {
    self.inner.delete_prefix(prefix)
  }

  fn entries(&self) -> Result<Vec<StoredEntry>> {
    self.inner.entries()
  }

  fn clear(&self) -> Result<()> {
    self.inner.clear()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

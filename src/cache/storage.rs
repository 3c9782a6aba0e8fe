//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use url::Url;

use super::traits::{CachedResponse, RequestKey};
use crate::net::Response;

/// Trait for cache storage backends.
///
/// Every call is atomic on its own; callers get no cross-call locking.
pub trait CacheStorage: Send + Sync {
  /// Register a namespace. Existing namespaces are left untouched.
  fn create_namespace(&self, namespace: &str) -> Result<()>;

  /// All registered namespaces, sorted by name.
  fn namespaces(&self) -> Result<Vec<String>>;

  /// Drop a namespace and all of its entries. Returns the entry count removed.
  fn delete_namespace(&self, namespace: &str) -> Result<usize>;

  fn get(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Insert or overwrite the entry for `key`.
  fn put(&self, namespace: &str, key: &RequestKey, entry: &CachedResponse) -> Result<()>;

  /// Delete the entry for `key` only if it was captured before `cutoff`.
  ///
  /// A fresher entry written since the caller read the old one survives.
  fn delete_if_older(
    &self,
    namespace: &str,
    key: &RequestKey,
    cutoff: DateTime<Utc>,
  ) -> Result<bool>;

  fn count(&self, namespace: &str) -> Result<usize>;

  /// Normalized URLs of the stored entries, oldest first.
  fn urls(&self, namespace: &str) -> Result<Vec<String>>;

  /// Delete the oldest entries until at most `max_entries` remain.
  fn trim_to(&self, namespace: &str, max_entries: usize) -> Result<usize>;

  /// Delete entries captured before `cutoff`.
  fn delete_older_than(&self, namespace: &str, cutoff: DateTime<Utc>) -> Result<usize>;

  /// Read a worker registration value (e.g. the active shell version).
  fn registration(&self, key: &str) -> Result<Option<String>>;

  fn set_registration(&self, key: &str, value: &str) -> Result<()>;

  /// Remove every namespace, entry and registration value.
  fn clear(&self) -> Result<()>;
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

  /// Open a private in-memory database.
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

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_namespaces (
    name TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL
);

-- One row per (namespace, request identity); cached_at is unix millis
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    request_headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at INTEGER NOT NULL,
    PRIMARY KEY (namespace, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_age
    ON cache_entries(namespace, cached_at);

CREATE TABLE IF NOT EXISTS worker_registration (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

impl CacheStorage for SqliteStorage {
  fn create_namespace(&self, namespace: &str) -> Result<()> {
    self
      .lock()?
      .execute(
        "INSERT OR IGNORE INTO cache_namespaces (name, created_at) VALUES (?, ?)",
        params![namespace, Utc::now().timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to create namespace {}: {}", namespace, e))?;

    Ok(())
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_namespaces ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read namespace: {}", e))?;

    Ok(names)
  }

  fn delete_namespace(&self, namespace: &str) -> Result<usize> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let removed = tx
      .execute(
        "DELETE FROM cache_entries WHERE namespace = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", namespace, e))?;
    tx.execute(
      "DELETE FROM cache_namespaces WHERE name = ?",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to delete namespace {}: {}", namespace, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed)
  }

  fn get(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let row: Option<(String, u16, String, String, Vec<u8>, i64)> = conn
      .query_row(
        "SELECT response_url, status, headers, request_headers, body, cached_at
         FROM cache_entries WHERE namespace = ? AND request_hash = ?",
        params![namespace, key.hash()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key.url(), e))?;

    let Some((response_url, status, headers, request_headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let url = Url::parse(&response_url)
      .map_err(|e| eyre!("Corrupt cached url '{}': {}", response_url, e))?;
    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
    let request_headers: Vec<(String, String)> = serde_json::from_str(&request_headers)
      .map_err(|e| eyre!("Failed to deserialize cached request headers: {}", e))?;

    Ok(Some(CachedResponse {
      response: Response {
        url,
        status,
        headers,
        body,
      },
      request_headers,
      cached_at: from_millis(cached_at)?,
    }))
  }

  fn put(&self, namespace: &str, key: &RequestKey, entry: &CachedResponse) -> Result<()> {
    let headers = serde_json::to_string(&entry.response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
    let request_headers = serde_json::to_string(&entry.request_headers)
      .map_err(|e| eyre!("Failed to serialize request headers: {}", e))?;

    // REPLACE deletes the old row, so an overwrite also gets a fresh rowid
    self
      .lock()?
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (namespace, request_hash, url, response_url, status, headers, request_headers,
            body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          namespace,
          key.hash(),
          key.url(),
          entry.response.url.as_str(),
          entry.response.status,
          headers,
          request_headers,
          entry.response.body,
          entry.cached_at.timestamp_millis(),
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", key.url(), e))?;

    Ok(())
  }

  fn delete_if_older(
    &self,
    namespace: &str,
    key: &RequestKey,
    cutoff: DateTime<Utc>,
  ) -> Result<bool> {
    let removed = self
      .lock()?
      .execute(
        "DELETE FROM cache_entries
         WHERE namespace = ? AND request_hash = ? AND cached_at < ?",
        params![namespace, key.hash(), cutoff.timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to delete cache entry {}: {}", key.url(), e))?;

    Ok(removed > 0)
  }

  fn count(&self, namespace: &str) -> Result<usize> {
    let count: i64 = self
      .lock()?
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE namespace = ?",
        params![namespace],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", namespace, e))?;

    Ok(count as usize)
  }

  fn urls(&self, namespace: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT url FROM cache_entries WHERE namespace = ?
         ORDER BY cached_at ASC, rowid ASC",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let urls = stmt
      .query_map(params![namespace], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list entries of {}: {}", namespace, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    Ok(urls)
  }

  fn trim_to(&self, namespace: &str, max_entries: usize) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE namespace = ?",
        params![namespace],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", namespace, e))?;

    let excess = (count as usize).saturating_sub(max_entries);
    if excess == 0 {
      return Ok(0);
    }

    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE rowid IN (
           SELECT rowid FROM cache_entries WHERE namespace = ?1
           ORDER BY cached_at ASC, rowid ASC
           LIMIT ?2
         )",
        params![namespace, excess as i64],
      )
      .map_err(|e| eyre!("Failed to evict entries of {}: {}", namespace, e))?;

    Ok(removed)
  }

  fn delete_older_than(&self, namespace: &str, cutoff: DateTime<Utc>) -> Result<usize> {
    let removed = self
      .lock()?
      .execute(
        "DELETE FROM cache_entries WHERE namespace = ? AND cached_at < ?",
        params![namespace, cutoff.timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to expire entries of {}: {}", namespace, e))?;

    Ok(removed)
  }

  fn registration(&self, key: &str) -> Result<Option<String>> {
    self
      .lock()?
      .query_row(
        "SELECT value FROM worker_registration WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read registration {}: {}", key, e))
  }

  fn set_registration(&self, key: &str, value: &str) -> Result<()> {
    self
      .lock()?
      .execute(
        "INSERT OR REPLACE INTO worker_registration (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write registration {}: {}", key, e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(
        "DELETE FROM cache_entries;
         DELETE FROM cache_namespaces;
         DELETE FROM worker_registration;",
      )
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;

    Ok(())
  }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
  Utc
    .timestamp_millis_opt(millis)
    .single()
    .ok_or_else(|| eyre!("Invalid cached_at timestamp {}", millis))
}

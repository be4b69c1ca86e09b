//! SQLite-backed cache database.
//!
//! Cache stores, lifecycle metadata and the pending-change queue share one
//! database file. Every operation is a single statement on a single key,
//! which is the only atomicity the cache model needs: concurrent writers to
//! the same URL race and the last write wins.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::response::{CachedResponse, ResponseKind};

/// Schema for cache, metadata and queue tables.
const SCHEMA: &str = r#"
-- Lifecycle metadata (installed/active version markers)
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Cached responses, keyed by (store name, request URL)
CREATE TABLE IF NOT EXISTS cache_entries (
    store TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    kind TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    fetched_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store, url)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_url ON cache_entries(url);

-- Offline mutations awaiting replay, in insertion order
CREATE TABLE IF NOT EXISTS pending_changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    data TEXT NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// A raw pending-change row. The queue module wraps this in its domain type.
#[derive(Debug, Clone)]
pub struct QueueRow {
  pub id: i64,
  pub method: String,
  pub data: String,
  pub queued_at: DateTime<Utc>,
}

/// Database wrapper shared by the stores, the queue and lifecycle state.
pub struct CacheDb {
  conn: Mutex<Connection>,
}

impl CacheDb {
  /// Open or create the database at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the database at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations()?;

    Ok(db)
  }

  /// Open a throwaway in-memory database. Used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations()?;

    Ok(db)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("reelcache").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;

    Ok(())
  }

  // ===== Lifecycle metadata =====

  pub fn meta_get(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read meta key {}: {}", key, e))
  }

  pub fn meta_set(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write meta key {}: {}", key, e))?;

    Ok(())
  }

  // ===== Cache entries =====

  /// Store a response under the given store name, replacing any previous
  /// entry for the same URL.
  pub fn put_entry(&self, store: &str, response: &CachedResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (store, url, status, kind, headers, body, fetched_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))",
        params![
          store,
          response.url,
          response.status as i64,
          response.kind.as_str(),
          headers,
          response.body,
        ],
      )
      .map_err(|e| eyre!("Failed to store entry for {}: {}", response.url, e))?;

    Ok(())
  }

  /// Look up a response in one named store.
  pub fn get_entry(&self, store: &str, url: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row = conn
      .query_row(
        "SELECT status, kind, headers, body, fetched_at FROM cache_entries
         WHERE store = ?1 AND url = ?2",
        params![store, url],
        |row| {
          Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Vec<u8>>(3)?,
            row.get::<_, String>(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to query entry for {}: {}", url, e))?;

    match row {
      Some((status, kind, headers, body, fetched_at)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to parse stored headers for {}: {}", url, e))?;

        Ok(Some(CachedResponse {
          url: url.to_string(),
          status: status as u16,
          kind: ResponseKind::parse(&kind),
          headers,
          body,
          fetched_at: parse_datetime(&fetched_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  /// Look up a URL across all stores: the preferred names first, in order,
  /// then any other generation still on disk.
  pub fn match_any(&self, url: &str, preferred: &[&str]) -> Result<Option<CachedResponse>> {
    for store in preferred {
      if let Some(hit) = self.get_entry(store, url)? {
        return Ok(Some(hit));
      }
    }

    let leftover: Option<String> = {
      let conn = self
        .conn
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;

      conn
        .query_row(
          "SELECT store FROM cache_entries WHERE url = ?1 ORDER BY store LIMIT 1",
          params![url],
          |row| row.get(0),
        )
        .optional()
        .map_err(|e| eyre!("Failed to search stores for {}: {}", url, e))?
    };

    // Any store found here was not in `preferred`, or the loop above would
    // have returned already.
    match leftover {
      Some(store) => self.get_entry(&store, url),
      None => Ok(None),
    }
  }

  /// Names of all stores that currently hold at least one entry.
  pub fn store_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT store FROM cache_entries ORDER BY store")
      .map_err(|e| eyre!("Failed to prepare store listing: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| eyre!("Failed to read store names: {}", e))?;

    Ok(names)
  }

  /// Delete a whole store. Returns the number of entries removed.
  pub fn delete_store(&self, store: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM cache_entries WHERE store = ?1", params![store])
      .map_err(|e| eyre!("Failed to delete store {}: {}", store, e))
  }

  pub fn entry_count(&self, store: &str) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE store = ?1",
        params![store],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries in {}: {}", store, e))?;

    Ok(count as u64)
  }

  /// Timestamp of the most recently written entry in a store, if any.
  pub fn newest_entry_at(&self, store: &str) -> Result<Option<DateTime<Utc>>> {
    let newest: Option<String> = {
      let conn = self
        .conn
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;

      conn
        .query_row(
          "SELECT MAX(fetched_at) FROM cache_entries WHERE store = ?1",
          params![store],
          |row| row.get(0),
        )
        .optional()
        .map_err(|e| eyre!("Failed to read newest entry in {}: {}", store, e))?
        .flatten()
    };

    match newest {
      Some(s) => Ok(Some(parse_datetime(&s)?)),
      None => Ok(None),
    }
  }

  // ===== Pending-change queue =====

  /// Append a change. Returns the new row id, which doubles as the change's
  /// identity and its position in replay order.
  pub fn queue_push(&self, method: &str, data: &str) -> Result<i64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_changes (method, data, queued_at) VALUES (?1, ?2, datetime('now'))",
        params![method, data],
      )
      .map_err(|e| eyre!("Failed to queue change: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  /// All queued changes in insertion order.
  pub fn queue_rows(&self) -> Result<Vec<QueueRow>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT id, method, data, queued_at FROM pending_changes ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare queue listing: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list queue: {}", e))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| eyre!("Failed to read queue rows: {}", e))?;

    rows
      .into_iter()
      .map(|(id, method, data, queued_at)| {
        Ok(QueueRow {
          id,
          method,
          data,
          queued_at: parse_datetime(&queued_at)?,
        })
      })
      .collect()
  }

  pub fn queue_remove(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM pending_changes WHERE id = ?1", params![id])
      .map_err(|e| eyre!("Failed to remove change {}: {}", id, e))?;

    Ok(())
  }

  pub fn queue_len(&self) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending_changes", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count queued changes: {}", e))?;

    Ok(count as u64)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(url: &str, status: u16, body: &[u8]) -> CachedResponse {
    CachedResponse {
      url: url.to_string(),
      status,
      kind: ResponseKind::Basic,
      headers: vec![("content-type".to_string(), "text/html".to_string())],
      body: body.to_vec(),
      fetched_at: Utc::now(),
    }
  }

  #[test]
  fn test_meta_set_get_overwrite() {
    let db = CacheDb::open_in_memory().unwrap();
    assert_eq!(db.meta_get("active_version").unwrap(), None);

    db.meta_set("active_version", "v1").unwrap();
    assert_eq!(db.meta_get("active_version").unwrap(), Some("v1".to_string()));

    db.meta_set("active_version", "v2").unwrap();
    assert_eq!(db.meta_get("active_version").unwrap(), Some("v2".to_string()));
  }

  #[test]
  fn test_entry_round_trip() {
    let db = CacheDb::open_in_memory().unwrap();
    let stored = entry("http://localhost:3000/", 200, b"<html>");
    db.put_entry("static-v1", &stored).unwrap();

    let found = db
      .get_entry("static-v1", "http://localhost:3000/")
      .unwrap()
      .unwrap();
    assert_eq!(found.status, 200);
    assert_eq!(found.kind, ResponseKind::Basic);
    assert_eq!(found.body, b"<html>");
    assert_eq!(found.headers.len(), 1);
  }

  #[test]
  fn test_put_replaces_last_write_wins() {
    let db = CacheDb::open_in_memory().unwrap();
    db.put_entry("dynamic-v1", &entry("http://localhost:3000/api/stats", 200, b"one"))
      .unwrap();
    db.put_entry("dynamic-v1", &entry("http://localhost:3000/api/stats", 200, b"two"))
      .unwrap();

    let found = db
      .get_entry("dynamic-v1", "http://localhost:3000/api/stats")
      .unwrap()
      .unwrap();
    assert_eq!(found.body, b"two");
    assert_eq!(db.entry_count("dynamic-v1").unwrap(), 1);
  }

  #[test]
  fn test_match_any_prefers_listed_stores_in_order() {
    let db = CacheDb::open_in_memory().unwrap();
    db.put_entry("dynamic-v1", &entry("http://localhost:3000/", 200, b"dynamic"))
      .unwrap();
    db.put_entry("static-v1", &entry("http://localhost:3000/", 200, b"static"))
      .unwrap();

    let hit = db
      .match_any("http://localhost:3000/", &["static-v1", "dynamic-v1"])
      .unwrap()
      .unwrap();
    assert_eq!(hit.body, b"static");
  }

  #[test]
  fn test_match_any_falls_back_to_leftover_generation() {
    let db = CacheDb::open_in_memory().unwrap();
    db.put_entry("dynamic-v0", &entry("http://localhost:3000/old", 200, b"stale"))
      .unwrap();

    let hit = db
      .match_any("http://localhost:3000/old", &["static-v1", "dynamic-v1"])
      .unwrap()
      .unwrap();
    assert_eq!(hit.body, b"stale");

    let miss = db
      .match_any("http://localhost:3000/other", &["static-v1", "dynamic-v1"])
      .unwrap();
    assert!(miss.is_none());
  }

  #[test]
  fn test_delete_store_leaves_others_intact() {
    let db = CacheDb::open_in_memory().unwrap();
    db.put_entry("static-v0", &entry("http://localhost:3000/", 200, b"old"))
      .unwrap();
    db.put_entry("static-v1", &entry("http://localhost:3000/", 200, b"new"))
      .unwrap();

    let removed = db.delete_store("static-v0").unwrap();
    assert_eq!(removed, 1);
    assert_eq!(db.store_names().unwrap(), vec!["static-v1".to_string()]);
    assert!(db.get_entry("static-v1", "http://localhost:3000/").unwrap().is_some());
  }

  #[test]
  fn test_queue_rows_in_insertion_order() {
    let db = CacheDb::open_in_memory().unwrap();
    let first = db.queue_push("POST", r#"{"movieId":603}"#).unwrap();
    let second = db.queue_push("DELETE", r#"{"movieId":604}"#).unwrap();
    assert!(second > first);

    let rows = db.queue_rows().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id, first);
    assert_eq!(rows[0].method, "POST");
    assert_eq!(rows[1].id, second);

    db.queue_remove(first).unwrap();
    let rows = db.queue_rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, second);
    assert_eq!(db.queue_len().unwrap(), 1);
  }
}

//! Versioned store pairs and garbage collection.
//!
//! Each cache version owns two stores: a static store filled once at install
//! time with the app shell, and a dynamic store that accumulates runtime
//! responses. Activating a version deletes every store belonging to any
//! other version.

use color_eyre::Result;
use std::sync::Arc;
use tracing::info;

use super::backend::CacheDb;
use super::response::CachedResponse;

fn static_store_name(version: &str) -> String {
  format!("static-{}", version)
}

fn dynamic_store_name(version: &str) -> String {
  format!("dynamic-{}", version)
}

/// The pair of stores belonging to one cache version.
#[derive(Clone)]
pub struct StoreSet {
  db: Arc<CacheDb>,
  static_name: String,
  dynamic_name: String,
}

impl StoreSet {
  pub fn new(db: Arc<CacheDb>, version: &str) -> Self {
    Self {
      db,
      static_name: static_store_name(version),
      dynamic_name: dynamic_store_name(version),
    }
  }

  pub fn static_name(&self) -> &str {
    &self.static_name
  }

  pub fn dynamic_name(&self) -> &str {
    &self.dynamic_name
  }

  pub fn put_static(&self, response: &CachedResponse) -> Result<()> {
    self.db.put_entry(&self.static_name, response)
  }

  pub fn put_dynamic(&self, response: &CachedResponse) -> Result<()> {
    self.db.put_entry(&self.dynamic_name, response)
  }

  /// Look up a URL in this version's stores first, then in any leftover
  /// generation that has not been collected yet.
  pub fn lookup(&self, url: &str) -> Result<Option<CachedResponse>> {
    self
      .db
      .match_any(url, &[self.static_name.as_str(), self.dynamic_name.as_str()])
  }

  /// Delete every store that does not belong to this version. Returns the
  /// names of the stores that were dropped.
  pub fn collect_garbage(&self) -> Result<Vec<String>> {
    let mut dropped = Vec::new();

    for store in self.db.store_names()? {
      if store != self.static_name && store != self.dynamic_name {
        let removed = self.db.delete_store(&store)?;
        info!("Dropped store {} ({} entries)", store, removed);
        dropped.push(store);
      }
    }

    Ok(dropped)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::response::ResponseKind;
  use chrono::Utc;

  fn entry(url: &str, body: &[u8]) -> CachedResponse {
    CachedResponse {
      url: url.to_string(),
      status: 200,
      kind: ResponseKind::Basic,
      headers: Vec::new(),
      body: body.to_vec(),
      fetched_at: Utc::now(),
    }
  }

  #[test]
  fn test_store_names_follow_version() {
    assert_eq!(static_store_name("v2"), "static-v2");
    assert_eq!(dynamic_store_name("v2"), "dynamic-v2");
  }

  #[test]
  fn test_lookup_checks_static_before_dynamic() {
    let db = Arc::new(CacheDb::open_in_memory().unwrap());
    let stores = StoreSet::new(db, "v1");

    stores.put_dynamic(&entry("http://localhost:3000/", b"dynamic")).unwrap();
    stores.put_static(&entry("http://localhost:3000/", b"static")).unwrap();

    let hit = stores.lookup("http://localhost:3000/").unwrap().unwrap();
    assert_eq!(hit.body, b"static");
  }

  #[test]
  fn test_lookup_reaches_older_generations() {
    let db = Arc::new(CacheDb::open_in_memory().unwrap());
    let old = StoreSet::new(Arc::clone(&db), "v1");
    old.put_dynamic(&entry("http://localhost:3000/poster.jpg", b"jpeg")).unwrap();

    let current = StoreSet::new(db, "v2");
    let hit = current.lookup("http://localhost:3000/poster.jpg").unwrap().unwrap();
    assert_eq!(hit.body, b"jpeg");
  }

  #[test]
  fn test_collect_garbage_spares_current_version() {
    let db = Arc::new(CacheDb::open_in_memory().unwrap());

    let old = StoreSet::new(Arc::clone(&db), "v1");
    old.put_static(&entry("http://localhost:3000/", b"old shell")).unwrap();
    old.put_dynamic(&entry("http://localhost:3000/api/movies", b"old api")).unwrap();

    let current = StoreSet::new(Arc::clone(&db), "v2");
    current.put_static(&entry("http://localhost:3000/", b"new shell")).unwrap();

    let mut dropped = current.collect_garbage().unwrap();
    dropped.sort();
    assert_eq!(dropped, vec!["dynamic-v1".to_string(), "static-v1".to_string()]);

    assert_eq!(db.store_names().unwrap(), vec!["static-v2".to_string()]);
    assert!(current.lookup("http://localhost:3000/api/movies").unwrap().is_none());
  }

  #[test]
  fn test_collect_garbage_on_clean_db_is_noop() {
    let db = Arc::new(CacheDb::open_in_memory().unwrap());
    let stores = StoreSet::new(db, "v1");
    assert!(stores.collect_garbage().unwrap().is_empty());
  }
}

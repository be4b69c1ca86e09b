//! Durable queue of offline mutations.
//!
//! Writes made while offline are parked here and replayed in insertion order
//! on the next sync. A change leaves the queue only after its replay request
//! reached the server.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::store::{CacheDb, QueueRow};

/// Mutating methods a change may carry.
const ALLOWED_METHODS: &[&str] = &["POST", "PUT", "PATCH", "DELETE"];

/// One deferred write. `data` is replayed verbatim as the request body.
#[derive(Debug, Clone, Serialize)]
pub struct PendingChange {
  pub id: i64,
  pub method: String,
  pub data: Value,
  #[serde(skip)]
  pub queued_at: DateTime<Utc>,
}

impl TryFrom<QueueRow> for PendingChange {
  type Error = color_eyre::Report;

  fn try_from(row: QueueRow) -> Result<Self> {
    let data: Value = serde_json::from_str(&row.data)
      .map_err(|e| eyre!("Queued change {} holds invalid JSON: {}", row.id, e))?;

    Ok(Self {
      id: row.id,
      method: row.method,
      data,
      queued_at: row.queued_at,
    })
  }
}

/// Queue handle over the shared database.
#[derive(Clone)]
pub struct PendingQueue {
  db: Arc<CacheDb>,
}

impl PendingQueue {
  pub fn new(db: Arc<CacheDb>) -> Self {
    Self { db }
  }

  /// Validate and append a change. The method must be a mutating verb.
  pub fn push(&self, method: &str, data: &Value) -> Result<PendingChange> {
    let method = method.to_uppercase();
    if !ALLOWED_METHODS.contains(&method.as_str()) {
      return Err(eyre!(
        "Method {} cannot be queued (expected one of {})",
        method,
        ALLOWED_METHODS.join(", ")
      ));
    }

    let data_text = serde_json::to_string(data)
      .map_err(|e| eyre!("Failed to serialize change payload: {}", e))?;
    let id = self.db.queue_push(&method, &data_text)?;

    Ok(PendingChange {
      id,
      method,
      data: data.clone(),
      queued_at: Utc::now(),
    })
  }

  /// All queued changes, oldest first.
  pub fn entries(&self) -> Result<Vec<PendingChange>> {
    self
      .db
      .queue_rows()?
      .into_iter()
      .map(PendingChange::try_from)
      .collect()
  }

  pub fn remove(&self, id: i64) -> Result<()> {
    self.db.queue_remove(id)
  }

  pub fn len(&self) -> Result<u64> {
    self.db.queue_len()
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn queue() -> PendingQueue {
    PendingQueue::new(Arc::new(CacheDb::open_in_memory().unwrap()))
  }

  #[test]
  fn test_push_normalizes_method_case() {
    let queue = queue();
    let change = queue.push("post", &json!({"movieId": 603})).unwrap();
    assert_eq!(change.method, "POST");
  }

  #[test]
  fn test_push_rejects_non_mutating_methods() {
    let queue = queue();
    assert!(queue.push("GET", &json!({})).is_err());
    assert!(queue.push("HEAD", &json!({})).is_err());
  }

  #[test]
  fn test_entries_come_back_oldest_first() {
    let queue = queue();
    let first = queue.push("POST", &json!({"movieId": 603})).unwrap();
    let second = queue.push("DELETE", &json!({"movieId": 604})).unwrap();

    let entries = queue.entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, first.id);
    assert_eq!(entries[1].id, second.id);
    assert_eq!(entries[0].data, json!({"movieId": 603}));
  }

  #[test]
  fn test_remove_shrinks_queue() {
    let queue = queue();
    let change = queue.push("PUT", &json!({"progress": 0.5})).unwrap();
    assert!(!queue.is_empty().unwrap());

    queue.remove(change.id).unwrap();
    assert!(queue.is_empty().unwrap());
  }

  #[test]
  fn test_serialized_record_shape() {
    let queue = queue();
    let change = queue.push("POST", &json!({"movieId": 603})).unwrap();

    let value = serde_json::to_value(&change).unwrap();
    let object = value.as_object().unwrap();
    assert_eq!(object.len(), 3);
    assert!(object.contains_key("id"));
    assert_eq!(object["method"], "POST");
    assert_eq!(object["data"], json!({"movieId": 603}));
  }
}

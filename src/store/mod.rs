//! Persistent response stores for offline support.
//!
//! This module provides the cache half of the orchestrator:
//! - Caches full responses (status, headers, body) keyed by request URL
//! - Groups entries into versioned static/dynamic store pairs
//! - Collects stores left behind by previous versions
//! - Classifies responses by origin for cache-eligibility checks

mod backend;
mod response;
mod stores;

pub use backend::{CacheDb, QueueRow};
pub use response::{same_origin, CachedResponse, ResponseKind};
pub use stores::StoreSet;

//! The cache orchestrator.
//!
//! Ties the pieces together: version lifecycle (install, activate, garbage
//! collection), per-request strategy dispatch, queue drain on sync, and push
//! notification handling. Lifecycle state lives in the database so it
//! survives across invocations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::net::{Fetch, FetchRequest, FetchedResponse};
use crate::push::{self, ClickOutcome, Notification};
use crate::queue::{PendingChange, PendingQueue};
use crate::store::{CacheDb, CachedResponse, ResponseKind, StoreSet};
use crate::strategy::{FetchRules, Strategy};

const META_INSTALLED: &str = "installed_version";
const META_ACTIVE: &str = "active_version";

/// Lifecycle phase, derived from the persisted version markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
  Uninstalled,
  Installed(String),
  Active(String),
}

impl std::fmt::Display for Phase {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Phase::Uninstalled => write!(f, "uninstalled"),
      Phase::Installed(version) => write!(f, "installed ({}, not yet active)", version),
      Phase::Active(version) => write!(f, "active ({})", version),
    }
  }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  Network,
  Cache,
  /// No version is active, so the request bypassed the cache entirely.
  Passthrough,
}

impl std::fmt::Display for ServedFrom {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ServedFrom::Network => write!(f, "network"),
      ServedFrom::Cache => write!(f, "cache"),
      ServedFrom::Passthrough => write!(f, "passthrough"),
    }
  }
}

/// A response on its way back to the caller.
#[derive(Debug)]
pub struct Served {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub from: ServedFrom,
}

impl Served {
  fn network(response: FetchedResponse) -> Self {
    Self {
      status: response.status,
      headers: response.headers,
      body: response.body,
      from: ServedFrom::Network,
    }
  }

  fn passthrough(response: FetchedResponse) -> Self {
    Self {
      status: response.status,
      headers: response.headers,
      body: response.body,
      from: ServedFrom::Passthrough,
    }
  }

  fn cache(hit: CachedResponse) -> Self {
    Self {
      status: hit.status,
      headers: hit.headers,
      body: hit.body,
      from: ServedFrom::Cache,
    }
  }
}

#[derive(Debug)]
pub struct InstallReport {
  pub version: String,
  pub assets: usize,
}

#[derive(Debug)]
pub struct ActivateReport {
  pub version: String,
  pub dropped: Vec<String>,
}

/// Outcome of one queue drain.
#[derive(Debug, Default)]
pub struct DrainReport {
  pub recognized: bool,
  pub replayed: usize,
  pub failed: usize,
  pub remaining: u64,
}

#[derive(Debug)]
pub struct StoreStatus {
  pub name: String,
  pub entries: u64,
  pub newest: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct StatusReport {
  pub phase: Phase,
  pub installed_version: Option<String>,
  pub active_version: Option<String>,
  pub stores: Vec<StoreStatus>,
  pub pending_changes: u64,
}

pub struct Orchestrator<F: Fetch> {
  db: Arc<CacheDb>,
  fetcher: F,
  config: Config,
  rules: FetchRules,
  queue: PendingQueue,
  // Fire-and-forget cache writes, awaited by settle_writes.
  writes: Mutex<Vec<JoinHandle<()>>>,
}

impl<F: Fetch> Orchestrator<F> {
  pub fn new(config: Config, db: Arc<CacheDb>, fetcher: F) -> Self {
    let rules = config.fetch_rules();
    let queue = PendingQueue::new(Arc::clone(&db));

    Self {
      db,
      fetcher,
      config,
      rules,
      queue,
      writes: Mutex::new(Vec::new()),
    }
  }

  pub fn queue(&self) -> &PendingQueue {
    &self.queue
  }

  pub fn phase(&self) -> Result<Phase> {
    if let Some(version) = self.db.meta_get(META_ACTIVE)? {
      return Ok(Phase::Active(version));
    }
    match self.db.meta_get(META_INSTALLED)? {
      Some(version) => Ok(Phase::Installed(version)),
      None => Ok(Phase::Uninstalled),
    }
  }

  fn active_stores(&self) -> Result<Option<StoreSet>> {
    Ok(
      self
        .db
        .meta_get(META_ACTIVE)?
        .map(|version| StoreSet::new(Arc::clone(&self.db), &version)),
    )
  }

  // ===== Lifecycle =====

  /// Fetch the whole shell manifest and fill the static store. All-or-nothing:
  /// a single failed or non-200 fetch aborts the install and nothing is
  /// written.
  pub async fn install(&self) -> Result<InstallReport> {
    let version = self.config.cache_version.clone();
    let urls = self
      .config
      .shell_manifest
      .iter()
      .map(|path| self.config.resolve(path))
      .collect::<Result<Vec<_>>>()?;

    info!("Installing version {} ({} shell assets)", version, urls.len());

    let requests: Vec<FetchRequest> = urls.into_iter().map(FetchRequest::get).collect();
    let responses = try_join_all(requests.iter().map(|request| self.fetcher.fetch(request)))
      .await
      .map_err(|e| eyre!("Install aborted: {}", e))?;

    for (request, response) in requests.iter().zip(&responses) {
      if response.status != 200 {
        return Err(eyre!(
          "Install aborted: {} returned status {}",
          request.url,
          response.status
        ));
      }
    }

    let stores = StoreSet::new(Arc::clone(&self.db), &version);
    for (request, response) in requests.iter().zip(&responses) {
      stores.put_static(&self.to_cached(&request.url, response))?;
    }
    self.db.meta_set(META_INSTALLED, &version)?;

    info!("Version {} installed", version);

    Ok(InstallReport {
      version,
      assets: requests.len(),
    })
  }

  /// Promote the installed version: collect stores from other versions, then
  /// mark it active so fetch handling takes over immediately. The installed
  /// version must be the configured one; a stale install is never promoted.
  pub fn activate(&self) -> Result<ActivateReport> {
    let version = self
      .db
      .meta_get(META_INSTALLED)?
      .ok_or_else(|| eyre!("Nothing installed; run install first"))?;

    if version != self.config.cache_version {
      return Err(eyre!(
        "Installed version {} does not match configured version {}; run install first",
        version,
        self.config.cache_version
      ));
    }

    let stores = StoreSet::new(Arc::clone(&self.db), &version);
    let dropped = stores.collect_garbage()?;
    self.db.meta_set(META_ACTIVE, &version)?;

    info!("Version {} active ({} old stores dropped)", version, dropped.len());

    Ok(ActivateReport { version, dropped })
  }

  // ===== Fetch handling =====

  /// Serve one request. Strategies apply only to GET requests under an
  /// active version; everything else passes through to the network uncached.
  pub async fn handle_fetch(&self, request: FetchRequest) -> Result<Served> {
    if request.method != "GET" {
      debug!("{} {} passes through uncached", request.method, request.url);
      let response = self.fetcher.fetch(&request).await?;
      return Ok(Served::passthrough(response));
    }

    let stores = match self.active_stores()? {
      Some(stores) => stores,
      None => {
        debug!("No active version; passing {} through uncached", request.url);
        let response = self.fetcher.fetch(&request).await?;
        return Ok(Served::passthrough(response));
      }
    };

    let url = request.url;
    match self.rules.classify(&url) {
      Strategy::NetworkFirst => self.network_first(&stores, url).await,
      Strategy::ImageCacheFirst => self.cache_first(&stores, url, false).await,
      Strategy::AssetCacheFirst => self.cache_first(&stores, url, true).await,
    }
  }

  /// Live response preferred and echoed verbatim whatever its status; a 200
  /// copy lands in the dynamic store in the background. Cache is consulted
  /// only when the network itself fails.
  async fn network_first(&self, stores: &StoreSet, url: Url) -> Result<Served> {
    let request = FetchRequest::get(url.clone());
    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        if response.status == 200 {
          self.spawn_dynamic_write(stores, self.to_cached(&url, &response));
        }
        Ok(Served::network(response))
      }
      Err(e) => {
        debug!(url = %url, "Network-first fetch failed: {}", e);
        match self.lookup_best_effort(stores, &url) {
          Some(hit) => Ok(Served::cache(hit)),
          None => Err(eyre!(
            "Request to {} failed with no cached fallback: {}",
            url,
            e
          )),
        }
      }
    }
  }

  /// Cached bytes win outright; a miss costs exactly one fetch. With
  /// `same_origin_only` set, only basic 200 responses are cached, which keeps
  /// opaque cross-origin bytes out of the store.
  async fn cache_first(&self, stores: &StoreSet, url: Url, same_origin_only: bool) -> Result<Served> {
    if let Some(hit) = self.lookup_best_effort(stores, &url) {
      return Ok(Served::cache(hit));
    }

    let request = FetchRequest::get(url.clone());
    let response = self.fetcher.fetch(&request).await?;

    let entry = self.to_cached(&url, &response);
    let cacheable =
      entry.status == 200 && (!same_origin_only || entry.kind == ResponseKind::Basic);
    if cacheable {
      self.spawn_dynamic_write(stores, entry);
    }

    Ok(Served::network(response))
  }

  fn to_cached(&self, url: &Url, response: &FetchedResponse) -> CachedResponse {
    CachedResponse {
      url: url.to_string(),
      status: response.status,
      kind: ResponseKind::classify(&self.config.origin, url, &response.headers),
      headers: response.headers.clone(),
      body: response.body.clone(),
      fetched_at: Utc::now(),
    }
  }

  fn lookup_best_effort(&self, stores: &StoreSet, url: &Url) -> Option<CachedResponse> {
    match stores.lookup(url.as_str()) {
      Ok(hit) => hit,
      Err(e) => {
        warn!("Cache lookup for {} failed: {}", url, e);
        None
      }
    }
  }

  /// Launch a background cache write. Failures are logged and swallowed;
  /// caching is an optimization, never a delivery requirement.
  fn spawn_dynamic_write(&self, stores: &StoreSet, entry: CachedResponse) {
    let stores = stores.clone();
    let handle = tokio::spawn(async move {
      if let Err(e) = stores.put_dynamic(&entry) {
        warn!(url = %entry.url, "Failed to cache response: {}", e);
      }
    });

    match self.writes.lock() {
      Ok(mut writes) => writes.push(handle),
      Err(e) => warn!("Write registry poisoned: {}", e),
    }
  }

  /// Wait for all outstanding background cache writes.
  pub async fn settle_writes(&self) {
    let handles: Vec<JoinHandle<()>> = match self.writes.lock() {
      Ok(mut writes) => writes.drain(..).collect(),
      Err(e) => {
        warn!("Write registry poisoned: {}", e);
        Vec::new()
      }
    };

    for handle in handles {
      if let Err(e) = handle.await {
        warn!("Cache write task panicked: {}", e);
      }
    }
  }

  // ===== Sync =====

  /// Drain the pending-change queue sequentially. A change is removed once
  /// its replay reaches the server, whatever status comes back; transport
  /// failures leave it queued for the next pass.
  pub async fn handle_sync(&self, tag: &str) -> Result<DrainReport> {
    if tag != self.config.sync.tag {
      debug!("Ignoring unrecognized sync tag {}", tag);
      return Ok(DrainReport {
        recognized: false,
        remaining: self.queue.len()?,
        ..Default::default()
      });
    }

    let endpoint = self.config.sync_endpoint()?;
    let mut report = DrainReport {
      recognized: true,
      ..Default::default()
    };

    for change in self.queue.entries()? {
      match self.replay(&endpoint, &change).await {
        Ok(status) => {
          if status >= 400 {
            warn!(change = change.id, status, "Server rejected change");
          }
          self.queue.remove(change.id)?;
          report.replayed += 1;
        }
        Err(e) => {
          warn!(change = change.id, "Replay failed, keeping it queued: {}", e);
          report.failed += 1;
        }
      }
    }

    report.remaining = self.queue.len()?;
    Ok(report)
  }

  async fn replay(&self, endpoint: &Url, change: &PendingChange) -> Result<u16> {
    let body = serde_json::to_string(&change.data)
      .map_err(|e| eyre!("Failed to serialize change {}: {}", change.id, e))?;

    let request = FetchRequest::with_body(&change.method, endpoint.clone(), body);
    let response = self.fetcher.fetch(&request).await?;

    debug!(
      change = change.id,
      method = %change.method,
      status = response.status,
      "Replayed change"
    );
    Ok(response.status)
  }

  // ===== Push =====

  pub fn handle_push(&self, payload: Option<&str>) -> Notification {
    let notification = push::build_notification(payload, &self.config.notifications);
    info!("Push notification built: {}", notification.body);
    notification
  }

  pub fn handle_notification_click(&self, action: &str) -> ClickOutcome {
    push::resolve_click(action, &self.config.origin)
  }

  // ===== Status =====

  pub fn status(&self) -> Result<StatusReport> {
    let mut stores = Vec::new();
    for name in self.db.store_names()? {
      stores.push(StoreStatus {
        entries: self.db.entry_count(&name)?,
        newest: self.db.newest_entry_at(&name)?,
        name,
      });
    }

    Ok(StatusReport {
      phase: self.phase()?,
      installed_version: self.db.meta_get(META_INSTALLED)?,
      active_version: self.db.meta_get(META_ACTIVE)?,
      stores,
      pending_changes: self.queue.len()?,
    })
  }
}

//! Reconnect watcher.
//!
//! Runs the queue drain on an interval so offline mutations flow out as soon
//! as the network returns. Failed passes back off exponentially instead of
//! hammering an endpoint that just went away.

use color_eyre::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::net::Fetch;
use crate::orchestrator::Orchestrator;

/// First retry delay after a failed drain pass.
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retry delays double up to this ceiling.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Exponential backoff between failed drain passes.
#[derive(Debug)]
pub struct Backoff {
  next: Duration,
}

impl Backoff {
  pub fn new() -> Self {
    Self {
      next: INITIAL_RETRY_DELAY,
    }
  }

  /// Delay before the next attempt. Doubles on every call until the ceiling.
  pub fn next_delay(&mut self) -> Duration {
    let delay = self.next;
    self.next = (self.next * 2).min(MAX_RETRY_DELAY);
    delay
  }

  pub fn reset(&mut self) {
    self.next = INITIAL_RETRY_DELAY;
  }
}

impl Default for Backoff {
  fn default() -> Self {
    Self::new()
  }
}

/// Drain the queue now and keep draining until Ctrl-C. Clean passes wait the
/// configured poll interval; passes with failures retry on the backoff curve.
pub async fn watch<F: Fetch>(orchestrator: &Orchestrator<F>, sync: &SyncConfig) -> Result<()> {
  let poll = Duration::from_secs(sync.poll_secs);
  let mut backoff = Backoff::new();

  info!("Watching pending-change queue (poll every {:?})", poll);

  loop {
    let wait = match orchestrator.handle_sync(&sync.tag).await {
      Ok(report) => {
        if report.replayed > 0 {
          info!(
            "Replayed {} changes ({} still pending)",
            report.replayed, report.remaining
          );
        }
        if report.failed == 0 {
          backoff.reset();
          poll
        } else {
          let delay = backoff.next_delay();
          warn!(
            "{} changes failed to replay, retrying in {:?}",
            report.failed, delay
          );
          delay
        }
      }
      Err(e) => {
        let delay = backoff.next_delay();
        warn!("Drain pass failed: {}, retrying in {:?}", e, delay);
        delay
      }
    };

    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        info!("Shutting down watcher");
        return Ok(());
      }
      _ = sleep(wait) => {}
    }
  }
}

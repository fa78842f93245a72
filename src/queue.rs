//! Offline write queue.
//!
//! Reviews submitted while the network is unavailable are appended to a
//! persisted sequence and replayed, in insertion order, once connectivity
//! returns. The queue reacts to connectivity-change signals, never polls.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::cache::{CacheError, KeyValueStore};
use crate::remote::WriteSubmitter;

/// Record key holding the pending-writes sequence.
pub const QUEUE_KEY: &str = "offline";

/// A review buffered while offline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWrite {
  pub restaurant_id: u64,
  pub name: String,
  pub rating: u8,
  pub comments: String,
}

/// Network connectivity as reported by the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Online,
  Offline,
}

/// What happens to entries that fail during a replay pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
  /// Keep failed entries for the next online transition
  #[default]
  RetainFailed,
  /// Clear the whole queue after a pass, whatever the outcomes
  ClearAll,
}

/// Result of a write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
  /// Delivered to the data server
  Sent,
  /// Stored locally for later delivery
  Queued,
}

/// Summary of one replay pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
  pub attempted: usize,
  pub succeeded: usize,
  /// Entries left in the queue after the pass
  pub retained: usize,
}

impl ReplayReport {
  pub fn failed(&self) -> usize {
    self.attempted - self.succeeded
  }

  /// Turn a pass with failures into `CacheError::ReplayPartialFailure`.
  pub fn into_result(self) -> Result<Self, CacheError> {
    if self.failed() > 0 {
      Err(CacheError::ReplayPartialFailure {
        failed: self.failed(),
        attempted: self.attempted,
      })
    } else {
      Ok(self)
    }
  }
}

/// Buffers writes while offline and replays them on reconnect.
pub struct OfflineQueue<S: KeyValueStore, W: WriteSubmitter> {
  storage: Arc<S>,
  submitter: Arc<W>,
  policy: ReplayPolicy,
  connectivity: Mutex<Connectivity>,
}

impl<S: KeyValueStore, W: WriteSubmitter> OfflineQueue<S, W> {
  pub fn new(storage: Arc<S>, submitter: Arc<W>, initial: Connectivity) -> Self {
    Self {
      storage,
      submitter,
      policy: ReplayPolicy::default(),
      connectivity: Mutex::new(initial),
    }
  }

  pub fn with_policy(mut self, policy: ReplayPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn connectivity(&self) -> Connectivity {
    self
      .connectivity
      .lock()
      .map(|c| *c)
      .unwrap_or(Connectivity::Offline)
  }

  /// Create the empty pending-writes record if none exists yet.
  pub async fn init(&self) -> Result<(), CacheError> {
    let existing: Option<Vec<PendingWrite>> = self.storage.get(QUEUE_KEY).await?;
    if existing.is_none() {
      info!("creating empty offline queue");
      self.storage.set(QUEUE_KEY, &Vec::<PendingWrite>::new()).await?;
    }
    Ok(())
  }

  /// Initialise the record, then replay if the environment is already online.
  pub async fn start(&self) -> Result<Option<ReplayReport>, CacheError> {
    self.init().await?;
    if self.connectivity() == Connectivity::Online {
      return self.replay().await.map(Some);
    }
    Ok(None)
  }

  /// The persisted pending writes. Absent and empty are the same.
  pub async fn pending(&self) -> Result<Vec<PendingWrite>, CacheError> {
    Ok(self.storage.get(QUEUE_KEY).await?.unwrap_or_default())
  }

  /// Submit a write directly when online, or buffer it when offline.
  pub async fn submit(&self, write: PendingWrite) -> Result<SubmitOutcome, CacheError> {
    if self.connectivity() == Connectivity::Online {
      self.submitter.submit(&write).await.inspect_err(|e| {
        error!(restaurant_id = write.restaurant_id, error = %e, "error creating review");
      })?;
      return Ok(SubmitOutcome::Sent);
    }

    self.enqueue(write).await?;
    Ok(SubmitOutcome::Queued)
  }

  async fn enqueue(&self, write: PendingWrite) -> Result<(), CacheError> {
    // Read-modify-write of the whole sequence; concurrent appends may race
    let mut pending = self.pending().await?;
    let restaurant_id = write.restaurant_id;
    pending.push(write);

    if let Err(e) = self.storage.set(QUEUE_KEY, &pending).await {
      error!(restaurant_id, error = %e, "failed to persist offline review, it is lost");
      return Err(e);
    }

    info!(restaurant_id, queued = pending.len(), "review saved for delivery when back online");
    Ok(())
  }

  /// Record a connectivity change, replaying the queue on a transition to
  /// online.
  pub async fn set_connectivity(
    &self,
    next: Connectivity,
  ) -> Result<Option<ReplayReport>, CacheError> {
    let previous = match self.connectivity.lock() {
      Ok(mut current) => std::mem::replace(&mut *current, next),
      Err(e) => return Err(CacheError::Storage(format!("Lock poisoned: {}", e))),
    };

    if previous == next {
      return Ok(None);
    }

    info!(?previous, ?next, "connectivity changed");
    if next == Connectivity::Online {
      return self.replay().await.map(Some);
    }
    Ok(None)
  }

  /// Re-submit every pending write in insertion order.
  ///
  /// Each entry is independent: a failure is logged and the pass continues.
  /// Afterwards the record holds whatever the replay policy keeps.
  pub async fn replay(&self) -> Result<ReplayReport, CacheError> {
    let pending = self.pending().await?;
    if pending.is_empty() {
      return Ok(ReplayReport::default());
    }

    info!(count = pending.len(), "replaying offline reviews");
    let attempted = pending.len();
    let mut failed = Vec::new();

    for write in pending {
      if let Err(e) = self.submitter.submit(&write).await {
        warn!(restaurant_id = write.restaurant_id, error = %e, "failed to replay review");
        failed.push(write);
      }
    }

    let remaining = match self.policy {
      ReplayPolicy::RetainFailed => failed.clone(),
      ReplayPolicy::ClearAll => Vec::new(),
    };
    if let Err(e) = self.storage.set(QUEUE_KEY, &remaining).await {
      error!(error = %e, "failed to update offline queue after replay");
      return Err(e);
    }

    let report = ReplayReport {
      attempted,
      succeeded: attempted - failed.len(),
      retained: remaining.len(),
    };
    info!(
      attempted = report.attempted,
      succeeded = report.succeeded,
      retained = report.retained,
      "replay finished"
    );
    Ok(report)
  }
}

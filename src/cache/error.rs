//! Error kinds shared by the cache, interceptor and queue.

use thiserror::Error;

/// Tagged failure outcome for every cache-layer operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
  /// Neither the network nor the local store had data for the request.
  #[error("no data available")]
  Absent,

  /// The storage layer failed (I/O, quota, corrupt record).
  #[error("storage error: {0}")]
  Storage(String),

  /// The network request failed or was rejected.
  #[error("network error: {0}")]
  Network(String),

  /// Some buffered writes could not be replayed.
  #[error("{failed} of {attempted} pending writes failed to replay")]
  ReplayPartialFailure { failed: usize, attempted: usize },

  /// A configured URL or origin could not be parsed.
  #[error("invalid configuration: {0}")]
  Config(String),
}

impl CacheError {
  pub fn storage(e: impl std::fmt::Display) -> Self {
    Self::Storage(e.to_string())
  }

  pub fn network(e: impl std::fmt::Display) -> Self {
    Self::Network(e.to_string())
  }
}

impl From<rusqlite::Error> for CacheError {
  fn from(e: rusqlite::Error) -> Self {
    Self::storage(e)
  }
}

impl From<serde_json::Error> for CacheError {
  fn from(e: serde_json::Error) -> Self {
    Self::Storage(format!("failed to (de)serialize record: {}", e))
  }
}

impl From<reqwest::Error> for CacheError {
  fn from(e: reqwest::Error) -> Self {
    Self::network(e)
  }
}

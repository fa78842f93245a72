//! Core traits for the persistent stores.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use super::error::CacheError;
use crate::remote::Response;

/// Generic async key -> value store.
///
/// Used both for read-through caching of remote JSON resources and for the
/// offline write queue. `Ok(None)` means the key is absent, which is distinct
/// from a storage-layer `Err`. Concurrent `set` calls on the same key are not
/// ordered; callers needing read-modify-write ordering serialize externally.
#[allow(async_fn_in_trait)]
pub trait KeyValueStore {
  /// Read the value stored under `key`.
  async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError>;

  /// Overwrite the value stored under `key`.
  async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError>;

  /// When the value under `key` was last written.
  async fn stored_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, CacheError>;
}

/// Storage for named cache generations holding URL -> response entries.
#[allow(async_fn_in_trait)]
pub trait GenerationStore {
  /// Names of every generation currently stored.
  async fn generations(&self) -> Result<Vec<String>, CacheError>;

  /// Create the generation if it does not exist yet.
  async fn open(&self, name: &str) -> Result<(), CacheError>;

  /// Create the generation and store all entries in a single transaction.
  /// Either every entry is committed or none is.
  async fn commit(&self, name: &str, entries: &[(String, Response)]) -> Result<(), CacheError>;

  /// Delete a generation and all its entries. Returns whether it existed.
  async fn delete(&self, name: &str) -> Result<bool, CacheError>;

  /// Look up a stored response by full URL.
  async fn lookup(&self, name: &str, url: &str) -> Result<Option<Response>, CacheError>;

  /// Store (or overwrite) one response in an opened generation.
  async fn put(&self, name: &str, url: &str, response: &Response) -> Result<(), CacheError>;

  /// URLs stored in a generation, sorted.
  async fn urls(&self, name: &str) -> Result<Vec<String>, CacheError>;
}

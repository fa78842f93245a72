//! SQLite implementation of the key-value and generation stores.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::error::CacheError;
use super::traits::{GenerationStore, KeyValueStore};
use crate::remote::Response;

/// SQLite-based storage shared by the generation cache and the record store.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at the default location.
  pub fn open() -> Result<Self, CacheError> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the storage at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self, CacheError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| CacheError::Storage(format!("Failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      CacheError::Storage(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    debug!(path = %path.display(), "opened cache database");
    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self, CacheError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, CacheError> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, CacheError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| CacheError::storage("Could not determine data directory"))?;

    Ok(data_dir.join("restocache").join("cache.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
    self
      .conn
      .lock()
      .map_err(|e| CacheError::Storage(format!("Lock poisoned: {}", e)))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<(), CacheError> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| CacheError::Storage(format!("Failed to run cache migrations: {}", e)))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Persisted records (resource JSON, offline queue)
CREATE TABLE IF NOT EXISTS records (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Installable cache generations
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Responses stored inside a generation, keyed by full URL
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    digest TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, url),
    FOREIGN KEY (generation) REFERENCES cache_generations(name) ON DELETE CASCADE
);
"#;

impl KeyValueStore for SqliteStorage {
  async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
    let data: Option<Vec<u8>> = self
      .conn()?
      .query_row(
        "SELECT value FROM records WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;

    match data {
      Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
    let data = serde_json::to_vec(value)?;

    self.conn()?.execute(
      "INSERT OR REPLACE INTO records (key, value, stored_at) VALUES (?, ?, datetime('now'))",
      params![key, data],
    )?;

    Ok(())
  }

  async fn stored_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, CacheError> {
    let stored_at: Option<String> = self
      .conn()?
      .query_row(
        "SELECT stored_at FROM records WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;

    stored_at.as_deref().map(parse_datetime).transpose()
  }
}

impl GenerationStore for SqliteStorage {
  async fn generations(&self) -> Result<Vec<String>, CacheError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare("SELECT name FROM cache_generations ORDER BY name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
  }

  async fn open(&self, name: &str) -> Result<(), CacheError> {
    self.conn()?.execute(
      "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
      params![name],
    )?;
    Ok(())
  }

  async fn commit(&self, name: &str, entries: &[(String, Response)]) -> Result<(), CacheError> {
    let mut conn = self.conn()?;

    // Dropping the transaction without commit rolls everything back
    let tx = conn.transaction()?;
    tx.execute(
      "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
      params![name],
    )?;
    // A reinstall replaces the generation's contents wholesale
    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![name],
    )?;
    for (url, response) in entries {
      insert_entry(&tx, name, url, response)?;
    }
    tx.commit()?;

    debug!(generation = name, entries = entries.len(), "committed generation");
    Ok(())
  }

  async fn delete(&self, name: &str) -> Result<bool, CacheError> {
    let removed = self
      .conn()?
      .execute("DELETE FROM cache_generations WHERE name = ?", params![name])?;
    Ok(removed > 0)
  }

  async fn lookup(&self, name: &str, url: &str) -> Result<Option<Response>, CacheError> {
    let response = self
      .conn()?
      .query_row(
        "SELECT status, content_type, body FROM cache_entries
         WHERE generation = ? AND url = ?",
        params![name, url],
        |row| {
          Ok(Response {
            url: url.to_string(),
            status: row.get(0)?,
            content_type: row.get(1)?,
            body: row.get(2)?,
          })
        },
      )
      .optional()?;

    Ok(response)
  }

  async fn put(&self, name: &str, url: &str, response: &Response) -> Result<(), CacheError> {
    let conn = self.conn()?;
    insert_entry(&conn, name, url, response)
  }

  async fn urls(&self, name: &str) -> Result<Vec<String>, CacheError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare("SELECT url FROM cache_entries WHERE generation = ? ORDER BY url")?;
    let urls = stmt
      .query_map(params![name], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(urls)
  }
}

fn insert_entry(
  conn: &Connection,
  generation: &str,
  url: &str,
  response: &Response,
) -> Result<(), CacheError> {
  conn.execute(
    "INSERT OR REPLACE INTO cache_entries (generation, url, status, content_type, body, digest, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
    params![
      generation,
      url,
      response.status,
      response.content_type,
      response.body,
      response.digest()
    ],
  )?;
  Ok(())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| CacheError::Storage(format!("Failed to parse datetime '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn response(url: &str, body: &str) -> Response {
    Response::new(url, 200, body)
  }

  #[tokio::test]
  async fn test_get_missing_key_is_absent_not_error() {
    let storage = SqliteStorage::open_in_memory().unwrap();

    let value: Option<Vec<String>> = storage.get("offline").await.unwrap();

    assert!(value.is_none());
    assert!(storage.stored_at("offline").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_set_overwrites_whole_value() {
    let storage = SqliteStorage::open_in_memory().unwrap();

    storage.set("k", &vec![1, 2, 3]).await.unwrap();
    storage.set("k", &vec![4]).await.unwrap();

    let value: Option<Vec<i32>> = storage.get("k").await.unwrap();
    assert_eq!(value, Some(vec![4]));
    assert!(storage.stored_at("k").await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_get_with_wrong_shape_is_storage_error() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.set("k", &"text").await.unwrap();

    let result: Result<Option<Vec<i32>>, _> = storage.get("k").await;

    assert!(matches!(result, Err(CacheError::Storage(_))));
  }

  #[tokio::test]
  async fn test_delete_generation_removes_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let entries = vec![("http://a/1".to_string(), response("http://a/1", "one"))];
    storage.commit("app-01", &entries).await.unwrap();

    assert!(storage.delete("app-01").await.unwrap());
    assert!(!storage.delete("app-01").await.unwrap());

    assert!(storage.generations().await.unwrap().is_empty());
    assert!(storage.lookup("app-01", "http://a/1").await.unwrap().is_none());
    assert!(storage.urls("app-01").await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_recommit_replaces_previous_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let first = vec![
      ("http://a/1".to_string(), response("http://a/1", "one")),
      ("http://a/2".to_string(), response("http://a/2", "two")),
    ];
    let second = vec![("http://a/1".to_string(), response("http://a/1", "uno"))];

    storage.commit("app-01", &first).await.unwrap();
    storage.open("app-01").await.unwrap();
    storage
      .put("app-01", "http://a/3", &response("http://a/3", "lazy"))
      .await
      .unwrap();
    storage.commit("app-01", &second).await.unwrap();

    assert_eq!(storage.urls("app-01").await.unwrap(), vec!["http://a/1".to_string()]);
    let hit = storage.lookup("app-01", "http://a/1").await.unwrap();
    assert_eq!(hit.map(|r| r.body), Some(b"uno".to_vec()));
  }

  #[tokio::test]
  async fn test_lookup_distinguishes_query_strings() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("app-01").await.unwrap();
    storage
      .put("app-01", "http://a/list", &response("http://a/list", "all"))
      .await
      .unwrap();

    let hit = storage.lookup("app-01", "http://a/list").await.unwrap();
    let miss = storage.lookup("app-01", "http://a/list?fav=true").await.unwrap();

    assert_eq!(hit.map(|r| r.body), Some(b"all".to_vec()));
    assert!(miss.is_none());
  }

  #[tokio::test]
  async fn test_put_requires_open_generation() {
    let storage = SqliteStorage::open_in_memory().unwrap();

    let result = storage
      .put("app-01", "http://a/x", &response("http://a/x", "x"))
      .await;

    assert!(matches!(result, Err(CacheError::Storage(_))));
  }

  #[tokio::test]
  async fn test_lookup_is_scoped_to_generation() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("app-01").await.unwrap();
    storage
      .put("app-01", "http://a/x", &response("http://a/x", "old"))
      .await
      .unwrap();

    assert!(storage.lookup("app-02", "http://a/x").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_records_survive_reopen() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open_at(&path).unwrap();
      storage.set("offline", &vec!["a", "b"]).await.unwrap();
    }

    let storage = SqliteStorage::open_at(&path).unwrap();
    let value: Option<Vec<String>> = storage.get("offline").await.unwrap();
    assert_eq!(value, Some(vec!["a".to_string(), "b".to_string()]));
  }
}

//! Versioned cache generations: install, activate, garbage-collect.

use futures::future::try_join_all;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use url::Url;

use super::error::CacheError;
use super::traits::GenerationStore;
use crate::remote::{Fetcher, Method, Request, Response};

/// Identity of one cache generation: `<namespace>-<version>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheName {
  namespace: String,
  version: String,
}

impl CacheName {
  pub fn new(namespace: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      namespace: namespace.into(),
      version: version.into(),
    }
  }

  fn prefix(&self) -> String {
    format!("{}-", self.namespace)
  }

  /// Whether `other` belongs to the same namespace but a different version.
  pub fn is_stale_sibling(&self, other: &str) -> bool {
    other.starts_with(&self.prefix()) && other != self.to_string()
  }
}

impl fmt::Display for CacheName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}", self.prefix(), self.version)
  }
}

/// Where the generation is in its install/activate lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
  #[default]
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  /// Install failed; this generation must not be activated
  Redundant,
}

/// Owns the current generation and garbage-collects older ones.
pub struct GenerationManager<S: GenerationStore> {
  storage: Arc<S>,
  name: CacheName,
  manifest: Vec<Url>,
  state: Mutex<LifecycleState>,
}

impl<S: GenerationStore> GenerationManager<S> {
  pub fn new(storage: Arc<S>, name: CacheName, manifest: Vec<Url>) -> Self {
    Self {
      storage,
      name,
      manifest,
      state: Mutex::new(LifecycleState::Parsed),
    }
  }

  pub fn name(&self) -> &CacheName {
    &self.name
  }

  pub fn state(&self) -> LifecycleState {
    self.state.lock().map(|s| *s).unwrap_or(LifecycleState::Redundant)
  }

  fn set_state(&self, state: LifecycleState) {
    if let Ok(mut current) = self.state.lock() {
      *current = state;
    }
  }

  /// Whether activation completed and the generation may serve requests.
  pub fn is_ready(&self) -> bool {
    self.state() == LifecycleState::Activated
  }

  /// Fetch the whole manifest and store it as the current generation.
  ///
  /// Every response must succeed with a 2xx status. Entries are committed in
  /// one transaction, so a failed install leaves no partial generation behind.
  pub async fn install<F: Fetcher>(&self, fetcher: &F) -> Result<usize, CacheError> {
    self.set_state(LifecycleState::Installing);
    info!(generation = %self.name, resources = self.manifest.len(), "installing cache generation");

    let result = self.populate(fetcher).await;
    match result {
      Ok(count) => {
        self.set_state(LifecycleState::Installed);
        info!(generation = %self.name, count, "cache generation installed");
        Ok(count)
      }
      Err(e) => {
        self.set_state(LifecycleState::Redundant);
        error!(generation = %self.name, error = %e, "cache install failed");
        Err(e)
      }
    }
  }

  async fn populate<F: Fetcher>(&self, fetcher: &F) -> Result<usize, CacheError> {
    let entries: Vec<(String, Response)> =
      try_join_all(self.manifest.iter().map(|url| async move {
        let request = Request::new(Method::Get, url.clone());
        let response = fetcher.fetch(&request).await?;
        if !response.ok() {
          return Err(CacheError::Network(format!(
            "{} returned status {}",
            url, response.status
          )));
        }
        Ok::<_, CacheError>((url.to_string(), response))
      }))
      .await?;

    let name = self.name.to_string();
    self.storage.commit(&name, &entries).await?;
    Ok(entries.len())
  }

  /// Delete every stale generation in the namespace and mark this one ready.
  ///
  /// Returns the names of the deleted generations.
  pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
    if self.state() == LifecycleState::Redundant {
      return Err(CacheError::Storage(format!(
        "generation {} failed to install and cannot be activated",
        self.name
      )));
    }

    self.set_state(LifecycleState::Activating);
    match self.collect_stale().await {
      Ok(deleted) => {
        self.set_state(LifecycleState::Activated);
        info!(generation = %self.name, deleted = deleted.len(), "cache generation activated");
        Ok(deleted)
      }
      Err(e) => {
        error!(generation = %self.name, error = %e, "cache activation failed");
        Err(e)
      }
    }
  }

  async fn collect_stale(&self) -> Result<Vec<String>, CacheError> {
    let current = self.name.to_string();
    let existing = self.storage.generations().await?;

    if !existing.contains(&current) {
      return Err(CacheError::Storage(format!(
        "generation {} is not installed",
        current
      )));
    }

    let mut deleted = Vec::new();
    for name in existing.into_iter().filter(|n| self.name.is_stale_sibling(n)) {
      if self.storage.delete(&name).await? {
        info!(generation = %name, "deleted stale cache generation");
        deleted.push(name);
      }
    }
    Ok(deleted)
  }

  /// Activate a generation installed by an earlier process, if present.
  pub async fn resume(&self) -> Result<bool, CacheError> {
    let current = self.name.to_string();
    if !self.storage.generations().await?.contains(&current) {
      return Ok(false);
    }
    self.activate().await?;
    Ok(true)
  }

  /// Install, then activate. An install failure prevents activation.
  pub async fn run_lifecycle<F: Fetcher>(&self, fetcher: &F) -> Result<Vec<String>, CacheError> {
    self.install(fetcher).await?;
    self.activate().await
  }

  /// Look up a response in the active generation.
  pub async fn lookup(&self, url: &str) -> Result<Option<Response>, CacheError> {
    self.storage.lookup(&self.name.to_string(), url).await
  }

  /// Write a response into the active generation, replacing any previous copy.
  pub async fn backfill(&self, url: &str, response: &Response) -> Result<(), CacheError> {
    let name = self.name.to_string();
    if let Err(e) = self.storage.open(&name).await {
      warn!(generation = %name, error = %e, "could not open cache generation");
      return Err(e);
    }
    self.storage.put(&name, url, response).await
  }

  /// URLs stored in the current generation.
  pub async fn entries(&self) -> Result<Vec<String>, CacheError> {
    self.storage.urls(&self.name.to_string()).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::testing::FakeNetwork;

  const INDEX: &str = "http://localhost:8000/index.html";
  const STYLES: &str = "http://localhost:8000/css/styles.css";

  fn manifest() -> Vec<Url> {
    vec![Url::parse(INDEX).unwrap(), Url::parse(STYLES).unwrap()]
  }

  fn network() -> FakeNetwork {
    FakeNetwork::new()
      .route(INDEX, 200, "<html></html>")
      .route(STYLES, 200, "body {}")
  }

  fn manager(storage: &Arc<SqliteStorage>, version: &str) -> GenerationManager<SqliteStorage> {
    GenerationManager::new(
      Arc::clone(storage),
      CacheName::new("mwa-stage3", version),
      manifest(),
    )
  }

  #[test]
  fn test_cache_name_format_and_siblings() {
    let name = CacheName::new("mwa-stage3", "02");

    assert_eq!(name.to_string(), "mwa-stage3-02");
    assert!(name.is_stale_sibling("mwa-stage3-01"));
    assert!(!name.is_stale_sibling("mwa-stage3-02"));
    assert!(!name.is_stale_sibling("other-app-01"));
    assert!(!name.is_stale_sibling("mwa-stage3"));
  }

  #[tokio::test]
  async fn test_install_stores_manifest() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let manager = manager(&storage, "01");

    let count = manager.install(&network()).await.unwrap();

    assert_eq!(count, 2);
    assert_eq!(manager.state(), LifecycleState::Installed);
    assert_eq!(manager.entries().await.unwrap(), vec![STYLES.to_string(), INDEX.to_string()]);
  }

  #[tokio::test]
  async fn test_failed_install_leaves_no_generation() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let manager = manager(&storage, "01");
    let network = FakeNetwork::new().route(INDEX, 200, "<html></html>");

    let result = manager.install(&network).await;

    assert!(matches!(result, Err(CacheError::Network(_))));
    assert_eq!(manager.state(), LifecycleState::Redundant);
    assert!(storage.generations().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failed_install_blocks_activation() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let manager = manager(&storage, "01");
    let network = network();
    network.set_down(true);

    assert!(manager.run_lifecycle(&network).await.is_err());
    assert!(manager.activate().await.is_err());
    assert!(!manager.is_ready());
  }

  #[tokio::test]
  async fn test_activate_requires_installed_generation() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let manager = manager(&storage, "01");

    assert!(manager.activate().await.is_err());
    assert!(!manager.is_ready());
  }

  #[tokio::test]
  async fn test_activate_leaves_single_generation() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = network();

    for version in ["01", "02", "03"] {
      manager(&storage, version).install(&network).await.unwrap();
    }
    storage.open("unrelated-01").await.unwrap();

    let current = manager(&storage, "02");
    let deleted = current.activate().await.unwrap();

    assert_eq!(deleted, vec!["mwa-stage3-01".to_string(), "mwa-stage3-03".to_string()]);
    assert!(current.is_ready());
    assert_eq!(
      storage.generations().await.unwrap(),
      vec!["mwa-stage3-02".to_string(), "unrelated-01".to_string()]
    );
  }

  #[tokio::test]
  async fn test_resume_activates_previous_install() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    manager(&storage, "01").install(&network()).await.unwrap();

    let fresh = manager(&storage, "02");
    assert!(!fresh.resume().await.unwrap());
    assert!(!fresh.is_ready());

    let restarted = manager(&storage, "01");
    assert!(restarted.resume().await.unwrap());
    assert!(restarted.is_ready());
  }

  #[tokio::test]
  async fn test_repeated_lifecycles_keep_one_generation() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = network();

    for version in ["01", "02", "02", "03"] {
      manager(&storage, version).run_lifecycle(&network).await.unwrap();
      let generations = storage.generations().await.unwrap();
      assert_eq!(generations, vec![format!("mwa-stage3-{}", version)]);
    }
  }
}

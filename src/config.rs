use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::CacheName;
use crate::queue::ReplayPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub data: DataConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  /// SQLite database path (defaults to $XDG_DATA_HOME/restocache/cache.db)
  pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Application identifier shared by every cache generation
  #[serde(default = "default_namespace")]
  pub namespace: String,
  /// Bump whenever the manifest changes
  #[serde(default = "default_version")]
  pub version: String,
  /// Origin the relative manifest entries are served from
  #[serde(default = "default_base_url")]
  pub base_url: String,
  /// Resources fetched and stored at install time
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  /// Origins never cached (live data server, map tiles)
  #[serde(default = "default_bypass")]
  pub bypass_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
  /// Root URL of the restaurant data server
  #[serde(default = "default_data_url")]
  pub url: String,
  /// Request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueConfig {
  #[serde(default)]
  pub replay_policy: ReplayPolicy,
}

fn default_namespace() -> String {
  "mwa-stage3".to_string()
}

fn default_version() -> String {
  "01".to_string()
}

fn default_base_url() -> String {
  "http://localhost:8000/".to_string()
}

fn default_data_url() -> String {
  "http://localhost:1337/".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_bypass() -> Vec<String> {
  vec![
    "https://api.tiles.mapbox.com".to_string(),
    "http://localhost:1337".to_string(),
  ]
}

fn default_manifest() -> Vec<String> {
  let mut manifest: Vec<String> = [
    "/",
    "/index.html",
    "/manifest.json",
    "/restaurant.html",
    "/js/dbhelper.js",
    "/js/main.js",
    "/js/restaurant_info.js",
    "/js/swreg.js",
    "/js/idb-keyval-iife.min.js",
    "/css/styles.css",
    "/css/responsive.css",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect();

  manifest.extend((1..=10).map(|i| format!("/img/{}.jpg", i)));
  manifest.push("/img/icon-512x512.png".to_string());
  manifest.extend(
    [
      "https://unpkg.com/leaflet@1.3.1/dist/leaflet.css",
      "https://unpkg.com/leaflet@1.3.1/dist/leaflet.js",
      "https://unpkg.com/leaflet@1.3.1/dist/images/marker-icon.png",
      "https://unpkg.com/leaflet@1.3.1/dist/images/marker-shadow.png",
    ]
    .iter()
    .map(|s| s.to_string()),
  );
  manifest
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      namespace: default_namespace(),
      version: default_version(),
      base_url: default_base_url(),
      manifest: default_manifest(),
      bypass_origins: default_bypass(),
    }
  }
}

impl Default for DataConfig {
  fn default() -> Self {
    Self {
      url: default_data_url(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./restocache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/restocache/config.yaml
  ///
  /// Built-in defaults are used when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => {
        tracing::debug!("no config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("restocache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("restocache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  pub fn cache_name(&self) -> CacheName {
    CacheName::new(&self.cache.namespace, &self.cache.version)
  }

  /// Manifest entries resolved against the base URL.
  pub fn manifest_urls(&self) -> Result<Vec<Url>> {
    let base = Url::parse(&self.cache.base_url)
      .map_err(|e| eyre!("Invalid base_url {}: {}", self.cache.base_url, e))?;

    self
      .cache
      .manifest
      .iter()
      .map(|entry| {
        base
          .join(entry)
          .map_err(|e| eyre!("Invalid manifest entry {}: {}", entry, e))
      })
      .collect()
  }

  pub fn data_url(&self) -> Result<Url> {
    Url::parse(&self.data.url).map_err(|e| eyre!("Invalid data url {}: {}", self.data.url, e))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.data.timeout_secs)
  }
}

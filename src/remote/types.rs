use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::cache::CacheError;

/// HTTP method of an intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
  #[default]
  Get,
  Post,
  Put,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
    }
  }
}

impl From<Method> for reqwest::Method {
  fn from(m: Method) -> Self {
    match m {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
    }
  }
}

/// An outbound request seen by the interceptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  /// JSON body for create/update calls
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      body: None,
    }
  }

  /// Build a GET request from a URL string.
  pub fn get(url: &str) -> Result<Self, CacheError> {
    let url = Url::parse(url).map_err(|e| CacheError::Config(format!("{}: {}", url, e)))?;
    Ok(Self::new(Method::Get, url))
  }

  pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self, CacheError> {
    self.body = Some(serde_json::to_vec(body)?);
    Ok(self)
  }

  /// Full URL, query string included. This is the cache key.
  pub fn cache_key(&self) -> &str {
    self.url.as_str()
  }
}

/// A network or cached response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub url: String,
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      url: url.into(),
      status,
      content_type: None,
      body: body.into(),
    }
  }

  /// Whether the status is in the 2xx range
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Hex-encoded SHA-256 of the body.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(&self.body);
    hex::encode(hasher.finalize())
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T, CacheError> {
    serde_json::from_slice(&self.body)
      .map_err(|e| CacheError::Network(format!("invalid JSON from {}: {}", self.url, e)))
  }
}

/// Geographic position of a restaurant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
  pub lat: f64,
  pub lng: f64,
}

/// Restaurant record served by the data server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub neighborhood: String,
  #[serde(default)]
  pub cuisine_type: String,
  #[serde(default)]
  pub address: Option<String>,
  #[serde(default)]
  pub photograph: Option<String>,
  #[serde(default)]
  pub latlng: Option<LatLng>,
  /// The server sends either a bool or the string "true"/"false"
  #[serde(default, deserialize_with = "deserialize_loose_bool")]
  pub is_favorite: bool,
}

/// Review record served by the data server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
  #[serde(default)]
  pub id: Option<u64>,
  pub restaurant_id: u64,
  pub name: String,
  pub rating: u8,
  #[serde(default)]
  pub comments: String,
  #[serde(default, rename = "createdAt")]
  pub created_at: Option<i64>,
}

fn deserialize_loose_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
  D: serde::Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Loose {
    Bool(bool),
    Text(String),
  }

  Ok(match Loose::deserialize(deserializer)? {
    Loose::Bool(b) => b,
    Loose::Text(s) => s.eq_ignore_ascii_case("true"),
  })
}

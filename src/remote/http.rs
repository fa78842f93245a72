use std::time::Duration;

use super::types::{Request, Response};
use super::Fetcher;
use crate::cache::CacheError;

/// `Fetcher` backed by a reqwest client
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self, CacheError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("restocache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| CacheError::Config(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self { client })
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
    let mut builder = self
      .client
      .request(request.method.into(), request.url.clone());
    if let Some(body) = &request.body {
      builder = builder
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body.clone());
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let url = response.url().to_string();
    let body = response.bytes().await?;

    let mut response = Response::new(url, status, body.to_vec());
    response.content_type = content_type;
    Ok(response)
  }
}

//! Per-request cache policy: origin bypass, then cache-first with backfill.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheError, GenerationManager, GenerationStore};
use crate::remote::{Fetcher, Method, Request, Response};

/// How an intercepted request was served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  /// Origin is in the bypass set; straight to network, never stored
  Bypassed,
  /// Served from the active generation without a network call
  CacheHit,
  /// Fetched on a miss and written back into the active generation
  Backfilled,
  /// Fetched from the network and not stored
  Network,
}

/// A response together with how it was produced.
#[derive(Debug, Clone)]
pub struct Intercepted {
  pub response: Response,
  pub outcome: Outcome,
}

/// Set of origins that are never cached.
#[derive(Debug, Clone, Default)]
pub struct BypassSet {
  origins: HashSet<String>,
}

impl BypassSet {
  /// Build from origin strings such as `http://localhost:1337`.
  pub fn new<I, T>(origins: I) -> Result<Self, CacheError>
  where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
  {
    let origins = origins
      .into_iter()
      .map(|o| {
        let o = o.as_ref();
        Url::parse(o)
          .map(|url| url.origin().ascii_serialization())
          .map_err(|e| CacheError::Config(format!("bypass origin {}: {}", o, e)))
      })
      .collect::<Result<_, _>>()?;

    Ok(Self { origins })
  }

  pub fn matches(&self, url: &Url) -> bool {
    self.origins.contains(&url.origin().ascii_serialization())
  }
}

/// Decides, per outbound request, whether to bypass, serve from cache, or
/// fetch and backfill.
pub struct RequestInterceptor<S: GenerationStore, F: Fetcher> {
  generations: Arc<GenerationManager<S>>,
  fetcher: Arc<F>,
  bypass: BypassSet,
}

impl<S: GenerationStore, F: Fetcher> RequestInterceptor<S, F> {
  pub fn new(generations: Arc<GenerationManager<S>>, fetcher: Arc<F>, bypass: BypassSet) -> Self {
    Self {
      generations,
      fetcher,
      bypass,
    }
  }

  /// Serve one request.
  ///
  /// Network failures are returned as `CacheError::Network`; a stale copy is
  /// never substituted here. Cache-storage failures are logged and the request
  /// degrades to a plain network fetch.
  pub async fn handle(&self, request: &Request) -> Result<Intercepted, CacheError> {
    if self.bypass.matches(&request.url) {
      debug!(url = %request.url, "bypassing cache for origin");
      return self.pass_through(request, Outcome::Bypassed).await;
    }

    // Only GET responses are cacheable; nothing is served before activation
    if request.method != Method::Get || !self.generations.is_ready() {
      return self.pass_through(request, Outcome::Network).await;
    }

    let key = request.cache_key();
    match self.generations.lookup(key).await {
      Ok(Some(response)) => {
        debug!(url = key, "cache hit");
        return Ok(Intercepted {
          response,
          outcome: Outcome::CacheHit,
        });
      }
      Ok(None) => debug!(url = key, "cache miss"),
      Err(e) => {
        warn!(url = key, error = %e, "cache match failed, falling back to network");
        return self.pass_through(request, Outcome::Network).await;
      }
    }

    let response = self.fetch(request).await?;
    if !response.ok() {
      return Ok(Intercepted {
        response,
        outcome: Outcome::Network,
      });
    }

    let outcome = match self.generations.backfill(key, &response).await {
      Ok(()) => Outcome::Backfilled,
      Err(e) => {
        warn!(url = key, error = %e, "item not cached, serving network response");
        Outcome::Network
      }
    };

    Ok(Intercepted { response, outcome })
  }

  async fn pass_through(
    &self,
    request: &Request,
    outcome: Outcome,
  ) -> Result<Intercepted, CacheError> {
    let response = self.fetch(request).await?;
    Ok(Intercepted { response, outcome })
  }

  async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
    self.fetcher.fetch(request).await.inspect_err(|e| {
      warn!(method = request.method.as_str(), url = %request.url, error = %e, "network request failed");
    })
  }
}

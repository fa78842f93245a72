//! Network collaborators wrapped by the cache layer.

mod client;
mod http;
mod types;

pub use client::RestaurantApi;
pub use http::HttpFetcher;
pub use types::{Method, Request, Response};

use crate::cache::CacheError;
use crate::queue::PendingWrite;

/// Performs a network round trip for an intercepted request.
#[allow(async_fn_in_trait)]
pub trait Fetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, CacheError>;
}

/// Delivers one user write to the data server.
#[allow(async_fn_in_trait)]
pub trait WriteSubmitter {
  async fn submit(&self, write: &PendingWrite) -> Result<(), CacheError>;
}

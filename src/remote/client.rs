//! Data-server client with read-through caching of JSON resources.

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use super::types::{Method, Request, Restaurant, Review};
use super::{Fetcher, WriteSubmitter};
use crate::cache::{CacheError, KeyValueStore};
use crate::queue::PendingWrite;

/// Matches every cuisine or neighborhood in filters
pub const ALL: &str = "all";

/// Client for the restaurant data server.
///
/// Reads are network-first: a fresh response is written back to the store
/// under its full URL, and on network failure the stored copy is served.
/// When neither is available the call fails with `CacheError::Absent`.
pub struct RestaurantApi<S: KeyValueStore, F: Fetcher> {
  base: Url,
  storage: Arc<S>,
  fetcher: Arc<F>,
}

impl<S: KeyValueStore, F: Fetcher> RestaurantApi<S, F> {
  pub fn new(base: Url, storage: Arc<S>, fetcher: Arc<F>) -> Self {
    Self {
      base,
      storage,
      fetcher,
    }
  }

  fn endpoint(&self, path: &str) -> Result<Url, CacheError> {
    self
      .base
      .join(path)
      .map_err(|e| CacheError::Config(format!("{}{}: {}", self.base, path, e)))
  }

  async fn fetch_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, CacheError> {
    let response = self
      .fetcher
      .fetch(&Request::new(Method::Get, url.clone()))
      .await?;
    if !response.ok() {
      return Err(CacheError::Network(format!(
        "{} returned status {}",
        url, response.status
      )));
    }
    response.json()
  }

  async fn get_json<T: Serialize + DeserializeOwned>(&self, path: &str) -> Result<T, CacheError> {
    let url = self.endpoint(path)?;
    let key = url.as_str();

    match self.fetch_json::<T>(&url).await {
      Ok(data) => {
        if let Err(e) = self.storage.set(key, &data).await {
          warn!(url = key, error = %e, "failed to store fetched data");
        }
        Ok(data)
      }
      Err(network_err) => {
        warn!(url = key, error = %network_err, "fetch failed, trying local store");
        match self.storage.get::<T>(key).await {
          Ok(Some(data)) => {
            let stored_at = self.storage.stored_at(key).await.ok().flatten();
            info!(url = key, ?stored_at, "serving stored data");
            Ok(data)
          }
          Ok(None) => Err(CacheError::Absent),
          Err(e) => {
            warn!(url = key, error = %e, "local store unavailable");
            Err(CacheError::Absent)
          }
        }
      }
    }
  }

  /// All restaurants.
  pub async fn restaurants(&self) -> Result<Vec<Restaurant>, CacheError> {
    self.get_json("restaurants").await
  }

  /// Restaurants marked as favorite. Stored separately from the full list.
  pub async fn favorites(&self) -> Result<Vec<Restaurant>, CacheError> {
    self.get_json("restaurants?is_favorite=true").await
  }

  pub async fn restaurant_by_id(&self, id: u64) -> Result<Restaurant, CacheError> {
    self
      .restaurants()
      .await?
      .into_iter()
      .find(|r| r.id == id)
      .ok_or(CacheError::Absent)
  }

  /// Filter by cuisine and neighborhood; `"all"` matches anything.
  pub async fn by_cuisine_and_neighborhood(
    &self,
    cuisine: &str,
    neighborhood: &str,
  ) -> Result<Vec<Restaurant>, CacheError> {
    let restaurants = self.restaurants().await?;
    Ok(
      restaurants
        .into_iter()
        .filter(|r| cuisine == ALL || r.cuisine_type == cuisine)
        .filter(|r| neighborhood == ALL || r.neighborhood == neighborhood)
        .collect(),
    )
  }

  /// Distinct neighborhoods in first-seen order.
  pub async fn neighborhoods(&self) -> Result<Vec<String>, CacheError> {
    let restaurants = self.restaurants().await?;
    Ok(unique(restaurants.into_iter().map(|r| r.neighborhood)))
  }

  /// Distinct cuisines in first-seen order.
  pub async fn cuisines(&self) -> Result<Vec<String>, CacheError> {
    let restaurants = self.restaurants().await?;
    Ok(unique(restaurants.into_iter().map(|r| r.cuisine_type)))
  }

  pub async fn reviews_for(&self, restaurant_id: u64) -> Result<Vec<Review>, CacheError> {
    self
      .get_json(&format!("reviews/?restaurant_id={}", restaurant_id))
      .await
  }

  /// Mark or unmark a restaurant as favorite.
  pub async fn set_favorite(&self, restaurant_id: u64, favorite: bool) -> Result<(), CacheError> {
    let url = self.endpoint(&format!(
      "restaurants/{}/?is_favorite={}",
      restaurant_id, favorite
    ))?;
    self.send(Request::new(Method::Put, url)).await
  }

  async fn send(&self, request: Request) -> Result<(), CacheError> {
    let response = self.fetcher.fetch(&request).await?;
    if !response.ok() {
      return Err(CacheError::Network(format!(
        "{} {} returned status {}",
        request.method.as_str(),
        request.url,
        response.status
      )));
    }
    Ok(())
  }
}

impl<S: KeyValueStore, F: Fetcher> WriteSubmitter for RestaurantApi<S, F> {
  async fn submit(&self, write: &PendingWrite) -> Result<(), CacheError> {
    let request = Request::new(Method::Post, self.endpoint("reviews/")?).with_json(write)?;
    self.send(request).await
  }
}

fn unique(values: impl Iterator<Item = String>) -> Vec<String> {
  let mut seen = Vec::new();
  for v in values {
    if !seen.contains(&v) {
      seen.push(v);
    }
  }
  seen
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::testing::FakeNetwork;

  const BASE: &str = "http://localhost:1337/";
  const RESTAURANTS: &str = "http://localhost:1337/restaurants";

  const LIST: &str = r#"[
    {"id": 1, "name": "Mission Chinese Food", "neighborhood": "Manhattan", "cuisine_type": "Asian"},
    {"id": 2, "name": "Emily", "neighborhood": "Brooklyn", "cuisine_type": "Pizza", "is_favorite": "true"},
    {"id": 3, "name": "Kang Ho Dong Baekjeong", "neighborhood": "Manhattan", "cuisine_type": "Asian"}
  ]"#;

  fn api(
    network: FakeNetwork,
  ) -> (
    RestaurantApi<SqliteStorage, FakeNetwork>,
    Arc<SqliteStorage>,
    Arc<FakeNetwork>,
  ) {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(network);
    let api = RestaurantApi::new(
      Url::parse(BASE).unwrap(),
      Arc::clone(&storage),
      Arc::clone(&network),
    );
    (api, storage, network)
  }

  #[tokio::test]
  async fn test_fetch_stores_copy_under_full_url() {
    let (api, storage, _network) = api(FakeNetwork::new().route(RESTAURANTS, 200, LIST));

    let restaurants = api.restaurants().await.unwrap();

    assert_eq!(restaurants.len(), 3);
    let stored: Option<Vec<Restaurant>> = storage.get(RESTAURANTS).await.unwrap();
    assert_eq!(stored, Some(restaurants));
  }

  #[tokio::test]
  async fn test_falls_back_to_store_when_offline() {
    let (api, _storage, network) = api(FakeNetwork::new().route(RESTAURANTS, 200, LIST));
    api.restaurants().await.unwrap();

    network.set_down(true);
    let restaurants = api.restaurants().await.unwrap();

    assert_eq!(restaurants.len(), 3);
  }

  #[tokio::test]
  async fn test_no_network_and_no_store_is_absent() {
    let (api, _storage, network) = api(FakeNetwork::new());
    network.set_down(true);

    assert_eq!(api.restaurants().await, Err(CacheError::Absent));
  }

  #[tokio::test]
  async fn test_filtered_list_is_not_served_from_full_list() {
    let (api, _storage, network) = api(FakeNetwork::new().route(RESTAURANTS, 200, LIST));
    api.restaurants().await.unwrap();

    network.set_down(true);

    assert_eq!(api.favorites().await, Err(CacheError::Absent));
  }

  #[tokio::test]
  async fn test_filters_and_unique_lists() {
    let (api, _storage, _network) = api(FakeNetwork::new().route(RESTAURANTS, 200, LIST));

    let asian = api.by_cuisine_and_neighborhood("Asian", ALL).await.unwrap();
    let brooklyn = api.by_cuisine_and_neighborhood(ALL, "Brooklyn").await.unwrap();

    assert_eq!(asian.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(brooklyn.len(), 1);
    assert!(brooklyn[0].is_favorite);
    assert_eq!(api.neighborhoods().await.unwrap(), vec!["Manhattan", "Brooklyn"]);
    assert_eq!(api.cuisines().await.unwrap(), vec!["Asian", "Pizza"]);
    assert_eq!(api.restaurant_by_id(2).await.unwrap().name, "Emily");
    assert_eq!(api.restaurant_by_id(9).await, Err(CacheError::Absent));
  }

  #[tokio::test]
  async fn test_submit_posts_review() {
    let (api, _storage, network) =
      api(FakeNetwork::new().route("http://localhost:1337/reviews/", 201, "{}"));
    let write = PendingWrite {
      restaurant_id: 5,
      name: "A".to_string(),
      rating: 4,
      comments: "ok".to_string(),
    };

    api.submit(&write).await.unwrap();

    assert_eq!(network.calls(), vec!["http://localhost:1337/reviews/".to_string()]);
  }

  #[tokio::test]
  async fn test_rejected_write_is_network_error() {
    let (api, _storage, _network) = api(FakeNetwork::new());

    let result = api.set_favorite(2, true).await;

    assert!(matches!(result, Err(CacheError::Network(_))));
  }
}

//! In-process fakes for the network and storage collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::cache::{CacheError, GenerationStore};
use crate::queue::PendingWrite;
use crate::remote::{Fetcher, Request, Response, WriteSubmitter};

/// Fake network that serves canned bodies and records every request.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Response>>,
  down: Mutex<bool>,
  calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(self, url: &str, status: u16, body: &str) -> Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Response::new(url, status, body));
    self
  }

  pub fn set_body(&self, url: &str, body: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Response::new(url, 200, body));
  }

  pub fn set_down(&self, down: bool) {
    *self.down.lock().unwrap() = down;
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

impl Fetcher for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(url.clone());

    if *self.down.lock().unwrap() {
      return Err(CacheError::Network(format!("{} unreachable", url)));
    }

    match self.routes.lock().unwrap().get(&url) {
      Some(response) => Ok(response.clone()),
      None => Ok(Response::new(url, 404, "not found")),
    }
  }
}

/// Fake data server that records submitted writes.
#[derive(Default)]
pub struct RecordingSubmitter {
  submitted: Mutex<Vec<PendingWrite>>,
  reject_names: Mutex<HashSet<String>>,
}

impl RecordingSubmitter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reject every write whose reviewer name matches.
  pub fn reject(self, name: &str) -> Self {
    self.reject_names.lock().unwrap().insert(name.to_string());
    self
  }

  pub fn accept_all(&self) {
    self.reject_names.lock().unwrap().clear();
  }

  pub fn submitted(&self) -> Vec<PendingWrite> {
    self.submitted.lock().unwrap().clone()
  }
}

impl WriteSubmitter for RecordingSubmitter {
  async fn submit(&self, write: &PendingWrite) -> Result<(), CacheError> {
    self.submitted.lock().unwrap().push(write.clone());

    if self.reject_names.lock().unwrap().contains(&write.name) {
      return Err(CacheError::Network("server rejected review".to_string()));
    }
    Ok(())
  }
}

/// Generation store that lists one installed generation but fails entry
/// reads, writes, or both.
pub struct BrokenEntryStore {
  generation: String,
  lookups_fail: bool,
}

impl BrokenEntryStore {
  /// Both lookups and writes fail.
  pub fn failing(generation: &str) -> Self {
    Self {
      generation: generation.to_string(),
      lookups_fail: true,
    }
  }

  /// Lookups miss, writes fail.
  pub fn failing_writes(generation: &str) -> Self {
    Self {
      generation: generation.to_string(),
      lookups_fail: false,
    }
  }
}

impl GenerationStore for BrokenEntryStore {
  async fn generations(&self) -> Result<Vec<String>, CacheError> {
    Ok(vec![self.generation.clone()])
  }

  async fn open(&self, _name: &str) -> Result<(), CacheError> {
    Ok(())
  }

  async fn commit(&self, _name: &str, _entries: &[(String, Response)]) -> Result<(), CacheError> {
    Err(CacheError::storage("disk I/O error"))
  }

  async fn delete(&self, _name: &str) -> Result<bool, CacheError> {
    Ok(false)
  }

  async fn lookup(&self, _name: &str, _url: &str) -> Result<Option<Response>, CacheError> {
    if self.lookups_fail {
      return Err(CacheError::storage("disk I/O error"));
    }
    Ok(None)
  }

  async fn put(&self, _name: &str, _url: &str, _response: &Response) -> Result<(), CacheError> {
    Err(CacheError::storage("disk I/O error"))
  }

  async fn urls(&self, _name: &str) -> Result<Vec<String>, CacheError> {
    Ok(Vec::new())
  }
}

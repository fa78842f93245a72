//! Persistent caching for offline support.
//!
//! This module provides:
//! - A generic async key -> value store for resource JSON and the offline queue
//! - Versioned cache generations with install-time population and
//!   activate-time cleanup of stale versions

mod error;
mod generation;
mod storage;
mod traits;

pub use error::CacheError;
pub use generation::{CacheName, GenerationManager};
pub use storage::SqliteStorage;
pub use traits::{GenerationStore, KeyValueStore};

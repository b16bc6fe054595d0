//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Serialize};

/// Bound for values that can be stored in the persistent cache.
///
/// Values are persisted as JSON text, so anything serde can round-trip qualifies.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Cacheable for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// A typed cache key.
///
/// Each key type fixes the payload type stored under it, so a value read back through
/// a key always has the type that was written for that key family.
pub trait CacheKey {
  /// Payload stored under this key
  type Value: Cacheable;

  /// Storage key, structured as `family:scope[:id]`
  fn cache_key(&self) -> String;

  /// Human-readable description for logs and the CLI
  fn description(&self) -> String {
    self.cache_key()
  }
}

/// Result from a fetch through the cache, including where the value came from.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: FetchSource,
}

impl<T> Fetched<T> {
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: FetchSource::Cache,
    }
  }
}

/// Indicates where fetched data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
  /// Persisted value, producer not invoked
  Cache,
  /// This caller started the producer
  Network,
  /// This caller awaited a producer started by someone else
  Joined,
}

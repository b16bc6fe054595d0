//! Cache layer that coalesces concurrent fetches for the same key.

use color_eyre::{eyre::eyre, Report, Result};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::persistent::PersistentCache;
use super::storage::CacheStorage;
use super::traits::{CacheKey, FetchSource, Fetched};

/// Error shared by every caller that awaited the same failed producer.
///
/// All joiners hold the same underlying [`Report`]; use [`same_as`](Self::same_as)
/// to check that two errors came from one producer run.
#[derive(Clone)]
pub struct SharedFetchError(Arc<Report>);

impl SharedFetchError {
  fn new(report: Report) -> Self {
    Self(Arc::new(report))
  }

  pub fn same_as(&self, other: &SharedFetchError) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}

impl fmt::Debug for SharedFetchError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(&*self.0, f)
  }
}

impl fmt::Display for SharedFetchError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&*self.0, f)
  }
}

impl std::error::Error for SharedFetchError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    self.0.source()
  }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Value, SharedFetchError>>>;

/// A producer run that has not settled yet.
struct InFlight {
  generation: u64,
  fetch: SharedFetch,
}

struct Inner<S: CacheStorage> {
  store: PersistentCache<S>,
  in_flight: Mutex<HashMap<String, InFlight>>,
  next_generation: AtomicU64,
}

/// Read-through cache with request de-duplication.
///
/// `ensure_cached` consults the persistent store first. On a miss, at most one
/// producer runs per key; every concurrent caller for that key awaits the same
/// run and receives the same value or the same error. Successful results are
/// written through before the in-flight slot is cleared.
///
/// Producers run on their own tokio task, so dropping every waiter does not
/// stop a fetch: its result is still persisted.
pub struct FetchCache<S: CacheStorage> {
  inner: Arc<Inner<S>>,
}

impl<S: CacheStorage + 'static> FetchCache<S> {
  pub fn new(store: PersistentCache<S>) -> Self {
    Self {
      inner: Arc::new(Inner {
        store,
        in_flight: Mutex::new(HashMap::new()),
        next_generation: AtomicU64::new(0),
      }),
    }
  }

  /// The persistent store behind this cache.
  pub fn store(&self) -> &PersistentCache<S> {
    &self.inner.store
  }

  /// Number of producers currently running.
  pub fn in_flight_count(&self) -> usize {
    self.lock_table().map(|t| t.len()).unwrap_or_default()
  }

  /// Return the cached value for `key`, running `producer` on a miss.
  pub async fn ensure_cached<K, F, Fut>(&self, key: &K, producer: F) -> Result<K::Value>
  where
    K: CacheKey,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<K::Value>> + Send + 'static,
  {
    Ok(self.ensure_cached_with_source(key, producer).await?.data)
  }

  /// Like [`ensure_cached`](Self::ensure_cached), also reporting where the value came from.
  ///
  /// 1. Persisted value present - return it, producer not invoked
  /// 2. Producer already running for this key - await that run
  /// 3. Otherwise start `producer`, register it, then await it
  pub async fn ensure_cached_with_source<K, F, Fut>(
    &self,
    key: &K,
    producer: F,
  ) -> Result<Fetched<K::Value>>
  where
    K: CacheKey,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<K::Value>> + Send + 'static,
  {
    let cache_key = key.cache_key();

    if let Some(value) = self.inner.store.read::<K::Value>(&cache_key) {
      debug!(key = %cache_key, "cache hit");
      return Ok(Fetched::from_cache(value));
    }

    let (fetch, source) = {
      let mut table = self.lock_table()?;

      // A producer may have written and cleared its slot since the read above
      if let Some(value) = self.inner.store.read::<K::Value>(&cache_key) {
        debug!(key = %cache_key, "cache hit after in-flight settled");
        return Ok(Fetched::from_cache(value));
      }

      match table.get(&cache_key) {
        Some(in_flight) => {
          debug!(key = %cache_key, "joining in-flight fetch");
          (in_flight.fetch.clone(), FetchSource::Joined)
        }
        None => {
          let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
          debug!(
            key = %cache_key,
            resource = %key.description(),
            generation,
            "cache miss, starting producer"
          );
          let fetch = self.spawn_producer(cache_key.clone(), generation, producer());
          table.insert(
            cache_key.clone(),
            InFlight {
              generation,
              fetch: fetch.clone(),
            },
          );
          (fetch, FetchSource::Network)
        }
      }
    };

    let value = fetch.await.map_err(Report::new)?;
    let data = serde_json::from_value(value)
      .map_err(|e| eyre!("Fetched value for {} has unexpected shape: {}", cache_key, e))?;

    Ok(Fetched { data, source })
  }

  /// Invalidate `key`, then fetch it again through `producer`.
  pub async fn refresh<K, F, Fut>(&self, key: &K, producer: F) -> Result<K::Value>
  where
    K: CacheKey,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<K::Value>> + Send + 'static,
  {
    self.inner.store.invalidate(&key.cache_key())?;
    self.ensure_cached(key, producer).await
  }

  fn lock_table(&self) -> Result<MutexGuard<'_, HashMap<String, InFlight>>> {
    self
      .inner
      .in_flight
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run `fut` on its own task, persisting the result on success.
  ///
  /// The slot for (`key`, `generation`) is cleared once the producer settles,
  /// whether it succeeded, failed or panicked.
  fn spawn_producer<T, Fut>(&self, key: String, generation: u64, fut: Fut) -> SharedFetch
  where
    T: serde::Serialize + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let inner = Arc::clone(&self.inner);
    let task_key = key.clone();

    let handle = tokio::spawn(async move {
      let _slot = SlotGuard {
        inner: &inner,
        key: &task_key,
        generation,
      };

      let value = fut.await.map_err(|e| {
        warn!(key = %task_key, error = %e, "producer failed");
        SharedFetchError::new(e)
      })?;

      inner
        .store
        .write(&task_key, &value)
        .map_err(SharedFetchError::new)?;

      serde_json::to_value(&value).map_err(|e| {
        SharedFetchError::new(eyre!("Failed to serialize value for {}: {}", task_key, e))
      })
    });

    async move {
      match handle.await {
        Ok(result) => result,
        Err(e) => Err(SharedFetchError::new(eyre!(
          "Producer for {} did not complete: {}",
          key,
          e
        ))),
      }
    }
    .boxed()
    .shared()
  }
}

impl<S: CacheStorage> Clone for FetchCache<S> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

/// Clears an in-flight slot when dropped, including during a panic unwind.
struct SlotGuard<'a, S: CacheStorage> {
  inner: &'a Inner<S>,
  key: &'a str,
  generation: u64,
}

impl<S: CacheStorage> Drop for SlotGuard<'_, S> {
  fn drop(&mut self) {
    let mut table = self
      .inner
      .in_flight
      .lock()
      .unwrap_or_else(PoisonError::into_inner);

    if matches!(table.get(self.key), Some(f) if f.generation == self.generation) {
      table.remove(self.key);
    }
  }
}

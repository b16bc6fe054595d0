//! Cache-backed query binding for views.
//!
//! A `CachedQuery<K>` adapts [`FetchCache`] to the lifecycle of a view: it seeds
//! its state synchronously from the persistent cache, fetches only on a miss,
//! and delivers results through a channel that the owner polls on each tick.
//!
//! # Example
//!
//! ```ignore
//! let client = cached_client.clone();
//! let mut query = CachedQuery::new(cache.clone(), MeKey, move || {
//!     let client = client.clone();
//!     async move { client.raw().me().await }
//! });
//!
//! // Start fetching (no-op if the cache already had a value)
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! let (data, loading, error) = query.snapshot();
//! ```

use color_eyre::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cache::{CacheKey, CacheStorage, FetchCache};

/// The state of a query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
  /// Nothing cached and no fetch started yet
  Empty,
  /// A fetch is in progress
  Loading,
  /// Data is available, either from the cache or from a finished fetch
  Ready(T),
  /// The last fetch failed
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Ready(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// A boxed future producing a fresh value
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Query bound to one cache key at a time.
///
/// Cancellation is advisory: [`cancel`](Self::cancel) (or dropping the query)
/// stops late results from reaching this query's state, but the underlying
/// producer keeps running and still persists its result.
pub struct CachedQuery<K: CacheKey, S: CacheStorage> {
  cache: FetchCache<S>,
  key: K,
  state: QueryState<K::Value>,
  fetcher: FetcherFn<K::Value>,
  receiver: Option<mpsc::UnboundedReceiver<Result<K::Value, String>>>,
  cancelled: Arc<AtomicBool>,
}

impl<K, S> CachedQuery<K, S>
where
  K: CacheKey + Clone + Send + Sync + 'static,
  S: CacheStorage + 'static,
{
  /// Create a query for `key`.
  ///
  /// If the persistent cache holds a value for `key`, the query starts out
  /// `Ready` with it and `fetch` will not call `fetcher`.
  pub fn new<F, Fut>(cache: FetchCache<S>, key: K, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<K::Value>> + Send + 'static,
  {
    let state = Self::seed(&cache, &key);
    Self {
      cache,
      key,
      state,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
      cancelled: Arc::new(AtomicBool::new(false)),
    }
  }

  fn seed(cache: &FetchCache<S>, key: &K) -> QueryState<K::Value> {
    match cache.store().get(key) {
      Some(value) => QueryState::Ready(value),
      None => QueryState::Empty,
    }
  }

  pub fn key(&self) -> &K {
    &self.key
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<K::Value> {
    &self.state
  }

  pub fn data(&self) -> Option<&K::Value> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// Current value, loading flag and error message.
  pub fn snapshot(&self) -> (Option<&K::Value>, bool, Option<&str>) {
    (self.data(), self.is_loading(), self.error())
  }

  /// Start fetching if nothing is cached yet.
  ///
  /// This is a no-op while loading, once ready, or after an error; use
  /// [`refetch`](Self::refetch) to retry.
  pub fn fetch(&mut self) {
    if matches!(self.state, QueryState::Empty) {
      self.start_fetch();
    }
  }

  /// Invalidate the cached value and fetch again.
  pub fn refetch(&mut self) {
    if let Err(e) = self.cache.store().invalidate(&self.key.cache_key()) {
      self.state = QueryState::Error(e.to_string());
      return;
    }
    self.detach();
    self.start_fetch();
  }

  /// Switch to a different key, restarting from the cache.
  pub fn set_key(&mut self, key: K) {
    self.detach();
    self.key = key;
    self.state = Self::seed(&self.cache, &self.key);
  }

  /// Replace the value with one known to be fresh, writing it through to the cache.
  ///
  /// Any pending fetch result is discarded.
  pub fn set_local(&mut self, value: K::Value) -> Result<()> {
    self.cache.store().put(&self.key, &value)?;
    self.detach();
    self.state = QueryState::Ready(value);
    Ok(())
  }

  /// Stop delivering results to this query. The fetch itself is not aborted.
  pub fn cancel(&mut self) {
    self.detach();
    if self.state.is_loading() {
      self.state = QueryState::Empty;
    }
  }

  /// Poll for results from a pending fetch.
  ///
  /// Returns `true` if the state changed (data arrived or error occurred).
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    // Try to receive without blocking
    match receiver.try_recv() {
      Ok(Ok(data)) => {
        self.state = QueryState::Ready(data);
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending - treat as error
        self.state = QueryState::Error("Query was cancelled".to_string());
        self.receiver = None;
        true
      }
    }
  }

  /// Wait until the pending fetch settles. Returns immediately if none is pending.
  pub async fn settled(&mut self) {
    if let Some(rx) = &mut self.receiver {
      let result = rx.recv().await;
      self.receiver = None;
      self.state = match result {
        Some(Ok(data)) => QueryState::Ready(data),
        Some(Err(error)) => QueryState::Error(error),
        None => QueryState::Error("Query was cancelled".to_string()),
      };
    }
  }

  /// Mark the current fetch as abandoned and drop its channel.
  fn detach(&mut self) {
    self.cancelled.store(true, Ordering::SeqCst);
    self.cancelled = Arc::new(AtomicBool::new(false));
    self.receiver = None;
  }

  /// Internal: start the fetch operation
  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let cache = self.cache.clone();
    let key = self.key.clone();
    let future = (self.fetcher)();
    let cancelled = Arc::clone(&self.cancelled);

    tokio::spawn(async move {
      let result = cache
        .ensure_cached(&key, move || future)
        .await
        .map_err(|e| e.to_string());

      if cancelled.load(Ordering::SeqCst) {
        return;
      }
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

impl<K: CacheKey, S: CacheStorage> Drop for CachedQuery<K, S> {
  fn drop(&mut self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }
}

impl<K, S> std::fmt::Debug for CachedQuery<K, S>
where
  K: CacheKey,
  K::Value: std::fmt::Debug,
  S: CacheStorage,
{
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CachedQuery")
      .field("key", &self.key.cache_key())
      .field("state", &self.state)
      .finish_non_exhaustive()
  }
}

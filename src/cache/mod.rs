//! Client-side read-through cache.
//!
//! This module provides a backend-agnostic caching mechanism that:
//! - Persists one JSON document per string key, surviving restarts
//! - Treats unreadable entries as misses instead of errors
//! - Runs at most one producer per key, sharing its result with every concurrent caller
//! - Supports invalidation of single keys or whole key families by prefix

mod layer;
mod persistent;
mod storage;
mod traits;

pub use layer::{FetchCache, SharedFetchError};
pub use persistent::PersistentCache;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage, StoredEntry};
pub use traits::{CacheKey, Cacheable, FetchSource, Fetched};

//! Typed JSON view over a [`CacheStorage`] backend.

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::{CacheStorage, StoredEntry};
use super::traits::CacheKey;

/// Synchronous key-value cache holding one JSON document per key.
///
/// Reads never fail: a storage error or a document that does not parse as the
/// requested type is reported as a miss. Writes propagate storage failures.
pub struct PersistentCache<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> PersistentCache<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Read the value stored under `key`, or `None` if absent or unreadable.
  pub fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let raw = match self.storage.get_raw(key) {
      Ok(raw) => raw?,
      Err(e) => {
        warn!(key, error = %e, "cache read failed, treating as miss");
        return None;
      }
    };

    match serde_json::from_str(&raw) {
      Ok(value) => Some(value),
      Err(e) => {
        debug!(key, error = %e, "cached document unreadable, treating as miss");
        None
      }
    }
  }

  /// Serialize `value` and store it under `key`, replacing any previous value.
  ///
  /// A value serializing to JSON `null` removes the key: absence is the only
  /// representation of "no value".
  pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
    let data = serde_json::to_string(value)
      .map_err(|e| eyre!("Failed to serialize cache entry {}: {}", key, e))?;

    if data == "null" {
      return self.storage.delete(key);
    }

    self.storage.put_raw(key, &data)
  }

  /// Delete `key`. Removing an absent key is a no-op.
  pub fn remove(&self, key: &str) -> Result<()> {
    self.storage.delete(key)
  }

  /// Drop the entry for `key` so the next read misses.
  ///
  /// Same effect as [`remove`](Self::remove); used after mutations.
  pub fn invalidate(&self, key: &str) -> Result<()> {
    debug!(key, "invalidating cache entry");
    self.storage.delete(key)
  }

  /// Drop every entry whose key starts with `prefix`.
  pub fn invalidate_by_prefix(&self, prefix: &str) -> Result<usize> {
    let removed = self.storage.delete_prefix(prefix)?;
    debug!(prefix, removed, "invalidated cache family");
    Ok(removed)
  }

  /// Typed read through a [`CacheKey`].
  pub fn get<K: CacheKey>(&self, key: &K) -> Option<K::Value> {
    self.read(&key.cache_key())
  }

  /// Typed write through a [`CacheKey`].
  pub fn put<K: CacheKey>(&self, key: &K, value: &K::Value) -> Result<()> {
    self.write(&key.cache_key(), value)
  }

  /// List stored entries.
  pub fn entries(&self) -> Result<Vec<StoredEntry>> {
    self.storage.entries()
  }

  /// Drop every entry.
  pub fn clear(&self) -> Result<()> {
    self.storage.clear()
  }
}

impl<S: CacheStorage> Clone for PersistentCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{FailingStorage, SqliteStorage};
  use proptest::prelude::*;
  use serde::Deserialize;
  use serde_json::{json, Value};

  fn cache() -> PersistentCache<SqliteStorage> {
    PersistentCache::new(SqliteStorage::open_in_memory().unwrap())
  }

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Profile {
    id: u64,
    full_name: String,
  }

  struct ProfileKey;

  impl CacheKey for ProfileKey {
    type Value = Profile;

    fn cache_key(&self) -> String {
      "me:ambassador".to_string()
    }
  }

  #[test]
  fn test_write_then_read_returns_equal_value() {
    let cache = cache();
    let value = json!({
      "id": 7,
      "full_name": "Sara",
      "tags": ["a", "b"],
      "address": { "city": "Rabat", "zip": null },
      "score": 1.5,
      "active": true
    });

    cache.write("me:ambassador", &value).unwrap();

    assert_eq!(cache.read::<Value>("me:ambassador"), Some(value));
  }

  #[test]
  fn test_read_absent_key() {
    assert_eq!(cache().read::<Value>("me:ambassador"), None);
  }

  #[test]
  fn test_corrupted_document_is_a_miss() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put_raw("me:ambassador", "{not json").unwrap();
    let cache = PersistentCache::new(storage);

    assert_eq!(cache.read::<Value>("me:ambassador"), None);
  }

  #[test]
  fn test_storage_read_error_is_a_miss() {
    let storage = FailingStorage::new();
    storage.put_raw("me:ambassador", r#"{"id":7}"#).unwrap();
    let fail_reads = std::sync::Arc::clone(&storage.fail_reads);
    let cache = PersistentCache::new(storage);

    fail_reads.store(true, std::sync::atomic::Ordering::SeqCst);

    assert_eq!(cache.read::<Value>("me:ambassador"), None);
  }

  #[test]
  fn test_type_mismatch_is_a_miss() {
    let cache = cache();
    cache.write("me:ambassador", &json!([1, 2, 3])).unwrap();

    assert_eq!(cache.get(&ProfileKey), None);
  }

  #[test]
  fn test_writing_null_removes_key() {
    let cache = cache();
    cache.write("me:ambassador", &json!({"id": 1})).unwrap();

    cache.write("me:ambassador", &Value::Null).unwrap();

    assert_eq!(cache.read::<Value>("me:ambassador"), None);
    assert!(cache.entries().unwrap().is_empty());
  }

  #[test]
  fn test_last_writer_wins() {
    let cache = cache();
    cache.write("teenagers:list", &json!([1])).unwrap();
    cache.write("teenagers:list", &json!([2, 3])).unwrap();

    assert_eq!(cache.read::<Value>("teenagers:list"), Some(json!([2, 3])));
  }

  #[test]
  fn test_remove_absent_key_leaves_store_unchanged() {
    let cache = cache();
    cache.write("other:1", &json!(1)).unwrap();

    cache.remove("missing").unwrap();
    cache.invalidate("missing").unwrap();

    assert_eq!(cache.read::<Value>("other:1"), Some(json!(1)));
    assert_eq!(cache.entries().unwrap().len(), 1);
  }

  #[test]
  fn test_invalidate_by_prefix_keeps_other_families() {
    let cache = cache();
    cache.write("family:1", &json!(1)).unwrap();
    cache.write("family:2", &json!(2)).unwrap();
    cache.write("other:1", &json!(3)).unwrap();

    assert_eq!(cache.invalidate_by_prefix("family:").unwrap(), 2);

    assert_eq!(cache.read::<Value>("family:1"), None);
    assert_eq!(cache.read::<Value>("family:2"), None);
    assert_eq!(cache.read::<Value>("other:1"), Some(json!(3)));
  }

  #[test]
  fn test_typed_put_get() {
    let cache = cache();
    let profile = Profile {
      id: 7,
      full_name: "Sara".to_string(),
    };

    cache.put(&ProfileKey, &profile).unwrap();

    assert_eq!(cache.get(&ProfileKey), Some(profile));
  }

  fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
      Just(Value::Null),
      any::<bool>().prop_map(Value::from),
      any::<i64>().prop_map(Value::from),
      "[a-zA-Z0-9 éü\"\\\\]{0,12}".prop_map(Value::from),
    ];
    leaf.prop_recursive(4, 48, 6, |inner| {
      prop_oneof![
        prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
        prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
          .prop_map(|map| Value::Object(map.into_iter().collect())),
      ]
    })
  }

  proptest! {
    #[test]
    fn prop_write_read_round_trip(
      value in json_value().prop_filter("root null deletes the key", |v| !v.is_null()),
    ) {
      let cache = cache();

      cache.write("teenagers:list", &value).unwrap();

      prop_assert_eq!(cache.read::<Value>("teenagers:list"), Some(value));
    }

    #[test]
    fn prop_prefix_invalidation_removes_exactly_matching_keys(
      keys in prop::collection::btree_set("[a-c%_]{1,3}:[0-9]{1,2}", 1..12),
      prefix in "[a-c%_]{1,2}",
    ) {
      let cache = cache();
      for key in &keys {
        cache.write(key, &json!(key)).unwrap();
      }

      cache.invalidate_by_prefix(&prefix).unwrap();

      for key in &keys {
        let present = cache.read::<Value>(key).is_some();
        prop_assert_eq!(present, !key.starts_with(&prefix));
      }
    }
  }
}

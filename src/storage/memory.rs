use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::clock::Clock;

/// Errors surfaced by a [`CacheStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("value under key {key} is not a counter")]
    NotACounter { key: String },

    #[error("failed to (de)serialize cached value: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Shared key-value store with per-entry TTL and atomic increments.
///
/// All cross-request state (rate counters, per-visitor logs, cached
/// detection results) goes through this interface.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Store `value`, resetting the entry's TTL.
    fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically add one to the counter under `key` and return the new value.
    /// A missing or expired counter starts at 1 with the given TTL; an
    /// existing counter keeps the expiry it was created with.
    fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;
}

/// Typed read helper over [`CacheStore::get`].
pub fn get_json<T: DeserializeOwned>(
    store: &dyn CacheStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Typed write helper over [`CacheStore::put`].
pub fn put_json<T: Serialize>(
    store: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), StoreError> {
    store.put(key, serde_json::to_value(value)?, ttl)
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: f64,
}

/// In-process [`CacheStore`] backed by a `DashMap`.
///
/// Expiry is evaluated lazily on read against the injected clock, and
/// [`MemoryStore::cleanup`] sweeps expired entries in bulk.
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Remove all expired entries.
    pub fn cleanup(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn expiry(&self, ttl: Duration) -> f64 {
        self.clock.now() + ttl.as_secs_f64()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
        }
        Ok(None)
    }

    fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = self.expiry(ttl);
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: Value::from(0u64),
                expires_at: now + ttl.as_secs_f64(),
            });

        if entry.expires_at <= now {
            entry.value = Value::from(0u64);
            entry.expires_at = now + ttl.as_secs_f64();
        }

        let current = entry.value.as_u64().ok_or_else(|| StoreError::NotACounter {
            key: key.to_string(),
        })?;
        let next = current + 1;
        entry.value = Value::from(next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(1_000.0));
        let store = MemoryStore::new(clock.clone());
        (clock, store)
    }

    #[test]
    fn test_put_get_and_expire() {
        let (clock, store) = store();
        store.put("k", json!({"a": 1}), Duration::from_secs(10)).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!({"a": 1})));

        clock.advance(10.5);
        assert_eq!(store.get("k").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_put_resets_ttl() {
        let (clock, store) = store();
        store.put("k", json!(1), Duration::from_secs(10)).unwrap();
        clock.advance(8.0);
        store.put("k", json!(2), Duration::from_secs(10)).unwrap();
        clock.advance(8.0);
        assert_eq!(store.get("k").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_increment_keeps_creation_expiry() {
        let (clock, store) = store();
        assert_eq!(store.increment("c", Duration::from_secs(60)).unwrap(), 1);
        clock.advance(30.0);
        assert_eq!(store.increment("c", Duration::from_secs(60)).unwrap(), 2);
        clock.advance(31.0);
        // window created at t=0 has elapsed
        assert_eq!(store.increment("c", Duration::from_secs(60)).unwrap(), 1);
    }

    #[test]
    fn test_increment_rejects_non_counter() {
        let (_clock, store) = store();
        store.put("c", json!("text"), Duration::from_secs(60)).unwrap();
        let err = store.increment("c", Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, StoreError::NotACounter { .. }));
    }

    #[test]
    fn test_cleanup_removes_expired() {
        let (clock, store) = store();
        store.put("short", json!(1), Duration::from_secs(1)).unwrap();
        store.put("long", json!(1), Duration::from_secs(100)).unwrap();
        clock.advance(5.0);
        store.cleanup();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_typed_helpers() {
        let (_clock, store) = store();
        put_json(&store, "v", &vec![1u32, 2, 3], Duration::from_secs(5)).unwrap();
        let got: Option<Vec<u32>> = get_json(&store, "v").unwrap();
        assert_eq!(got, Some(vec![1, 2, 3]));
        let missing: Option<Vec<u32>> = get_json(&store, "nope").unwrap();
        assert!(missing.is_none());
    }
}

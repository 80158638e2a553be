//! Namespaced key-value cache with per-entry expiry.
//!
//! Entries live in the injected [`PersistentStore`] under
//! `<namespace><key>` as JSON `{ "value": .., "expires_at_ms": .. }`.
//! Eviction is lazy: a `get` that observes an expired or unreadable entry
//! deletes it and reports a miss. No storage fault ever reaches the caller.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::traits::{Clock, PersistentStore};

/// Default key prefix for cache entries.
pub const DEFAULT_NAMESPACE: &str = "cache:";

#[derive(Serialize, Deserialize)]
struct CacheEntry<T> {
    value: T,
    expires_at_ms: i64,
}

/// A TTL cache over a durable store.
#[derive(Clone)]
pub struct TtlCache {
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    namespace: String,
}

impl TtlCache {
    pub fn new(store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_namespace(store, clock, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            namespace: namespace.into(),
        }
    }

    /// The backing store, for state that must outlive cache expiry.
    pub fn store(&self) -> &Arc<dyn PersistentStore> {
        &self.store
    }

    /// The store key an entry is persisted under.
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    /// Store `value` until `ttl` from now.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let entry = CacheEntry {
            value,
            expires_at_ms: self.clock.now_ms().saturating_add(ttl_ms),
        };
        let encoded = match serde_json::to_string(&entry) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(key, "cache value not serializable: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set(&self.storage_key(key), &encoded) {
            tracing::warn!(key, "cache write failed: {e}");
        }
    }

    /// Read a live entry, evicting it if expired or malformed.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let storage_key = self.storage_key(key);
        let raw = match self.store.get(&storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(key, "cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key, "cache read failed: {e}");
                return None;
            }
        };

        let entry: CacheEntry<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key, "evicting malformed cache entry: {e}");
                self.evict(&storage_key);
                return None;
            }
        };

        if self.clock.now_ms() > entry.expires_at_ms {
            tracing::debug!(key, "cache entry expired");
            self.evict(&storage_key);
            return None;
        }

        match serde_json::from_value(entry.value) {
            Ok(value) => {
                tracing::debug!(key, "cache hit");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key, "evicting cache entry of unexpected shape: {e}");
                self.evict(&storage_key);
                None
            }
        }
    }

    /// Remove one entry.
    pub fn clear(&self, key: &str) {
        self.evict(&self.storage_key(key));
    }

    /// Remove every entry under this cache's namespace, leaving other keys
    /// in the store untouched.
    pub fn clear_all(&self) {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("cache clear_all could not list keys: {e}");
                return;
            }
        };
        for key in keys.iter().filter(|k| k.starts_with(&self.namespace)) {
            self.evict(key);
        }
    }

    fn evict(&self, storage_key: &str) {
        if let Err(e) = self.store.remove(storage_key) {
            tracing::warn!(key = storage_key, "cache eviction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, TtlCache) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let cache = TtlCache::new(store.clone(), clock.clone());
        (store, clock, cache)
    }

    #[test]
    fn get_after_set_returns_value() {
        let (_store, _clock, cache) = setup();
        cache.set("leaders", &vec![3, 2, 1], Duration::from_secs(300));
        assert_eq!(cache.get::<Vec<i32>>("leaders"), Some(vec![3, 2, 1]));
    }

    #[test]
    fn expired_entry_is_evicted_from_storage() {
        let (store, clock, cache) = setup();
        cache.set("offset", &120_000i64, Duration::from_secs(60));

        clock.advance(Duration::from_secs(60));
        // Exactly at expiry the entry is still live.
        assert_eq!(cache.get::<i64>("offset"), Some(120_000));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get::<i64>("offset"), None);
        assert_eq!(store.get("cache:offset").unwrap(), None);
    }

    #[test]
    fn malformed_entry_is_a_miss_and_removed() {
        let (store, _clock, cache) = setup();
        store.set("cache:broken", "{not json").unwrap();
        assert_eq!(cache.get::<String>("broken"), None);
        assert_eq!(store.get("cache:broken").unwrap(), None);

        store
            .set("cache:shape", r#"{"value":"text","expires_at_ms":9999999999999}"#)
            .unwrap();
        assert_eq!(cache.get::<u64>("shape"), None);
        assert_eq!(store.get("cache:shape").unwrap(), None);
    }

    #[test]
    fn clear_all_only_touches_namespace() {
        let (store, _clock, cache) = setup();
        cache.set("a", &1, Duration::from_secs(60));
        cache.set("b", &2, Duration::from_secs(60));
        store.set("training_progress_u1", "[\"1.1\"]").unwrap();
        store.set("pending_quiz_submissions", "[]").unwrap();

        cache.clear_all();

        assert_eq!(cache.get::<i32>("a"), None);
        assert_eq!(cache.get::<i32>("b"), None);
        assert!(store.get("training_progress_u1").unwrap().is_some());
        assert!(store.get("pending_quiz_submissions").unwrap().is_some());
    }

    #[test]
    fn clear_removes_single_entry() {
        let (_store, _clock, cache) = setup();
        cache.set("a", &1, Duration::from_secs(60));
        cache.set("b", &2, Duration::from_secs(60));
        cache.clear("a");
        assert_eq!(cache.get::<i32>("a"), None);
        assert_eq!(cache.get::<i32>("b"), Some(2));
    }

    #[test]
    fn storage_faults_degrade_to_miss() {
        let (store, _clock, cache) = setup();
        store.set_fail_writes(true);
        cache.set("a", &1, Duration::from_secs(60));
        store.set_fail_writes(false);
        assert_eq!(cache.get::<i32>("a"), None);

        cache.set("a", &1, Duration::from_secs(60));
        store.set_fail_reads(true);
        assert_eq!(cache.get::<i32>("a"), None);
        cache.clear_all();
    }

    #[test]
    fn namespaces_are_isolated() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let a = TtlCache::with_namespace(store.clone(), clock.clone(), "a:");
        let b = TtlCache::with_namespace(store.clone(), clock, "b:");
        a.set("k", &1, Duration::from_secs(60));
        b.set("k", &2, Duration::from_secs(60));
        a.clear_all();
        assert_eq!(a.get::<i32>("k"), None);
        assert_eq!(b.get::<i32>("k"), Some(2));
    }
}

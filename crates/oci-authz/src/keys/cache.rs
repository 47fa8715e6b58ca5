//! Public-key cache with absolute expiry
//!
//! One map holds keys of every trust class. Callers namespace their entries
//! by prefixing the raw key id with a class marker ([`SYSTEM_KEY_PREFIX`],
//! [`API_KEY_PREFIX`]) so a lookup in one class can never be answered by an
//! entry of another.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::signer::Key;

/// Cache class of token-signing system keys
pub const SYSTEM_KEY_PREFIX: &str = "SYSTEMKEY";
/// Cache class of customer API keys
pub const API_KEY_PREFIX: &str = "APIKEY";

static GLOBAL: LazyLock<Arc<KeyCache>> = LazyLock::new(|| Arc::new(KeyCache::new()));

#[derive(Debug, Clone)]
struct CachedKey {
    key: Key,
    expires: Instant,
}

impl CachedKey {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires
    }
}

/// Keys cached by namespaced key id
#[derive(Debug, Default)]
pub struct KeyCache {
    entries: Mutex<HashMap<String, CachedKey>>,
}

impl KeyCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache, for callers that opt into sharing across suppliers
    pub fn global() -> Arc<KeyCache> {
        Arc::clone(&GLOBAL)
    }

    /// Cache key for `key_id` in the class `prefix`
    pub fn namespaced(prefix: &str, key_id: &str) -> String {
        format!("{prefix}{key_id}")
    }

    /// Cached key, if present and not expired; expired entries are removed
    pub fn get(&self, key_id: &str) -> Option<Key> {
        let mut entries = self.entries.lock();
        match entries.get(key_id) {
            Some(cached) if cached.is_expired(Instant::now()) => {
                entries.remove(key_id);
                None
            }
            Some(cached) => Some(cached.key.clone()),
            None => None,
        }
    }

    /// Store `key` for `period`, sweeping expired entries first
    pub fn store(&self, key_id: impl Into<String>, key: Key, period: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, cached| !cached.is_expired(now));
        entries.insert(
            key_id.into(),
            CachedKey {
                key,
                expires: now + period,
            },
        );
    }

    /// Drop every expired entry
    pub fn clear_expired(&self) {
        let now = Instant::now();
        self.entries.lock().retain(|_, cached| !cached.is_expired(now));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::key::test_keys;

    fn public_key() -> Key {
        Key::from(test_keys::private_key().to_public_key())
    }

    #[test]
    fn test_store_and_get() {
        let cache = KeyCache::new();
        cache.store("SYSTEMKEYasw1", public_key(), Duration::from_secs(60));

        assert_eq!(cache.get("SYSTEMKEYasw1"), Some(public_key()));
        assert_eq!(cache.get("SYSTEMKEYasw2"), None);
    }

    #[test]
    fn test_expired_entry_removed_on_get() {
        let cache = KeyCache::new();
        cache.store("k", public_key(), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_store_sweeps_expired() {
        let cache = KeyCache::new();
        cache.store("old", public_key(), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        cache.store("new", public_key(), Duration::from_secs(60));

        assert_eq!(cache.len(), 1);
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn test_classes_do_not_collide() {
        let cache = KeyCache::new();
        let system = KeyCache::namespaced(SYSTEM_KEY_PREFIX, "asw-shared");
        let api = KeyCache::namespaced(API_KEY_PREFIX, "asw-shared");
        cache.store(system.clone(), public_key(), Duration::from_secs(60));

        assert!(cache.get(&system).is_some());
        assert!(cache.get(&api).is_none());
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Arc::ptr_eq(&KeyCache::global(), &KeyCache::global()));
    }
}

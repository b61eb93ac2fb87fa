//! Schema cache
//!
//! Memoizes descriptors loaded from the message log, keyed by message id.
//! Log messages never change once published, so an entry stays valid for as
//! long as the cache keeps it. Size and age limits are optional.
//!
//! Entries are stored serialized: every `get` hands out a fresh copy that the
//! import pipeline is free to mutate.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::schema::SchemaDescriptor;

type Entries = LruCache<String, (String, Instant)>;

/// Message id → descriptor cache shared by concurrent imports
#[derive(Debug)]
pub struct SchemaCache {
    entries: RwLock<Entries>,
    ttl: Option<Duration>,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::with_limits(None, None)
    }
}

impl SchemaCache {
    /// Unbounded cache without expiry
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache with an optional entry limit (least recently used entries are
    /// evicted first) and time-to-live
    pub fn with_limits(max_entries: Option<usize>, ttl: Option<Duration>) -> Self {
        let entries = match max_entries.and_then(NonZeroUsize::new) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            entries: RwLock::new(entries),
            ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_limits(config.max_entries, config.ttl_secs.map(Duration::from_secs))
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn expired(&self, inserted_at: &Instant) -> bool {
        self.ttl.is_some_and(|ttl| inserted_at.elapsed() >= ttl)
    }

    /// Whether a live entry exists; does not count as a use
    pub fn has(&self, id: &str) -> bool {
        let mut entries = self.write();
        let expired = match entries.peek(id) {
            Some((_, inserted_at)) => self.expired(inserted_at),
            None => return false,
        };
        if expired {
            debug!(message_id = id, "cached schema expired");
            entries.pop(id);
        }
        !expired
    }

    /// Cached descriptor, or `None` when missing, expired or unreadable
    pub fn get(&self, id: &str) -> Option<SchemaDescriptor> {
        let mut entries = self.write();
        let payload = {
            let (payload, inserted_at) = entries.get(id)?;
            (!self.expired(inserted_at)).then(|| payload.clone())
        };
        let Some(payload) = payload else {
            debug!(message_id = id, "cached schema expired");
            entries.pop(id);
            return None;
        };
        drop(entries);

        match serde_json::from_str(&payload) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                warn!(message_id = id, error = %e, "discarding unreadable cache entry");
                None
            }
        }
    }

    /// Store a descriptor; serialization failures are logged and ignored
    pub fn set(&self, id: &str, descriptor: &SchemaDescriptor) {
        let payload = match serde_json::to_string(descriptor) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(message_id = id, error = %e, "schema not cached");
                return;
            }
        };

        if let Some((evicted, _)) = self.write().push(id.to_string(), (payload, Instant::now())) {
            if evicted != id {
                debug!(message_id = %evicted, "evicting cached schema");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(uuid: &str) -> SchemaDescriptor {
        let mut d = SchemaDescriptor::new(uuid, "Schema", json!({"title": uuid, "n": [1, 2.5, null]}));
        d.relationships = vec!["1.2".into()];
        d
    }

    #[test]
    fn test_set_then_get() {
        let cache = SchemaCache::new();
        assert!(!cache.has("m1"));
        assert!(cache.get("m1").is_none());

        let d = descriptor("u1");
        cache.set("m1", &d);
        assert!(cache.has("m1"));
        assert_eq!(cache.get("m1"), Some(d));
    }

    #[test]
    fn test_get_returns_independent_copy() {
        let cache = SchemaCache::new();
        cache.set("m1", &descriptor("u1"));
        let mut copy = cache.get("m1").unwrap();
        copy.uuid = "changed".into();
        assert_eq!(cache.get("m1").unwrap().uuid, "u1");
    }

    #[test]
    fn test_overwrite_is_last_write_wins() {
        let cache = SchemaCache::new();
        cache.set("m1", &descriptor("u1"));
        cache.set("m1", &descriptor("u2"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("m1").unwrap().uuid, "u2");
    }

    #[test]
    fn test_bounded_size_evicts_least_recently_used() {
        let cache = SchemaCache::with_limits(Some(2), None);
        cache.set("m1", &descriptor("u1"));
        cache.set("m2", &descriptor("u2"));
        assert!(cache.get("m1").is_some());
        cache.set("m3", &descriptor("u3"));

        assert_eq!(cache.len(), 2);
        assert!(!cache.has("m2"));
        assert!(cache.has("m1") && cache.has("m3"));
    }

    #[test]
    fn test_zero_limit_is_unbounded() {
        let cache = SchemaCache::with_limits(Some(0), None);
        for i in 0..5 {
            cache.set(&format!("m{}", i), &descriptor("u"));
        }
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = SchemaCache::with_limits(None, Some(Duration::from_millis(10)));
        cache.set("m1", &descriptor("u1"));
        assert!(cache.has("m1"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!cache.has("m1"));
        assert!(cache.get("m1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unreadable_entry_is_none() {
        let cache = SchemaCache::new();
        cache
            .write()
            .put("bad".into(), ("{not json".into(), Instant::now()));
        assert!(cache.has("bad"));
        assert!(cache.get("bad").is_none());
    }
}

//! In-process result cache for entity queries.
//!
//! Values are stored serialized so callers can cache any serde type and so
//! [`Cache::guarded_set`] can report the stored size. Eviction is
//! least-recently-used once `max_size` entries are held. Entries are never
//! invalidated when the graph changes; they live until evicted.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::CacheConfig;
use crate::error::AppError;

pub struct Cache {
    entries: Mutex<LruCache<String, Vec<u8>>>,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Result<Self, AppError> {
        let capacity = NonZeroUsize::new(config.max_size)
            .ok_or_else(|| AppError::Cache("cache max_size must be greater than zero".to_string()))?;

        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Looks up and deserializes a cached value.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        let bytes = match self.entries.lock().get(key) {
            Some(bytes) => bytes.clone(),
            None => return Ok(None),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| AppError::Cache(format!("failed to decode entry {}: {}", key, e)))
    }

    /// Stores a value, replacing any existing entry.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AppError> {
        let bytes = encode(key, value)?;
        self.entries.lock().put(key.to_string(), bytes);
        Ok(())
    }

    /// Stores a value only if the key is absent.
    ///
    /// Returns whether the value was stored and its encoded size in bytes.
    /// When another writer got there first the existing entry is kept and
    /// `false` is returned.
    pub fn guarded_set<T: Serialize>(&self, key: &str, value: &T) -> Result<(bool, usize), AppError> {
        let bytes = encode(key, value)?;
        let size = bytes.len();

        let mut entries = self.entries.lock();
        if entries.contains(key) {
            return Ok((false, size));
        }
        entries.put(key.to_string(), bytes);
        Ok((true, size))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, AppError> {
    serde_json::to_vec(value)
        .map_err(|e| AppError::Cache(format!("failed to encode entry {}: {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn cache(max_size: usize) -> Cache {
        Cache::new(CacheConfig { max_size }).unwrap()
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(matches!(
            Cache::new(CacheConfig { max_size: 0 }),
            Err(AppError::Cache(_))
        ));
    }

    #[test]
    fn test_get_and_set() {
        let cache = cache(4);
        assert_eq!(cache.get::<Vec<i64>>("missing").unwrap(), None);

        cache.set("k", &vec![1i64, 2, 3]).unwrap();
        assert_eq!(cache.get::<Vec<i64>>("k").unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_guarded_set_keeps_first_value() {
        let cache = cache(4);

        let (first, size) = cache.guarded_set("k", &"first").unwrap();
        assert!(first);
        assert_eq!(size, "\"first\"".len());

        let (second, _) = cache.guarded_set("k", &"second").unwrap();
        assert!(!second);
        assert_eq!(cache.get::<String>("k").unwrap().as_deref(), Some("first"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = cache(2);
        cache.set("a", &1).unwrap();
        cache.set("b", &2).unwrap();
        let _ = cache.get::<i32>("a").unwrap();
        cache.set("c", &3).unwrap();

        assert_eq!(cache.get::<i32>("b").unwrap(), None);
        assert_eq!(cache.get::<i32>("a").unwrap(), Some(1));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_decode_failure_is_an_error() {
        let cache = cache(2);
        cache.set("k", &"text").unwrap();
        assert!(cache.get::<i64>("k").is_err());
    }

    #[test]
    fn test_concurrent_guarded_sets_store_once() {
        let cache = Arc::new(cache(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.guarded_set("shared", &i).unwrap().0)
            })
            .collect();

        let stored = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|stored| *stored)
            .count();

        assert_eq!(stored, 1);
        assert_eq!(cache.len(), 1);
    }
}

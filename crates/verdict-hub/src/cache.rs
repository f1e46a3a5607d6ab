//! Memoization of fully-aggregated results by request fingerprint
//!
//! Entries are written only after a correlation resolves; a timed-out request
//! never leaves a cache entry behind.

use cached::{Cached, TimedCache};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Thread-safe TTL cache keyed by request fingerprint
pub struct ResultCache<T> {
    cache: Arc<RwLock<TimedCache<String, T>>>,
}

impl<T: Clone> ResultCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(TimedCache::with_lifespan(ttl))),
        }
    }

    pub async fn get(&self, fingerprint: &str) -> Option<T> {
        let mut cache = self.cache.write().await;
        cache.cache_get(fingerprint).cloned()
    }

    pub async fn insert(&self, fingerprint: String, value: T) {
        let mut cache = self.cache.write().await;
        let _ = cache.cache_set(fingerprint, value);
    }

    pub async fn invalidate(&self, fingerprint: &str) {
        let mut cache = self.cache.write().await;
        let _ = cache.cache_remove(fingerprint);
    }

    pub async fn len(&self) -> usize {
        let cache = self.cache.read().await;
        cache.cache_size()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<T> Clone for ResultCache<T> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

//! Cache storage backends.
//!
//! A backend only knows how to get, put and clear values. Fill coordination lives in
//! [`super::CacheNamespace`], so every backend gets the same single-flight behaviour.

use std::{num::NonZeroUsize, sync::RwLock};

use async_trait::async_trait;
use lru::LruCache;
use thiserror::Error;

use super::keys::CacheKey;
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache entry could not be encoded or decoded: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Storage engine behind one cache namespace.
#[async_trait]
pub trait CacheStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &CacheKey) -> Result<Option<V>, CacheError>;

    async fn put(&self, key: CacheKey, value: V) -> Result<(), CacheError>;

    /// Drop every entry. Entries never expire on their own.
    async fn clear(&self) -> Result<(), CacheError>;
}

/// In-process store. Unbounded unless a capacity is given, in which case the least
/// recently used entry is evicted.
pub struct MemoryStore<V> {
    entries: RwLock<LruCache<CacheKey, V>>,
}

impl<V> MemoryStore<V> {
    pub fn new(capacity: Option<usize>) -> Self {
        let entries = match capacity.and_then(NonZeroUsize::new) {
            Some(limit) => LruCache::new(limit),
            None => LruCache::unbounded(),
        };

        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "memory_len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<V> CacheStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &CacheKey) -> Result<Option<V>, CacheError> {
        Ok(rw_write(&self.entries, SOURCE, "memory_get")
            .get(key)
            .cloned())
    }

    async fn put(&self, key: CacheKey, value: V) -> Result<(), CacheError> {
        rw_write(&self.entries, SOURCE, "memory_put").put(key, value);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        rw_write(&self.entries, SOURCE, "memory_clear").clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip_and_clear() {
        let store = MemoryStore::<String>::unbounded();
        let key = CacheKey::new("https://example.test/");

        assert!(store.get(&key).await.expect("get").is_none());
        store
            .put(key.clone(), "<main>home</main>".to_string())
            .await
            .expect("put");
        assert_eq!(
            store.get(&key).await.expect("get").as_deref(),
            Some("<main>home</main>")
        );

        store.clear().await.expect("clear");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn bounded_memory_store_evicts_least_recent() {
        let store = MemoryStore::<u32>::new(Some(2));
        let first = CacheKey::new("/1");
        let second = CacheKey::new("/2");
        let third = CacheKey::new("/3");

        store.put(first.clone(), 1).await.expect("put");
        store.put(second.clone(), 2).await.expect("put");
        store.put(third.clone(), 3).await.expect("put");

        assert!(store.get(&first).await.expect("get").is_none());
        assert_eq!(store.get(&second).await.expect("get"), Some(2));
        assert_eq!(store.get(&third).await.expect("get"), Some(3));
    }

    #[tokio::test]
    async fn zero_capacity_is_unbounded() {
        let store = MemoryStore::<u32>::new(Some(0));
        for index in 0..64 {
            store
                .put(CacheKey::new(format!("/{index}")), index)
                .await
                .expect("put");
        }
        assert_eq!(store.len(), 64);
    }

    #[tokio::test]
    async fn memory_store_recovers_from_poisoned_lock() {
        let store = MemoryStore::<u32>::unbounded();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store.put(CacheKey::new("/"), 7).await.expect("put");
        assert_eq!(store.get(&CacheKey::new("/")).await.expect("get"), Some(7));
    }
}

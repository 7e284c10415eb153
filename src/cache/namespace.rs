use std::{future::Future, sync::Arc};

use dashmap::DashMap;
use metrics::counter;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use super::{
    keys::{CacheKey, Tier},
    store::{CacheError, CacheStore},
};

/// One cache namespace with coalesced fills.
///
/// Concurrent misses for the same key run the factory once; the other callers wait for
/// the fill and read the stored value.
pub struct CacheNamespace<V>
where
    V: Clone + Send + Sync + 'static,
{
    tier: Tier,
    store: Arc<dyn CacheStore<V>>,
    fills: DashMap<CacheKey, Arc<AsyncMutex<()>>>,
}

impl<V> CacheNamespace<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(tier: Tier, store: Arc<dyn CacheStore<V>>) -> Self {
        Self {
            tier,
            store,
            fills: DashMap::new(),
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub async fn get(&self, key: &CacheKey) -> Result<Option<V>, CacheError> {
        self.store.get(key).await
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &CacheKey, factory: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: From<CacheError>,
    {
        if let Some(value) = self.store.get(key).await? {
            self.record_hit(key);
            return Ok(value);
        }

        let gate = self
            .fills
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        let result = {
            let _guard = gate.lock().await;
            self.fill(key, factory).await
        };

        drop(gate);
        self.fills
            .remove_if(key, |_, gate| Arc::strong_count(gate) == 1);

        result
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.store.clear().await
    }

    async fn fill<F, Fut, E>(&self, key: &CacheKey, factory: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: From<CacheError>,
    {
        if let Some(value) = self.store.get(key).await? {
            self.record_hit(key);
            return Ok(value);
        }

        counter!(self.tier.miss_metric()).increment(1);
        debug!(
            target = "visitor::cache",
            tier = self.tier.as_str(),
            key = %key,
            "cache miss"
        );

        let value = factory().await?;
        self.store.put(key.clone(), value.clone()).await?;
        Ok(value)
    }

    fn record_hit(&self, key: &CacheKey) {
        counter!(self.tier.hit_metric()).increment(1);
        debug!(
            target = "visitor::cache",
            tier = self.tier.as_str(),
            key = %key,
            "cache hit"
        );
    }
}

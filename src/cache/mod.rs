//! Visit caching.
//!
//! Two independent namespaces share one key space: visit data (before rendering) and
//! rendered HTML. Entries never expire; they live until [`VisitCache::clear`] or, for
//! bounded memory stores, until evicted.

mod disk;
mod keys;
mod namespace;
mod store;

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use tracing::info;
use visitor_types::Visit;

use crate::config::{CacheDriver, CacheNamespaceSettings, CacheSettings};

pub use disk::DiskStore;
pub use keys::{CacheKey, Tier};
pub use namespace::CacheNamespace;
pub use store::{CacheError, CacheStore, MemoryStore};

/// Both cache namespaces used by the render orchestrator.
pub struct VisitCache {
    data: CacheNamespace<Visit>,
    rendered: CacheNamespace<String>,
}

impl VisitCache {
    pub fn new(
        data: Arc<dyn CacheStore<Visit>>,
        rendered: Arc<dyn CacheStore<String>>,
    ) -> Self {
        Self {
            data: CacheNamespace::new(Tier::Data, data),
            rendered: CacheNamespace::new(Tier::Rendered, rendered),
        }
    }

    /// Unbounded in-memory stores for both namespaces.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::unbounded()),
            Arc::new(MemoryStore::unbounded()),
        )
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(
            build_store(&settings.data),
            build_store(&settings.rendered),
        )
    }

    pub fn data(&self) -> &CacheNamespace<Visit> {
        &self.data
    }

    pub fn rendered(&self) -> &CacheNamespace<String> {
        &self.rendered
    }

    /// Drop every entry in both namespaces.
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.data.clear().await?;
        self.rendered.clear().await?;
        info!(target = "visitor::cache", "visit caches cleared");
        Ok(())
    }
}

fn build_store<V>(settings: &CacheNamespaceSettings) -> Arc<dyn CacheStore<V>>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    match settings.driver {
        CacheDriver::Memory => Arc::new(MemoryStore::new(settings.capacity)),
        CacheDriver::Disk => Arc::new(DiskStore::new(settings.directory.clone())),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn clear_empties_both_namespaces() {
        let cache = VisitCache::in_memory();
        let key = CacheKey::new("https://example.test/");

        cache
            .data()
            .get_or_compute(&key, || async { Ok::<_, CacheError>(Visit::default()) })
            .await
            .expect("data fill");
        cache
            .rendered()
            .get_or_compute(&key, || async { Ok::<_, CacheError>("<p/>".to_string()) })
            .await
            .expect("rendered fill");

        cache.clear().await.expect("clear");

        assert!(cache.data().get(&key).await.expect("get").is_none());
        assert!(cache.rendered().get(&key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn settings_select_disk_driver() {
        let dir = TempDir::new().expect("tempdir");
        let directory: PathBuf = dir.path().join("rendered");
        let settings = CacheSettings {
            data: CacheNamespaceSettings {
                driver: CacheDriver::Memory,
                capacity: Some(4),
                directory: dir.path().join("data"),
            },
            rendered: CacheNamespaceSettings {
                driver: CacheDriver::Disk,
                capacity: None,
                directory: directory.clone(),
            },
        };

        let cache = VisitCache::from_settings(&settings);
        let key = CacheKey::new("/");
        cache
            .rendered()
            .get_or_compute(&key, || async { Ok::<_, CacheError>("<html/>".to_string()) })
            .await
            .expect("fill");

        let on_disk = directory.join(format!("{}.json", key.digest()));
        assert!(on_disk.exists());
        assert!(!dir.path().join("data").exists());
    }
}

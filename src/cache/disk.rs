//! File-backed cache store.
//!
//! One JSON file per entry, named by the key digest. Suited to large visit payloads that
//! should survive restarts; clearing the directory invalidates everything.

use std::{io::ErrorKind, marker::PhantomData, path::PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::fs;
use tracing::debug;

use super::{
    keys::CacheKey,
    store::{CacheError, CacheStore},
};

pub struct DiskStore<V> {
    directory: PathBuf,
    _marker: PhantomData<fn() -> V>,
}

impl<V> DiskStore<V> {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            _marker: PhantomData,
        }
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.directory.join(format!("{}.json", key.digest()))
    }
}

#[async_trait]
impl<V> CacheStore<V> for DiskStore<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &CacheKey) -> Result<Option<V>, CacheError> {
        let path = self.entry_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: CacheKey, value: V) -> Result<(), CacheError> {
        fs::create_dir_all(&self.directory).await?;

        let path = self.entry_path(&key);
        let staging = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let bytes = serde_json::to_vec(&value)?;

        fs::write(&staging, bytes).await?;
        if let Err(err) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }

        debug!(
            target = "visitor::cache::disk",
            key = %key,
            path = %path.display(),
            "stored cache entry"
        );
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_dir_all(&self.directory).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

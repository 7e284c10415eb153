use std::{io::ErrorKind, path::Path};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Opaque asset version: content hash of the build manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetVersion(String);

impl AssetVersion {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn from_manifest_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Hash the manifest at `path`. A missing or unreadable manifest yields an empty version.
    pub async fn from_manifest(path: &Path) -> Self {
        match tokio::fs::read(path).await {
            Ok(bytes) => Self::from_manifest_bytes(&bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(
                    target = "visitor::version",
                    path = %path.display(),
                    "asset manifest not found; version left empty"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    target = "visitor::version",
                    path = %path.display(),
                    error = %err,
                    "asset manifest unreadable; version left empty"
                );
                Self::default()
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

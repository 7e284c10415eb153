//! Cache key definitions.

use std::fmt;

use sha2::{Digest, Sha256};

/// Addresses one entry in both cache namespaces.
///
/// Defaults to the full request URL; calling code may override it to share entries
/// across URLs (for example, ignoring tracking query parameters).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable, filesystem-safe digest of the key.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// The two independent cache namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Visit data before HTML rendering.
    Data,
    /// Rendered HTML.
    Rendered,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Data => "data",
            Tier::Rendered => "rendered",
        }
    }

    pub(crate) fn hit_metric(self) -> &'static str {
        match self {
            Tier::Data => "visitor_cache_data_hit_total",
            Tier::Rendered => "visitor_cache_rendered_hit_total",
        }
    }

    pub(crate) fn miss_metric(self) -> &'static str {
        match self {
            Tier::Data => "visitor_cache_data_miss_total",
            Tier::Rendered => "visitor_cache_rendered_miss_total",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_and_hex() {
        let key = CacheKey::new("https://example.test/posts/5?page=2");
        let digest = key.digest();
        assert_eq!(digest, key.clone().digest());
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_urls_produce_different_digests() {
        let first = CacheKey::new("https://example.test/?page=1");
        let second = CacheKey::new("https://example.test/?page=2");
        assert_ne!(first.digest(), second.digest());
    }
}

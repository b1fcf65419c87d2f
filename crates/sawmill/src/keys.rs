//! Blob-store key naming.
//!
//! The store adapter is namespace-oblivious; every caller goes through a
//! `Keyspace` so the cache layout stays in one place:
//! `<prefix>/cas/<hash>` for content, `<prefix>/ac/<hash>` for cached
//! action results.

/// Composes namespaced blob-store keys under a configured prefix.
#[derive(Debug, Clone)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Key for a content blob.
    pub fn cas(&self, hash: &str) -> String {
        format!("{}/cas/{}", self.prefix, hash)
    }

    /// Key for a cached action result.
    pub fn ac(&self, hash: &str) -> String {
        format!("{}/ac/{}", self.prefix, hash)
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_KEY_PREFIX)
    }
}

//! In-memory metadata cache for tests and ephemeral runs.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheEntry, MetadataStore, Result};

/// [`MetadataStore`] kept in a concurrent map for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryMetadataCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryMetadataCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataCache {
    async fn get(&self, url: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.get(url).map(|entry| entry.value().clone()))
    }

    async fn set(&self, url: &str, entry: &CacheEntry) -> Result<()> {
        self.entries.insert(url.to_string(), entry.clone());
        Ok(())
    }

    async fn remove(&self, url: &str) -> Result<()> {
        self.entries.remove(url);
        Ok(())
    }

    async fn remove_all(&self) -> Result<u64> {
        let removed = self.entries.len();
        self.entries.clear();
        Ok(removed as u64)
    }
}

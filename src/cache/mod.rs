//! Metadata cache mapping URLs to downloaded files and their validators.
//!
//! The cache records, per URL, which file in the content directory holds the
//! last downloaded payload together with the `Last-Modified` and `ETag`
//! values the server sent with it. Those validators drive the conditional
//! request issued by the next fetch.
//!
//! # Overview
//!
//! - [`CacheEntry`] - The value stored per URL
//! - [`CacheLookup`] - Result of resolving a URL against the cache and disk
//! - [`MetadataStore`] - Storage contract (async, object safe)
//! - [`SqliteMetadataCache`] - Durable store backed by [`Database`](crate::Database)
//! - [`MemoryMetadataCache`] - Process-lifetime store
//!
//! Entries never expire. They are removed explicitly (`remove`, `remove_all`)
//! or by [`lookup`] when the file they point at is gone.

mod error;
mod memory;
mod sqlite;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use error::{CacheDbErrorKind, CacheError};
pub use memory::MemoryMetadataCache;
pub use sqlite::SqliteMetadataCache;

/// Result type for metadata cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Cached metadata for one URL.
///
/// The URL itself is the storage key and is passed alongside the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// File name (not path) inside the content directory.
    pub file_name: String,
    /// `Last-Modified` response header of the cached download.
    pub last_modified: Option<String>,
    /// `ETag` response header of the cached download.
    pub etag: Option<String>,
}

impl CacheEntry {
    /// Creates an entry for a file with optional validators.
    #[must_use]
    pub fn new(
        file_name: impl Into<String>,
        last_modified: Option<String>,
        etag: Option<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            last_modified,
            etag,
        }
    }

    /// Returns the absolute path of the cached file under `content_dir`.
    #[must_use]
    pub fn path_in(&self, content_dir: &Path) -> PathBuf {
        content_dir.join(&self.file_name)
    }

    /// Returns true when at least one validator is known.
    #[must_use]
    pub fn has_validators(&self) -> bool {
        self.last_modified.is_some() || self.etag.is_some()
    }
}

/// Outcome of resolving a URL against the metadata cache and the content directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// No usable cached copy.
    Miss,
    /// A cached entry whose file exists on disk.
    Hit {
        /// The stored metadata.
        entry: CacheEntry,
        /// Absolute path of the cached file.
        path: PathBuf,
    },
}

impl CacheLookup {
    /// Returns the cached file path for a hit.
    #[must_use]
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            Self::Miss => None,
            Self::Hit { path, .. } => Some(path),
        }
    }

    /// Returns the stored entry for a hit.
    #[must_use]
    pub fn entry(&self) -> Option<&CacheEntry> {
        match self {
            Self::Miss => None,
            Self::Hit { entry, .. } => Some(entry),
        }
    }

    /// Returns true for [`CacheLookup::Hit`].
    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }
}

/// Storage contract for URL metadata.
///
/// Implementations must be safe to share between tasks, and a completed
/// [`set`](Self::set) must be observed by the next [`get`](Self::get) for
/// the same URL.
#[async_trait]
pub trait MetadataStore: Send + Sync + std::fmt::Debug {
    /// Returns the entry stored for `url`.
    async fn get(&self, url: &str) -> Result<Option<CacheEntry>>;

    /// Stores `entry` for `url`, replacing any previous entry.
    async fn set(&self, url: &str, entry: &CacheEntry) -> Result<()>;

    /// Removes the entry for `url`. Removing an absent entry is not an error.
    async fn remove(&self, url: &str) -> Result<()>;

    /// Removes every entry and returns how many were removed.
    ///
    /// The returned future resolving is the completion signal of the clear.
    async fn remove_all(&self) -> Result<u64>;
}

/// Resolves `url` into a [`CacheLookup`], verifying the cached file exists.
///
/// An entry whose file has disappeared is removed and reported as a miss.
/// Store read failures degrade to a miss so the caller falls back to an
/// unconditional download.
pub async fn lookup(store: &dyn MetadataStore, content_dir: &Path, url: &str) -> CacheLookup {
    let entry = match store.get(url).await {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            debug!(url = %url, "cache miss");
            return CacheLookup::Miss;
        }
        Err(error) => {
            warn!(url = %url, error = %error, "metadata cache read failed; treating as miss");
            return CacheLookup::Miss;
        }
    };

    let path = entry.path_in(content_dir);
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        debug!(url = %url, path = %path.display(), "cache hit");
        return CacheLookup::Hit { entry, path };
    }

    debug!(
        url = %url,
        path = %path.display(),
        "cached file missing; dropping stale entry"
    );
    if let Err(error) = store.remove(url).await {
        warn!(url = %url, error = %error, "failed to drop stale cache entry");
    }
    CacheLookup::Miss
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const URL: &str = "https://example.com/files/report.pdf";

    #[test]
    fn test_cache_entry_path_in_joins_file_name() {
        let entry = CacheEntry::new("abc-report.pdf", None, None);
        assert_eq!(
            entry.path_in(Path::new("/var/cache/app")),
            PathBuf::from("/var/cache/app/abc-report.pdf")
        );
    }

    #[test]
    fn test_cache_entry_has_validators() {
        assert!(!CacheEntry::new("a", None, None).has_validators());
        assert!(CacheEntry::new("a", Some("lm".into()), None).has_validators());
        assert!(CacheEntry::new("a", None, Some("\"e\"".into())).has_validators());
    }

    #[test]
    fn test_cache_entry_serde_field_names() {
        let entry = CacheEntry::new("f.bin", Some("Wed, 21 Oct 2015 07:28:00 GMT".into()), None);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["file_name"], "f.bin");
        assert_eq!(json["last_modified"], "Wed, 21 Oct 2015 07:28:00 GMT");
        assert!(json["etag"].is_null());
    }

    #[tokio::test]
    async fn test_lookup_miss_when_no_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = MemoryMetadataCache::new();

        let result = lookup(&store, temp_dir.path(), URL).await;
        assert_eq!(result, CacheLookup::Miss);
        assert!(result.file_path().is_none());
    }

    #[tokio::test]
    async fn test_lookup_hit_when_file_exists() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("abc-report.pdf"), b"cached").unwrap();
        let store = MemoryMetadataCache::new();
        let entry = CacheEntry::new("abc-report.pdf", None, Some("\"v1\"".into()));
        store.set(URL, &entry).await.unwrap();

        let result = lookup(&store, temp_dir.path(), URL).await;
        assert!(result.is_hit());
        assert_eq!(result.entry(), Some(&entry));
        assert_eq!(
            result.file_path(),
            Some(temp_dir.path().join("abc-report.pdf").as_path())
        );
    }

    #[tokio::test]
    async fn test_lookup_self_heals_when_file_missing() {
        let temp_dir = TempDir::new().unwrap();
        let store = MemoryMetadataCache::new();
        store
            .set(URL, &CacheEntry::new("gone.pdf", None, Some("\"v1\"".into())))
            .await
            .unwrap();

        let result = lookup(&store, temp_dir.path(), URL).await;
        assert_eq!(result, CacheLookup::Miss);
        assert!(
            store.get(URL).await.unwrap().is_none(),
            "stale entry should be removed"
        );
    }
}

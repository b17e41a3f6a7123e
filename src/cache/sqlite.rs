//! Durable metadata cache stored in the `cache_entries` SQLite table.

use async_trait::async_trait;
use sqlx::Row;
use tracing::instrument;

use super::{CacheEntry, MetadataStore, Result};
use crate::db::Database;

/// SQLite-backed [`MetadataStore`].
///
/// Every write is awaited to completion before returning, so a subsequent
/// `get` on any pooled connection observes it.
#[derive(Debug, Clone)]
pub struct SqliteMetadataCache {
    db: Database,
}

impl SqliteMetadataCache {
    /// Creates a cache over an already migrated database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the number of stored entries.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`](super::CacheError::Database) if the query fails.
    pub async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(self.db.pool())
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Returns true when no entries are stored.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`](super::CacheError::Database) if the query fails.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataCache {
    #[instrument(level = "debug", skip(self))]
    async fn get(&self, url: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(
            "SELECT file_name, last_modified, etag FROM cache_entries WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| CacheEntry {
            file_name: row.get("file_name"),
            last_modified: row.get("last_modified"),
            etag: row.get("etag"),
        }))
    }

    #[instrument(level = "debug", skip(self, entry), fields(file_name = %entry.file_name))]
    async fn set(&self, url: &str, entry: &CacheEntry) -> Result<()> {
        sqlx::query(
            r"INSERT INTO cache_entries (url, file_name, last_modified, etag, updated_at)
              VALUES (?, ?, ?, ?, datetime('now'))
              ON CONFLICT(url) DO UPDATE SET
                  file_name = excluded.file_name,
                  last_modified = excluded.last_modified,
                  etag = excluded.etag,
                  updated_at = excluded.updated_at",
        )
        .bind(url)
        .bind(&entry.file_name)
        .bind(entry.last_modified.as_deref())
        .bind(entry.etag.as_deref())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn remove(&self, url: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_entries WHERE url = ?")
            .bind(url)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn remove_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

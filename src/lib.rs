//! Fetchcache Core Library
//!
//! This library provides a conditional-download cache: a URL is fetched over
//! HTTP only when the server reports that the cached copy is stale (via
//! `ETag` / `Last-Modified` validators), otherwise the previously downloaded
//! file is returned.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`cache`] - Metadata cache mapping URLs to cached files and validators
//! - [`db`] - Database connection and schema management
//! - [`download`] - Conditional fetcher, HTTP client and download handles
//! - [`coordinator`] - Entry point tracking active downloads per URL
//!
//! # Example
//!
//! ```no_run
//! use fetchcache_core::{CoordinatorOptions, DownloadCoordinator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = DownloadCoordinator::open(CoordinatorOptions::default()).await?;
//! let outcome = coordinator.fetch_and_wait("https://example.com/paper.pdf").await;
//! if let Some(path) = outcome.file_path {
//!     println!("cached at {}", path.display());
//! }
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod coordinator;
pub mod db;
pub mod download;
#[cfg(test)]
pub mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use cache::{
    CacheEntry, CacheError, CacheLookup, MemoryMetadataCache, MetadataStore,
    SqliteMetadataCache,
};
pub use coordinator::{CoordinatorError, CoordinatorOptions, DownloadCoordinator};
pub use db::{Database, DatabaseOptions, DbError};
pub use download::{
    Completion, ConditionalFetcher, DownloadHandle, DownloadOutcome, FetchError, FetchErrorKind,
    FetchOutcome, Freshness, HttpClient, TaskState,
};

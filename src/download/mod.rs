//! Conditional downloads into the content directory.
//!
//! This module turns URLs into cached files, re-downloading only when the
//! server reports that the cached copy is stale.
//!
//! # Features
//!
//! - Conditional GET from cached `ETag` / `Last-Modified` validators
//! - Streaming bodies to `.incoming/` and moving them into place
//! - Handles with deferred start, suspend/resume and cancellation
//! - Completions delivered serially on one dispatcher task
//! - Structured error types with full context
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fetchcache_core::{ConditionalFetcher, HttpClient, MemoryMetadataCache};
//!
//! # async fn example() {
//! let fetcher = ConditionalFetcher::new(
//!     HttpClient::new(),
//!     Arc::new(MemoryMetadataCache::new()),
//!     "./cache".into(),
//! );
//! let outcome = fetcher.fetch_unattended("https://example.com/paper.pdf").await;
//! println!("success: {}, file: {:?}", outcome.success, outcome.file_path);
//! # }
//! ```

mod client;
pub mod constants;
pub mod control;
pub(crate) mod dispatch;
mod error;
mod fetcher;
pub mod filename;
pub(crate) mod handle;
mod validators;

pub use client::{ConditionalResponse, HttpClient};
pub use control::{ControlReceiver, Signal, TransferControl};
pub use error::{FetchError, FetchErrorKind};
pub use fetcher::{ConditionalFetcher, FetchOutcome, Freshness};
pub use filename::{last_path_component, unique_cache_file_name};
pub use handle::{Completion, DownloadHandle, DownloadOutcome, TaskState};
pub use validators::Validators;

// Note: no module-local Result alias; functions spell out
// `Result<T, FetchError>`.

//! Entry point owning the cache, the HTTP client and the active downloads.
//!
//! A [`DownloadCoordinator`] hands out [`DownloadHandle`]s and keeps a
//! `url -> handle` association for every download whose completion has not
//! run yet. Coordinators are plain values; create as many isolated ones as
//! needed (one per content directory, one per test).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument};

use crate::cache::{CacheError, MetadataStore, SqliteMetadataCache};
use crate::db::{Database, DatabaseOptions, DbError};
use crate::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::download::dispatch::CompletionDispatcher;
use crate::download::handle::HandleContext;
use crate::download::{
    ConditionalFetcher, DownloadHandle, DownloadOutcome, FetchError, Freshness,
    HttpClient,
};

/// Directory name used under the user cache directory.
pub const APP_DIR_NAME: &str = "fetchcache";

/// Database file name used when no explicit database path is configured.
pub const DEFAULT_DATABASE_FILE: &str = "metadata.db";

/// Errors raised while constructing a coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The metadata database could not be opened or migrated.
    #[error(transparent)]
    Database(#[from] DbError),

    /// The content directory could not be created.
    #[error("cannot prepare content directory {path}: {source}")]
    Io {
        /// The directory that failed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Constructed outside of a Tokio runtime.
    #[error("no Tokio runtime available; create the coordinator from within a runtime")]
    NoRuntime,
}

/// Construction options for [`DownloadCoordinator::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Directory holding downloaded payloads.
    pub content_dir: PathBuf,
    /// Metadata database settings.
    pub database: DatabaseOptions,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Idle read timeout in seconds.
    pub read_timeout_secs: u64,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            content_dir: default_content_dir(),
            database: DatabaseOptions::default(),
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

impl CoordinatorOptions {
    /// Options rooted at `content_dir`, everything else default.
    #[must_use]
    pub fn with_content_dir(content_dir: impl Into<PathBuf>) -> Self {
        Self {
            content_dir: content_dir.into(),
            ..Self::default()
        }
    }

    /// Database file path: explicit, or `metadata.db` in the content directory.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| self.content_dir.join(DEFAULT_DATABASE_FILE))
    }
}

/// Default content directory: `$XDG_CACHE_HOME/fetchcache`, else
/// `$HOME/.cache/fetchcache`, else a directory under the system temp dir.
#[must_use]
pub fn default_content_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg).join(APP_DIR_NAME);
    }
    if let Some(home) = std::env::var_os("HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join(".cache").join(APP_DIR_NAME);
    }
    std::env::temp_dir().join(APP_DIR_NAME)
}

/// Handle registered for a URL, with the attempt that registered it.
#[derive(Debug, Clone)]
struct ActiveEntry {
    handle: DownloadHandle,
    generation: u64,
}

/// `url -> handle` association for downloads whose completion has not run.
#[derive(Debug, Default)]
pub(crate) struct ActiveDownloads {
    handles: DashMap<String, ActiveEntry>,
}

impl ActiveDownloads {
    /// Associates attempt `generation` of `handle` with its URL, replacing
    /// any previous registration.
    pub(crate) fn register(&self, handle: DownloadHandle, generation: u64) {
        let url = handle.url().to_string();
        let id = handle.id();
        if let Some(previous) = self.handles.insert(url, ActiveEntry { handle, generation })
            && previous.handle.id() != id
        {
            debug!(
                url = %previous.handle.url(),
                handle_id = previous.handle.id(),
                "active handle replaced"
            );
        }
    }

    /// Drops the association for `url` if it still belongs to attempt
    /// `generation` of handle `id`.
    pub(crate) fn release(&self, url: &str, id: u64, generation: u64) -> bool {
        self.handles
            .remove_if(url, |_, entry| {
                entry.handle.id() == id && entry.generation == generation
            })
            .is_some()
    }

    fn get(&self, url: &str) -> Option<DownloadHandle> {
        self.handles.get(url).map(|entry| entry.value().handle.clone())
    }

    fn len(&self) -> usize {
        self.handles.len()
    }

    /// Snapshot of the registered handles, taken without holding shard locks afterwards.
    fn snapshot(&self) -> Vec<DownloadHandle> {
        self.handles
            .iter()
            .map(|entry| entry.value().handle.clone())
            .collect()
    }
}

/// Creates and tracks conditional downloads.
///
/// Dropping the coordinator cancels every active download.
#[derive(Debug)]
pub struct DownloadCoordinator {
    fetcher: Arc<ConditionalFetcher>,
    active: Arc<ActiveDownloads>,
    dispatcher: CompletionDispatcher,
    runtime: Handle,
}

impl DownloadCoordinator {
    /// Opens the SQLite metadata store and the content directory described by `options`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError`] if the content directory cannot be
    /// created, the database cannot be opened, or no runtime is running.
    #[instrument(skip(options), fields(content_dir = %options.content_dir.display()))]
    pub async fn open(options: CoordinatorOptions) -> Result<Self, CoordinatorError> {
        tokio::fs::create_dir_all(&options.content_dir)
            .await
            .map_err(|source| CoordinatorError::Io {
                path: options.content_dir.clone(),
                source,
            })?;

        let db_path = options.database_path();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CoordinatorError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let db = Database::new_with_options(&db_path, &options.database).await?;
        let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataCache::new(db));

        let client = HttpClient::try_new_with_timeouts(
            options.connect_timeout_secs,
            options.read_timeout_secs,
        )?;

        info!(database = %db_path.display(), "download coordinator ready");
        Self::with_store(options.content_dir, client, store)
    }

    /// Builds a coordinator over an existing store and client.
    ///
    /// The content directory is created on first download.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NoRuntime`] outside of a Tokio runtime.
    pub fn with_store(
        content_dir: impl Into<PathBuf>,
        client: HttpClient,
        store: Arc<dyn MetadataStore>,
    ) -> Result<Self, CoordinatorError> {
        let runtime = Handle::try_current().map_err(|_| CoordinatorError::NoRuntime)?;
        let fetcher = ConditionalFetcher::new(client, store, content_dir.into());
        Ok(Self {
            fetcher: Arc::new(fetcher),
            active: Arc::new(ActiveDownloads::default()),
            dispatcher: CompletionDispatcher::spawn(&runtime),
            runtime,
        })
    }

    /// Creates a handle for `url` and starts it.
    ///
    /// With `resumes_immediately` false the transfer waits for
    /// [`DownloadHandle::resume`]. `completion` runs once per attempt; right
    /// after it returns (or panics) the URL is released from the active set,
    /// unless the handle was started again in the meantime.
    ///
    /// A second call for an active URL does not cancel the first download;
    /// the newer handle takes over the URL's slot in the active set.
    pub fn fetch<F>(&self, url: &str, resumes_immediately: bool, completion: F) -> DownloadHandle
    where
        F: Fn(DownloadOutcome) + Send + Sync + 'static,
    {
        let handle = DownloadHandle::new(url, resumes_immediately, self.handle_context());
        handle.download(Arc::new(completion));
        handle
    }

    /// [`fetch`](Self::fetch) with the transfer started immediately.
    pub fn download<F>(&self, url: &str, completion: F) -> DownloadHandle
    where
        F: Fn(DownloadOutcome) + Send + Sync + 'static,
    {
        self.fetch(url, true, completion)
    }

    /// Fetches `url` and waits for its outcome.
    pub async fn fetch_and_wait(&self, url: &str) -> DownloadOutcome {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.fetch(url, true, move |outcome| {
            if let Some(tx) = tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = tx.send(outcome);
            }
        });

        rx.await.unwrap_or_else(|_| DownloadOutcome {
            url: url.to_string(),
            file_path: None,
            success: false,
            error: Some(FetchError::cancelled(url)),
        })
    }

    /// Returns the active handle for `url`.
    #[must_use]
    pub fn active_handle(&self, url: &str) -> Option<DownloadHandle> {
        self.active.get(url)
    }

    /// Number of URLs with a download whose completion has not run.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Cancels every active download. Completions still fire.
    pub fn cancel_all(&self) {
        let handles = self.active.snapshot();
        if handles.is_empty() {
            return;
        }
        info!(count = handles.len(), "cancelling active downloads");
        for handle in handles {
            handle.cancel();
        }
    }

    /// Returns the cached file for `url`, if one exists on disk.
    pub async fn cached_file_path(&self, url: &str) -> Option<PathBuf> {
        self.fetcher.cached_file_path(url).await
    }

    /// Probes whether the cached copy of `url` is current.
    ///
    /// # Errors
    ///
    /// Returns the transport or status error of the HEAD request.
    pub async fn check_freshness(&self, url: &str) -> Result<Freshness, FetchError> {
        self.fetcher.check_freshness(url).await
    }

    /// Removes every metadata entry and returns how many were removed.
    ///
    /// Payload files are left in place; the next fetch of any URL downloads
    /// unconditionally into a fresh file name.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the store cannot be cleared.
    #[instrument(skip(self))]
    pub async fn clear_cache(&self) -> Result<u64, CacheError> {
        let removed = self.fetcher.store().remove_all().await?;
        info!(removed, "metadata cache cleared");
        Ok(removed)
    }

    /// Directory holding downloaded payloads.
    #[must_use]
    pub fn content_dir(&self) -> &Path {
        self.fetcher.content_dir()
    }

    /// The metadata store backing this coordinator.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        self.fetcher.store()
    }

    fn handle_context(&self) -> HandleContext {
        HandleContext {
            fetcher: Arc::clone(&self.fetcher),
            dispatcher: self.dispatcher.clone(),
            runtime: self.runtime.clone(),
            registry: Arc::downgrade(&self.active),
        }
    }
}

impl Drop for DownloadCoordinator {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

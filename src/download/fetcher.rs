//! Conditional fetch of one URL into the content directory.
//!
//! A fetch turns a [`CacheLookup`] into a GET carrying the cached validators,
//! then acts on the answer: 304 keeps the cached file, 200 streams the body
//! into `.incoming/`, moves it over the cached file and records the new
//! validators, anything else fails without touching the cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::client::{ConditionalResponse, HttpClient, stream_to_file};
use super::constants::INCOMING_DIR;
use super::control::ControlReceiver;
use super::error::FetchError;
use super::filename::{incoming_file_path, unique_cache_file_name};
use super::validators::Validators;
use crate::cache::{self, CacheEntry, CacheLookup, MetadataStore};

/// Result of one conditional fetch attempt.
#[derive(Debug)]
pub struct FetchOutcome {
    /// File holding the payload: the new file on success, the prior cached
    /// file (if any) on most failures.
    pub file_path: Option<PathBuf>,
    /// Whether `file_path` holds a current copy of the resource.
    pub success: bool,
    /// Why the attempt failed.
    pub error: Option<FetchError>,
}

impl FetchOutcome {
    fn succeeded(file_path: PathBuf) -> Self {
        Self {
            file_path: Some(file_path),
            success: true,
            error: None,
        }
    }

    fn failed(file_path: Option<PathBuf>, error: FetchError) -> Self {
        Self {
            file_path,
            success: false,
            error: Some(error),
        }
    }
}

/// Answer of a HEAD freshness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Nothing cached for the URL; no request was made.
    Uncached,
    /// The server answered 304 to the cached validators.
    Fresh,
    /// The server answered 200: a fetch would download a new copy.
    Stale,
}

/// Performs conditional fetches against a metadata store and content directory.
#[derive(Debug, Clone)]
pub struct ConditionalFetcher {
    client: HttpClient,
    store: Arc<dyn MetadataStore>,
    content_dir: PathBuf,
}

impl ConditionalFetcher {
    /// Creates a fetcher writing payloads under `content_dir`.
    #[must_use]
    pub fn new(client: HttpClient, store: Arc<dyn MetadataStore>, content_dir: PathBuf) -> Self {
        Self {
            client,
            store,
            content_dir,
        }
    }

    /// Resolves `url` against the metadata store and the content directory.
    pub async fn lookup(&self, url: &str) -> CacheLookup {
        cache::lookup(self.store.as_ref(), &self.content_dir, url).await
    }

    /// Returns the cached file for `url`, if one exists on disk.
    pub async fn cached_file_path(&self, url: &str) -> Option<PathBuf> {
        self.lookup(url).await.file_path().map(Path::to_path_buf)
    }

    /// Runs one attempt for `url` with the validators of `lookup`.
    ///
    /// Never fails outright: every error is carried in the outcome.
    #[instrument(skip(self, lookup, control), fields(url = %url, cached = lookup.is_hit()))]
    pub async fn fetch(
        &self,
        url: &str,
        lookup: &CacheLookup,
        control: &mut ControlReceiver,
    ) -> FetchOutcome {
        let prior = lookup.file_path().map(Path::to_path_buf);
        let validators = Validators::from_lookup(lookup);

        let response = match self.client.get_conditional(url, &validators, control).await {
            Ok(response) => response,
            Err(error) => {
                log_failure(&error);
                return FetchOutcome::failed(prior, error);
            }
        };

        match (response, prior) {
            (ConditionalResponse::NotModified, Some(path)) => {
                debug!(path = %path.display(), "not modified; serving cached copy");
                FetchOutcome::succeeded(path)
            }
            (ConditionalResponse::NotModified, None) => {
                warn!("304 to an unconditional request");
                FetchOutcome::failed(None, FetchError::http_status(url, 304))
            }
            (ConditionalResponse::Modified(response), prior) => {
                self.store_response(url, lookup, prior, response, control)
                    .await
            }
        }
    }

    /// Looks up and fetches `url` without external control.
    pub async fn fetch_unattended(&self, url: &str) -> FetchOutcome {
        let lookup = self.lookup(url).await;
        let mut control = ControlReceiver::running();
        self.fetch(url, &lookup, &mut control).await
    }

    /// Asks the server whether the cached copy of `url` is current, via HEAD.
    ///
    /// Transfers no body and never modifies the cache.
    ///
    /// # Errors
    ///
    /// Returns the transport or status error of the probe.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn check_freshness(&self, url: &str) -> Result<Freshness, FetchError> {
        let lookup = self.lookup(url).await;
        if !lookup.is_hit() {
            return Ok(Freshness::Uncached);
        }

        let validators = Validators::from_lookup(&lookup);
        match self.client.head_conditional(url, &validators).await? {
            ConditionalResponse::NotModified => Ok(Freshness::Fresh),
            ConditionalResponse::Modified(_) => Ok(Freshness::Stale),
        }
    }

    /// Returns the metadata store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Returns the content directory.
    #[must_use]
    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    async fn store_response(
        &self,
        url: &str,
        lookup: &CacheLookup,
        prior: Option<PathBuf>,
        response: reqwest::Response,
        control: &mut ControlReceiver,
    ) -> FetchOutcome {
        let validators = Validators::from_headers(response.headers());

        let incoming_dir = self.content_dir.join(INCOMING_DIR);
        if let Err(error) = tokio::fs::create_dir_all(&incoming_dir).await {
            let error = FetchError::io(incoming_dir, error);
            log_failure(&error);
            return FetchOutcome::failed(prior, error);
        }

        let temp_path = incoming_file_path(&self.content_dir);
        let streamed = stream_to_file(response, url, &temp_path, control).await;
        let bytes = match streamed {
            Ok(bytes) => bytes,
            Err(error) => {
                remove_temp_file(&temp_path).await;
                log_failure(&error);
                return FetchOutcome::failed(prior, error);
            }
        };

        // Last point at which a hold or cancel keeps the cache untouched.
        if control.ready().await.is_err() {
            remove_temp_file(&temp_path).await;
            let error = FetchError::cancelled(url);
            log_failure(&error);
            return FetchOutcome::failed(prior, error);
        }

        let file_name = lookup
            .entry()
            .map_or_else(|| unique_cache_file_name(url), |entry| entry.file_name.clone());
        let destination = self.content_dir.join(&file_name);

        if let Err(error) = place_file(&temp_path, &destination).await {
            remove_temp_file(&temp_path).await;
            log_failure(&error);
            return FetchOutcome::failed(Some(destination), error);
        }

        let entry = CacheEntry::new(file_name, validators.last_modified, validators.etag);
        if let Err(error) = self.store.set(url, &entry).await {
            warn!(
                error = %error,
                path = %destination.display(),
                "payload placed but cache entry not recorded"
            );
        }

        info!(path = %destination.display(), bytes, "download placed");
        FetchOutcome::succeeded(destination)
    }
}

/// Replaces `destination` with `temp_path`.
async fn place_file(temp_path: &Path, destination: &Path) -> Result<(), FetchError> {
    match tokio::fs::remove_file(destination).await {
        Ok(()) => debug!(path = %destination.display(), "removed previous copy"),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => return Err(FetchError::io(destination, error)),
    }

    tokio::fs::rename(temp_path, destination)
        .await
        .map_err(|error| FetchError::io(destination, error))
}

async fn remove_temp_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => {
            warn!(path = %path.display(), error = %error, "failed to remove partial download");
        }
    }
}

fn log_failure(error: &FetchError) {
    if error.is_cancelled() {
        debug!("attempt cancelled");
    } else {
        warn!(error = %error, kind = %error.kind(), "fetch failed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, ResponseTemplate};

    use super::*;
    use crate::cache::{CacheError, MemoryMetadataCache};
    use crate::download::control::{Signal, TransferControl};
    use crate::download::error::FetchErrorKind;
    use crate::test_support::socket_guard::mock_server;

    fn fetcher_with(store: Arc<dyn MetadataStore>, dir: &TempDir) -> ConditionalFetcher {
        ConditionalFetcher::new(HttpClient::new(), store, dir.path().to_path_buf())
    }

    fn incoming_is_empty(dir: &TempDir) -> bool {
        std::fs::read_dir(dir.path().join(INCOMING_DIR))
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    #[tokio::test]
    async fn test_fetch_200_places_file_and_records_entry() {
        let Some(mock_server) = mock_server().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/docs/lesson2.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"abc\"")
                    .insert_header("Last-Modified", "Fri, 16 May 2014 04:42:17 GMT")
                    .set_body_bytes(b"%PDF-1.4 body"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataCache::new());
        let fetcher = fetcher_with(Arc::clone(&store), &dir);
        let url = format!("{}/docs/lesson2.pdf", mock_server.uri());

        let outcome = fetcher.fetch_unattended(&url).await;
        assert!(outcome.success, "unexpected error: {:?}", outcome.error);
        let file_path = outcome.file_path.unwrap();
        assert_eq!(std::fs::read(&file_path).unwrap(), b"%PDF-1.4 body");
        assert!(
            file_path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .ends_with("-lesson2.pdf")
        );

        let entry = store.get(&url).await.unwrap().unwrap();
        assert_eq!(entry.path_in(dir.path()), file_path);
        assert_eq!(entry.etag.as_deref(), Some("\"abc\""));
        assert_eq!(
            entry.last_modified.as_deref(),
            Some("Fri, 16 May 2014 04:42:17 GMT")
        );
        assert!(incoming_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_fetch_304_returns_prior_path_without_writing() {
        let Some(mock_server) = mock_server().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/a.txt"))
            .and(header("If-None-Match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cached-a.txt"), b"old").unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataCache::new());
        let url = format!("{}/a.txt", mock_server.uri());
        let entry = CacheEntry::new("cached-a.txt", None, Some("\"v1\"".into()));
        store.set(&url, &entry).await.unwrap();
        let fetcher = fetcher_with(Arc::clone(&store), &dir);

        let outcome = fetcher.fetch_unattended(&url).await;
        assert!(outcome.success);
        assert_eq!(outcome.file_path, Some(dir.path().join("cached-a.txt")));
        assert_eq!(std::fs::read(dir.path().join("cached-a.txt")).unwrap(), b"old");
        assert_eq!(store.get(&url).await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_fetch_200_for_cached_url_reuses_file_name() {
        let Some(mock_server) = mock_server().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/a.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"v2\"")
                    .set_body_bytes(b"new"),
            )
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cached-a.txt"), b"old").unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataCache::new());
        let url = format!("{}/a.txt", mock_server.uri());
        store
            .set(&url, &CacheEntry::new("cached-a.txt", None, Some("\"v1\"".into())))
            .await
            .unwrap();
        let fetcher = fetcher_with(Arc::clone(&store), &dir);

        let outcome = fetcher.fetch_unattended(&url).await;
        assert!(outcome.success);
        assert_eq!(outcome.file_path, Some(dir.path().join("cached-a.txt")));
        assert_eq!(std::fs::read(dir.path().join("cached-a.txt")).unwrap(), b"new");

        let entry = store.get(&url).await.unwrap().unwrap();
        assert_eq!(entry.file_name, "cached-a.txt");
        assert_eq!(entry.etag.as_deref(), Some("\"v2\""));
        assert_eq!(entry.last_modified, None);
    }

    #[tokio::test]
    async fn test_fetch_304_without_cached_copy_fails() {
        let Some(mock_server) = mock_server().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let fetcher = fetcher_with(Arc::new(MemoryMetadataCache::new()), &dir);
        let url = format!("{}/odd", mock_server.uri());

        let outcome = fetcher.fetch_unattended(&url).await;
        assert!(!outcome.success);
        assert_eq!(outcome.file_path, None);
        assert_eq!(outcome.error.unwrap().status(), Some(304));
    }

    #[tokio::test]
    async fn test_fetch_other_status_keeps_prior_path_and_entry() {
        let Some(mock_server) = mock_server().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cached.bin"), b"old").unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataCache::new());
        let url = format!("{}/data.bin", mock_server.uri());
        let entry = CacheEntry::new("cached.bin", Some("lm".into()), None);
        store.set(&url, &entry).await.unwrap();
        let fetcher = fetcher_with(Arc::clone(&store), &dir);

        let outcome = fetcher.fetch_unattended(&url).await;
        assert!(!outcome.success);
        assert_eq!(outcome.file_path, Some(dir.path().join("cached.bin")));
        let error = outcome.error.unwrap();
        assert_eq!(error.status(), Some(500));
        assert_eq!(error.kind(), FetchErrorKind::Network);
        assert_eq!(store.get(&url).await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_falls_back_to_prior_path() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cached.bin"), b"old").unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataCache::new());
        // Port 1 is reserved and refuses connections.
        let url = "http://127.0.0.1:1/data.bin";
        store
            .set(url, &CacheEntry::new("cached.bin", None, Some("\"v1\"".into())))
            .await
            .unwrap();
        let fetcher = ConditionalFetcher::new(
            HttpClient::new_with_timeouts(2, 5),
            Arc::clone(&store),
            dir.path().to_path_buf(),
        );

        let outcome = fetcher.fetch_unattended(url).await;
        assert!(!outcome.success);
        assert_eq!(outcome.file_path, Some(dir.path().join("cached.bin")));
        assert_eq!(outcome.error.unwrap().kind(), FetchErrorKind::Network);
    }

    #[tokio::test]
    async fn test_fetch_move_failure_leaves_cache_untouched() {
        let Some(mock_server) = mock_server().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"v2\"")
                    .set_body_bytes(b"new"),
            )
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        // A non-empty directory at the destination cannot be removed as a file.
        let blocked = dir.path().join("blocked");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("inner"), b"x").unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataCache::new());
        let url = format!("{}/blocked", mock_server.uri());
        let entry = CacheEntry::new("blocked", None, Some("\"v1\"".into()));
        store.set(&url, &entry).await.unwrap();
        let fetcher = fetcher_with(Arc::clone(&store), &dir);

        let outcome = fetcher.fetch_unattended(&url).await;
        assert!(!outcome.success);
        assert_eq!(outcome.file_path, Some(blocked));
        assert_eq!(outcome.error.unwrap().kind(), FetchErrorKind::FileSystem);
        assert_eq!(store.get(&url).await.unwrap(), Some(entry));
        assert!(incoming_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_fetch_cancelled_before_send_keeps_prior_path() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cached.bin"), b"old").unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataCache::new());
        let url = "https://example.invalid/data.bin";
        let entry = CacheEntry::new("cached.bin", None, Some("\"v1\"".into()));
        store.set(url, &entry).await.unwrap();
        let fetcher = fetcher_with(Arc::clone(&store), &dir);

        let (transfer, mut control) = TransferControl::new(Signal::Hold);
        transfer.send(Signal::Cancel);
        let lookup = fetcher.lookup(url).await;
        let outcome = fetcher.fetch(url, &lookup, &mut control).await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().is_cancelled());
        assert_eq!(outcome.file_path, Some(dir.path().join("cached.bin")));
        assert_eq!(store.get(url).await.unwrap(), Some(entry));
    }

    #[derive(Debug)]
    struct ReadOnlyStore(MemoryMetadataCache);

    #[async_trait]
    impl MetadataStore for ReadOnlyStore {
        async fn get(&self, url: &str) -> cache::Result<Option<CacheEntry>> {
            self.0.get(url).await
        }

        async fn set(&self, _url: &str, _entry: &CacheEntry) -> cache::Result<()> {
            Err(CacheError::from(sqlx::Error::PoolClosed))
        }

        async fn remove(&self, url: &str) -> cache::Result<()> {
            self.0.remove(url).await
        }

        async fn remove_all(&self) -> cache::Result<u64> {
            self.0.remove_all().await
        }
    }

    #[tokio::test]
    async fn test_fetch_cache_write_failure_after_placement_still_succeeds() {
        let Some(mock_server) = mock_server().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload"))
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let fetcher = fetcher_with(
            Arc::new(ReadOnlyStore(MemoryMetadataCache::new())),
            &dir,
        );
        let url = format!("{}/x.bin", mock_server.uri());

        let outcome = fetcher.fetch_unattended(&url).await;
        assert!(outcome.success);
        assert_eq!(std::fs::read(outcome.file_path.unwrap()).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_check_freshness_reports_fresh_stale_and_uncached() {
        let Some(mock_server) = mock_server().await else {
            return;
        };
        Mock::given(method("HEAD"))
            .and(path("/fresh"))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/stale"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"f").unwrap();
        std::fs::write(dir.path().join("s"), b"s").unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataCache::new());
        let fresh_url = format!("{}/fresh", mock_server.uri());
        let stale_url = format!("{}/stale", mock_server.uri());
        store
            .set(&fresh_url, &CacheEntry::new("f", None, Some("\"1\"".into())))
            .await
            .unwrap();
        store
            .set(&stale_url, &CacheEntry::new("s", None, Some("\"1\"".into())))
            .await
            .unwrap();
        let fetcher = fetcher_with(Arc::clone(&store), &dir);

        assert_eq!(
            fetcher.check_freshness(&fresh_url).await.unwrap(),
            Freshness::Fresh
        );
        assert_eq!(
            fetcher.check_freshness(&stale_url).await.unwrap(),
            Freshness::Stale
        );
        assert_eq!(
            fetcher
                .check_freshness(&format!("{}/never", mock_server.uri()))
                .await
                .unwrap(),
            Freshness::Uncached
        );
        // The probe never rewrites entries.
        assert_eq!(store.get(&stale_url).await.unwrap().unwrap().file_name, "s");
    }
}

//! HTTP client wrapper for conditional requests.
//!
//! This module provides the `HttpClient` struct which issues GET/HEAD
//! requests carrying cache validators and streams response bodies to disk,
//! honouring hold/cancel signals from the owning download handle.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, Method, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::control::ControlReceiver;
use super::error::FetchError;
use super::validators::Validators;
use crate::user_agent;

/// HTTP client for conditional downloads.
///
/// This client is designed to be created once and shared by every handle of
/// a coordinator, taking advantage of connection pooling. It never consults
/// an HTTP cache of its own; freshness is decided by the validators passed in.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

/// Server answer to a conditional request.
#[derive(Debug)]
pub enum ConditionalResponse {
    /// 304: the cached copy is current.
    NotModified,
    /// 200: a new representation, body not yet consumed.
    Modified(reqwest::Response),
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Read timeout: 5 minutes without data on a read
    /// - Gzip decompression: enabled
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        Self::try_new_with_timeouts(connect_timeout_secs, read_timeout_secs)
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// `read_timeout_secs` bounds each wait for data, not the whole transfer,
    /// so a suspended body can sit held for longer than the timeout.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend or system configuration
    /// cannot be initialised.
    pub fn try_new_with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_fetch_user_agent())
            .build()?;
        Ok(Self { client })
    }

    /// Issues a GET carrying `validators` and classifies the answer.
    ///
    /// Waits while the transfer is held before sending, and aborts with
    /// [`FetchError::Cancelled`] if cancellation arrives before response
    /// headers do.
    ///
    /// # Errors
    ///
    /// Returns `FetchError` if:
    /// - The URL is invalid
    /// - The request fails (network error, timeout)
    /// - The server answers with anything but 200 or 304
    /// - The transfer is cancelled
    #[instrument(skip(self, validators, control), fields(url = %url, conditional = validators.is_conditional()))]
    pub async fn get_conditional(
        &self,
        url: &str,
        validators: &Validators,
        control: &mut ControlReceiver,
    ) -> Result<ConditionalResponse, FetchError> {
        self.send_conditional(Method::GET, url, validators, control)
            .await
    }

    /// Issues a HEAD carrying `validators` and classifies the answer.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`get_conditional`](Self::get_conditional).
    #[instrument(skip(self, validators), fields(url = %url, conditional = validators.is_conditional()))]
    pub async fn head_conditional(
        &self,
        url: &str,
        validators: &Validators,
    ) -> Result<ConditionalResponse, FetchError> {
        let mut control = ControlReceiver::running();
        self.send_conditional(Method::HEAD, url, validators, &mut control)
            .await
    }

    async fn send_conditional(
        &self,
        method: Method,
        url: &str,
        validators: &Validators,
        control: &mut ControlReceiver,
    ) -> Result<ConditionalResponse, FetchError> {
        Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;

        control
            .ready()
            .await
            .map_err(|_| FetchError::cancelled(url))?;

        let request = validators.apply(self.client.request(method, url));
        debug!("sending request");

        let response = tokio::select! {
            sent = request.send() => sent.map_err(|e| FetchError::from_transport(url, e))?,
            () = control.cancelled() => return Err(FetchError::cancelled(url)),
        };

        let status = response.status();
        debug!(status = status.as_u16(), "response received");
        match status {
            StatusCode::OK => Ok(ConditionalResponse::Modified(response)),
            StatusCode::NOT_MODIFIED => Ok(ConditionalResponse::NotModified),
            other => Err(FetchError::http_status(url, other.as_u16())),
        }
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Streams a response body into a new file at `file_path`, returning bytes written.
///
/// Pauses between chunks while the transfer is held; a hold sent while a
/// chunk is pending takes effect once that chunk arrives. On any error,
/// including cancellation, the partial file is left for the caller to remove.
pub(crate) async fn stream_to_file(
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
    control: &mut ControlReceiver,
) -> Result<u64, FetchError> {
    let file = File::create(file_path)
        .await
        .map_err(|e| FetchError::io(file_path, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    loop {
        control
            .ready()
            .await
            .map_err(|_| FetchError::cancelled(url))?;

        // The pending read is never abandoned for a hold: its read timer
        // would keep running across the pause.
        let next = tokio::select! {
            chunk = stream.next() => chunk,
            () = control.cancelled() => return Err(FetchError::cancelled(url)),
        };

        let Some(chunk_result) = next else {
            break;
        };
        let chunk = chunk_result.map_err(|e| FetchError::from_transport(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    // Ensure all data is flushed to disk
    writer
        .flush()
        .await
        .map_err(|e| FetchError::io(file_path, e))?;

    Ok(bytes_written)
}

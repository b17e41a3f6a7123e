//! HTTP cache validators: request preconditions and response extraction.

use reqwest::RequestBuilder;
use reqwest::header::{
    ETAG, HeaderMap, HeaderName, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};

use crate::cache::CacheLookup;

/// Validator values carried from a cached response into the next request,
/// or extracted from a fresh response into the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    /// `Last-Modified` value, sent back as `If-Modified-Since`.
    pub last_modified: Option<String>,
    /// `ETag` value, sent back as `If-None-Match`.
    pub etag: Option<String>,
}

impl Validators {
    /// Validators for a request: those of a hit, none for a miss.
    #[must_use]
    pub fn from_lookup(lookup: &CacheLookup) -> Self {
        lookup
            .entry()
            .map(|entry| Self {
                last_modified: entry.last_modified.clone(),
                etag: entry.etag.clone(),
            })
            .unwrap_or_default()
    }

    /// Reads `Last-Modified` and `ETag` verbatim from response headers.
    ///
    /// Values that are not visible ASCII are ignored.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(std::string::ToString::to_string)
        };
        Self {
            last_modified: read(LAST_MODIFIED),
            etag: read(ETAG),
        }
    }

    /// Returns true when the request would be conditional.
    #[must_use]
    pub fn is_conditional(&self) -> bool {
        self.last_modified.is_some() || self.etag.is_some()
    }

    /// Adds `If-Modified-Since` / `If-None-Match` for every known validator.
    ///
    /// Both are sent when both are known; the server decides freshness.
    #[must_use]
    pub fn apply(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(last_modified) = &self.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }
        if let Some(etag) = &self.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        request
    }
}

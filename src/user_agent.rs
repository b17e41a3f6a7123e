//! User-Agent string for fetch traffic.

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fetchcache/fetchcache";

/// Default User-Agent for conditional fetch requests (identifies the tool).
#[must_use]
pub(crate) fn default_fetch_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("fetchcache/{version} (conditional-download-cache; +{PROJECT_UA_URL})")
}

//! Constants for the download module (timeouts, content directory layout).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes without data).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Subdirectory of the content directory that receives in-flight bodies.
///
/// Keeping it on the same filesystem makes the final rename atomic.
pub const INCOMING_DIR: &str = ".incoming";

/// Extension of in-flight body files.
pub const PARTIAL_EXTENSION: &str = "part";

/// Name used when a URL has no usable last path segment.
pub const FALLBACK_BASENAME: &str = "download";

//! File naming for cached payloads and in-flight bodies.
//!
//! Cached files are named `<random-id>-<last URL path segment>` so that two
//! URLs sharing a basename never collide in the content directory.

use std::path::{Component, Path, PathBuf};

use url::Url;

use super::constants::{FALLBACK_BASENAME, INCOMING_DIR, PARTIAL_EXTENSION};

/// Returns a fresh cache file name for `url`.
#[must_use]
pub fn unique_cache_file_name(url: &str) -> String {
    format!("{}-{}", random_id(), last_path_component(url))
}

/// Returns the sanitized, percent-decoded last path segment of `url`.
///
/// Falls back to the host name, then to a fixed basename, when the URL has
/// no usable path segment.
#[must_use]
pub fn last_path_component(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return FALLBACK_BASENAME.to_string();
    };

    if let Some(mut segments) = parsed.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        let decoded = urlencoding::decode(last).map_or_else(|_| last.into(), |d| d.into_owned());
        return sanitize_filename(&decoded);
    }

    parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .map_or_else(|| FALLBACK_BASENAME.to_string(), sanitize_filename)
}

/// Returns a path for an in-flight body under `content_dir`.
#[must_use]
pub(crate) fn incoming_file_path(content_dir: &Path) -> PathBuf {
    content_dir
        .join(INCOMING_DIR)
        .join(format!("{}.{PARTIAL_EXTENSION}", random_id()))
}

/// 128 random bits as lowercase hex.
fn random_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

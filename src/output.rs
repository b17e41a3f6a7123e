//! Per-URL result lines printed on stdout.

use fetchcache_core::{DownloadOutcome, FetchError, Freshness};
use serde::Serialize;

/// JSON form of a fetch outcome.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub url: String,
    pub file_path: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub error_kind: Option<String>,
}

impl From<&DownloadOutcome> for OutcomeRecord {
    fn from(outcome: &DownloadOutcome) -> Self {
        Self {
            url: outcome.url.clone(),
            file_path: outcome
                .file_path
                .as_ref()
                .map(|path| path.display().to_string()),
            success: outcome.success,
            error: outcome.error.as_ref().map(ToString::to_string),
            error_kind: outcome.error.as_ref().map(|e| e.kind().to_string()),
        }
    }
}

/// JSON form of a freshness probe.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FreshnessRecord {
    pub url: String,
    pub status: Option<&'static str>,
    pub error: Option<String>,
}

impl FreshnessRecord {
    pub fn new(url: &str, result: &Result<Freshness, FetchError>) -> Self {
        match result {
            Ok(freshness) => Self {
                url: url.to_string(),
                status: Some(freshness_label(*freshness)),
                error: None,
            },
            Err(error) => Self {
                url: url.to_string(),
                status: None,
                error: Some(error.to_string()),
            },
        }
    }
}

pub fn freshness_label(freshness: Freshness) -> &'static str {
    match freshness {
        Freshness::Uncached => "uncached",
        Freshness::Fresh => "fresh",
        Freshness::Stale => "stale",
    }
}

/// Plain-text line for a successful fetch: the cached path.
pub fn plain_outcome_line(record: &OutcomeRecord) -> Option<&str> {
    if record.success {
        record.file_path.as_deref()
    } else {
        None
    }
}

/// Plain-text line for a freshness probe: `<status>\t<url>`.
pub fn plain_freshness_line(record: &FreshnessRecord) -> Option<String> {
    record
        .status
        .map(|status| format!("{status}\t{}", record.url))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_outcome_record_success_serializes_path() {
        let outcome = DownloadOutcome {
            url: "https://example.com/a.pdf".into(),
            file_path: Some(PathBuf::from("/cache/abc-a.pdf")),
            success: true,
            error: None,
        };
        let record = OutcomeRecord::from(&outcome);
        assert_eq!(plain_outcome_line(&record), Some("/cache/abc-a.pdf"));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["url"], "https://example.com/a.pdf");
        assert_eq!(json["file_path"], "/cache/abc-a.pdf");
        assert_eq!(json["success"], true);
        assert!(json["error"].is_null());
    }

    #[test]
    fn test_outcome_record_failure_carries_kind() {
        let outcome = DownloadOutcome {
            url: "https://example.com/a.pdf".into(),
            file_path: Some(PathBuf::from("/cache/old-a.pdf")),
            success: false,
            error: Some(FetchError::http_status("https://example.com/a.pdf", 503)),
        };
        let record = OutcomeRecord::from(&outcome);
        assert_eq!(plain_outcome_line(&record), None);
        assert_eq!(record.error_kind.as_deref(), Some("network"));
        assert!(record.error.unwrap().contains("503"));
    }

    #[test]
    fn test_freshness_record_lines() {
        let fresh = FreshnessRecord::new("https://example.com/a", &Ok(Freshness::Fresh));
        assert_eq!(
            plain_freshness_line(&fresh).as_deref(),
            Some("fresh\thttps://example.com/a")
        );

        let failed = FreshnessRecord::new(
            "https://example.com/a",
            &Err(FetchError::invalid_url("https://example.com/a")),
        );
        assert_eq!(plain_freshness_line(&failed), None);
        assert!(failed.error.is_some());
    }

    #[test]
    fn test_freshness_labels() {
        assert_eq!(freshness_label(Freshness::Uncached), "uncached");
        assert_eq!(freshness_label(Freshness::Fresh), "fresh");
        assert_eq!(freshness_label(Freshness::Stale), "stale");
    }
}

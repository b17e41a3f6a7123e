//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Fetch URLs into a local cache, re-downloading only what changed.
///
/// Each URL is requested with the `ETag` / `Last-Modified` validators of its
/// cached copy; unchanged resources are served from disk. Prints one cached
/// file path per URL.
#[derive(Parser, Debug)]
#[command(name = "fetchcache")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to fetch (read from stdin, one per line, when omitted)
    pub urls: Vec<String>,

    /// Directory holding cached files
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Metadata database file (defaults to metadata.db in the cache directory)
    #[arg(long, value_name = "FILE")]
    pub database: Option<PathBuf>,

    /// Only ask the server whether cached copies are current (HEAD, no download)
    #[arg(long, conflicts_with = "clear_cache")]
    pub check: bool,

    /// Forget every cached entry before fetching
    #[arg(long)]
    pub clear_cache: bool,

    /// Print one JSON object per URL instead of plain paths
    #[arg(long)]
    pub json: bool,

    /// HTTP connect timeout in seconds (1-3600)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout: Option<u64>,

    /// HTTP read timeout in seconds, per wait for data (1-3600)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub read_timeout: Option<u64>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["fetchcache"]).unwrap();
        assert!(args.urls.is_empty());
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.check);
        assert!(!args.clear_cache);
        assert!(!args.json);
        assert!(args.cache_dir.is_none());
        assert!(args.connect_timeout.is_none());
    }

    #[test]
    fn test_cli_positional_urls() {
        let args = Args::try_parse_from([
            "fetchcache",
            "https://example.com/a.pdf",
            "https://example.com/b.pdf",
        ])
        .unwrap();
        assert_eq!(
            args.urls,
            vec!["https://example.com/a.pdf", "https://example.com/b.pdf"]
        );
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["fetchcache", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["fetchcache", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["fetchcache", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_paths_and_modes() {
        let args = Args::try_parse_from([
            "fetchcache",
            "--cache-dir",
            "/tmp/cache",
            "--database",
            "/tmp/meta.db",
            "--check",
            "--json",
        ])
        .unwrap();
        assert_eq!(args.cache_dir, Some(PathBuf::from("/tmp/cache")));
        assert_eq!(args.database, Some(PathBuf::from("/tmp/meta.db")));
        assert!(args.check);
        assert!(args.json);
    }

    #[test]
    fn test_cli_check_conflicts_with_clear_cache() {
        let result = Args::try_parse_from(["fetchcache", "--check", "--clear-cache"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_cli_timeouts_accept_range() {
        let args =
            Args::try_parse_from(["fetchcache", "--connect-timeout", "5", "--read-timeout", "3600"])
                .unwrap();
        assert_eq!(args.connect_timeout, Some(5));
        assert_eq!(args.read_timeout, Some(3600));
    }

    #[test]
    fn test_cli_timeout_zero_rejected() {
        let err = Args::try_parse_from(["fetchcache", "--connect-timeout", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["fetchcache", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["fetchcache", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["fetchcache", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}

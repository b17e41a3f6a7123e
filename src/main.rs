//! CLI entry point for the fetchcache tool.

use std::collections::HashSet;
use std::io::{self, IsTerminal, Read};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use fetchcache_core::{CoordinatorOptions, DatabaseOptions, DownloadCoordinator};
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

mod app_config;
mod cli;
mod output;

use app_config::{FileConfig, VerbositySetting};
use cli::Args;
use output::{FreshnessRecord, OutcomeRecord};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // The config file may set verbosity, so it is read before tracing starts;
    // a load error is reported once logging is up.
    let loaded = app_config::load_default_file_config();
    let config_verbosity = loaded
        .as_ref()
        .ok()
        .and_then(|loaded| loaded.config.as_ref())
        .and_then(|config| config.verbosity);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(default_log_filter(&args, config_verbosity))
    });
    // Logs go to stderr; stdout carries one result line per URL.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let loaded = loaded?;
    debug!(?args, config = ?loaded.path, "CLI arguments parsed");

    let urls = read_urls(&args)?;
    let options = coordinator_options(&args, &loaded.file_config());
    let coordinator = DownloadCoordinator::open(options).await?;

    if args.clear_cache {
        let removed = coordinator.clear_cache().await?;
        info!(removed, "cleared cached entries");
    }

    if urls.is_empty() {
        if !args.clear_cache {
            info!("No input provided. Pipe URLs via stdin or pass as arguments.");
            info!("Example: echo 'https://example.com/file.pdf' | fetchcache");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let failed = if args.check {
        check_all(&coordinator, &urls, args.json).await?
    } else {
        fetch_all(&coordinator, &urls, args.json).await?
    };

    info!(total = urls.len(), failed, "fetchcache finished");
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Priority: `RUST_LOG` (handled by the caller) > quiet > verbose > config > info.
fn default_log_filter(args: &Args, config: Option<VerbositySetting>) -> &'static str {
    if args.quiet {
        return "error";
    }
    match args.verbose {
        0 => config.map_or("info", VerbositySetting::filter_directive),
        1 => "debug",
        _ => "trace",
    }
}

/// CLI flags override config file values, which override library defaults.
fn coordinator_options(args: &Args, config: &FileConfig) -> CoordinatorOptions {
    let defaults = CoordinatorOptions::default();
    let database_defaults = DatabaseOptions::default();
    CoordinatorOptions {
        content_dir: args
            .cache_dir
            .clone()
            .or_else(|| config.cache_dir.clone())
            .unwrap_or(defaults.content_dir),
        database: DatabaseOptions {
            path: args.database.clone().or_else(|| config.database.clone()),
            max_connections: config
                .db_max_connections
                .unwrap_or(database_defaults.max_connections),
            busy_timeout_ms: config
                .db_busy_timeout_ms
                .unwrap_or(database_defaults.busy_timeout_ms),
        },
        connect_timeout_secs: args
            .connect_timeout
            .or(config.connect_timeout_secs)
            .unwrap_or(defaults.connect_timeout_secs),
        read_timeout_secs: args
            .read_timeout
            .or(config.read_timeout_secs)
            .unwrap_or(defaults.read_timeout_secs),
    }
}

/// URLs from positional args, else stdin lines. Blank and `#` lines are
/// skipped; duplicates keep their first position.
fn read_urls(args: &Args) -> Result<Vec<String>> {
    let input_text = if !args.urls.is_empty() {
        args.urls.join("\n")
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        String::new()
    };

    Ok(parse_url_lines(&input_text))
}

fn parse_url_lines(input: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect()
}

/// Fetches every URL concurrently and prints outcomes as they complete.
///
/// Returns the number of failed fetches.
async fn fetch_all(coordinator: &DownloadCoordinator, urls: &[String], json: bool) -> Result<usize> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    for url in urls {
        let tx = tx.clone();
        coordinator.download(url, move |outcome| {
            let _ = tx.send(outcome);
        });
    }
    drop(tx);

    let mut failed = 0;
    for _ in 0..urls.len() {
        let Some(outcome) = rx.recv().await else {
            break;
        };
        let record = OutcomeRecord::from(&outcome);
        if !record.success {
            failed += 1;
            error!(
                url = %record.url,
                error = record.error.as_deref().unwrap_or("unknown error"),
                "fetch failed"
            );
        }

        if json {
            println!("{}", serde_json::to_string(&record)?);
        } else if let Some(line) = output::plain_outcome_line(&record) {
            println!("{line}");
        }
    }
    Ok(failed)
}

/// Probes every URL concurrently with HEAD and prints the answers in input order.
///
/// Returns the number of failed probes.
async fn check_all(coordinator: &DownloadCoordinator, urls: &[String], json: bool) -> Result<usize> {
    let results = join_all(urls.iter().map(|url| coordinator.check_freshness(url))).await;

    let mut failed = 0;
    for (url, result) in urls.iter().zip(&results) {
        let record = FreshnessRecord::new(url, result);
        if let Some(message) = &record.error {
            failed += 1;
            error!(url = %url, error = %message, "freshness check failed");
        }

        if json {
            println!("{}", serde_json::to_string(&record)?);
        } else if let Some(line) = output::plain_freshness_line(&record) {
            println!("{line}");
        }
    }
    Ok(failed)
}

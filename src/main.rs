//! # rival_watch
//!
//! A batch job that watches competitor news. It pulls items from RSS/Atom
//! feeds, Google News searches, company newsroom pages and an optional
//! premium search API, tags and scores each item with keyword rules, and
//! merges the new ones into a JSON snapshot read by a web dashboard.
//!
//! ## Usage
//!
//! ```sh
//! rival_watch -o public/data/insights.json
//! ```
//!
//! ## Architecture
//!
//! One run is a single cycle:
//! 1. **Collecting**: every configured source yields an ordered batch of records
//! 2. **Merging**: records new by both id and canonical URL are admitted
//! 3. **Persisting**: the snapshot is sorted newest first, capped and
//!    atomically replaced

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod classify;
mod cli;
mod collectors;
mod config;
mod fetch;
mod models;
mod store;
mod utils;

use cli::Cli;
use collectors::{Context, candidates, collect_all};
use config::Config;
use fetch::{HttpFetch, RetryFetch};
use store::SnapshotStore;
use utils::ensure_writable_dir;

/// Retries after the first attempt for each request.
const MAX_RETRIES: usize = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("rival_watch starting up");

    let args = Cli::parse();
    debug!(
        output = %args.output.display(),
        config = ?args.config,
        cap = args.cap,
        dry_run = args.dry_run,
        search_enabled = args.search_api_key.is_some(),
        "Parsed CLI arguments"
    );

    let config = Config::load(args.config.as_deref()).map_err(|e| {
        error!(error = %e, "Invalid source configuration");
        e
    })?;

    // Early check: a bad output location should fail before any fetching
    if !args.dry_run {
        let dir = args
            .output
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or(std::path::Path::new("."));
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(
                path = %dir.display(),
                error = %e,
                "Output directory is not writable (fix perms or choose a different path)"
            );
            return Err(e);
        }
    }

    // ---- Collect ----
    let fetch = RetryFetch::new(HttpFetch::new()?, MAX_RETRIES, RETRY_BASE_DELAY);
    let ctx = Context {
        search_api_key: args.search_api_key.as_deref(),
        observed_at: Utc::now(),
    };
    let batches = collect_all(&config.sources, &fetch, &ctx).await;
    info!(sources = batches.len(), "Collection finished");

    // ---- Merge & persist ----
    let store = SnapshotStore::open(&args.output);
    let report = if args.dry_run {
        store.preview(candidates(batches), args.cap)
    } else {
        store.ingest(candidates(batches), args.cap).map_err(|e| {
            error!(error = %e, "Failed to write snapshot");
            e
        })?
    };
    info!(
        existing = report.existing,
        added = report.added,
        duplicates = report.rejected,
        written = report.written,
        dry_run = args.dry_run,
        "Snapshot updated"
    );

    if args.dry_run {
        println!(
            "Would add {} new insights; would write {} to {}",
            report.added,
            report.written,
            store.path().display()
        );
    } else {
        println!(
            "Added {} new insights; wrote {} to {}",
            report.added,
            report.written,
            store.path().display()
        );
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}

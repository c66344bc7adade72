//! # Guidance Watch
//!
//! Polls public health-guidance publishers and blogs, detects new or changed
//! articles by content fingerprint, and keeps a set of flat JSON documents
//! that a static dashboard reads.
//!
//! ## Features
//!
//! - Listing sources (NICE published guidance, Guidelines in Practice) with
//!   a listing-level fingerprint that skips unchanged listings entirely
//! - Feed sources (UKHSA blog RSS, MHRA Drug Safety Update Atom)
//! - Include/exclude keyword filtering per source
//! - Bounded-depth crawl of NICE guidance chapters
//! - Append-only change log with an unread counter
//!
//! ## Usage
//!
//! ```sh
//! guidance_watch --data-dir ./data --job all
//! guidance_watch --status
//! ```
//!
//! ## Architecture
//!
//! 1. **Load**: read every JSON document in the data directory once
//! 2. **Discover**: fetch each enabled source's listing page or feed
//! 3. **Reconcile**: fetch, extract and fingerprint each relevant article,
//!    recording `new_guidance` / `content_updated` events
//! 4. **Flush**: atomically rewrite the documents the run modified

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod crawler;
mod fetch;
mod filter;
mod models;
mod pipeline;
mod scrapers;
mod settings;
mod sources;
mod store;
mod utils;

use cli::Cli;
use fetch::HttpFetcher;
use settings::Settings;
use sources::builtin_sources;
use store::StateSnapshot;
use utils::ensure_writable_dir;

// Sources and links are polled strictly one after another.
#[tokio::main(flavor = "current_thread")]
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
    info!("guidance_watch starting up");

    let args = Cli::parse();
    debug!(data_dir = %args.data_dir.display(), job = ?args.job, force = args.force, "Parsed CLI arguments");

    let settings = match Settings::load(args.settings.as_deref()).await {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Failed to load settings");
            return Err(e.into());
        }
    };

    if args.status {
        let state = StateSnapshot::load(&args.data_dir).await?;
        print!("{}", state.summary());
        return Ok(());
    }

    // Early check: the flush at the end must be able to write here
    if let Err(e) = ensure_writable_dir(&args.data_dir).await {
        error!(
            path = %args.data_dir.display(),
            error = %e,
            "Data directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let sources = builtin_sources()?;
    let fetcher = HttpFetcher::new(&settings.fetch_options())?;
    let mut state = StateSnapshot::load(&args.data_dir).await?;
    let options = settings.run_options(args.force);

    let summary = match pipeline::run(&fetcher, &sources, &args.job.jobs(), &mut state, &options).await
    {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Failed to persist state");
            return Err(e.into());
        }
    };

    for (source, changes) in &summary.results {
        info!(%source, changes, "Source result");
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        changes = summary.total_changes(),
        failed_sources = summary.failed.len(),
        "Execution complete"
    );

    Ok(())
}

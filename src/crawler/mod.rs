//! Crawler module for walking the remote manifest tree
//!
//! This module contains the core crawling logic, including:
//! - Rate-limited fetching with retry, backoff and quota pauses
//! - Walking the publisher / package / version hierarchy
//! - Batch scheduling, checkpoint cadence and cancellation
//! - Overall crawl orchestration

mod coordinator;
mod fetcher;
mod scheduler;
mod walker;

pub use coordinator::CrawlOrchestrator;
pub use fetcher::{
    build_http_client, parse_next_link, quota_from_headers, FetchError, FetchResult, FetchedPage,
    HttpTransport, RateLimitedFetcher, RawResponse, Transport,
};
pub use scheduler::Scheduler;
pub use walker::{
    select_manifests, EntryKind, ListingEntry, ManifestLocation, TreeWalker, WalkError,
};

use crate::config::Config;
use crate::output::LocalSnapshotWriter;
use crate::state::RunSummary;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tick::Clock;

/// Runs a complete crawl against the configured remote
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Build the HTTP client and the local snapshot writer
/// 2. Load the last checkpoint when `resume` is set
/// 3. Walk the tree in batches, writing checkpoints along the way
/// 4. Write the final snapshot and return the run summary
///
/// # Arguments
///
/// * `config` - Validated configuration
/// * `config_hash` - Hash recorded in `run.json` with every write
/// * `resume` - Seed the run from the checkpoint in the snapshot directory
/// * `cancel` - Setting this flag stops the run at the next batch boundary
///
/// # Returns
///
/// * `Ok(RunSummary)` - The run finished, was cancelled or hit its deadline;
///   the final snapshot has been written in every case
/// * `Err(MirrorError::RootListing)` - The publisher list could not be
///   fetched; nothing was written
/// * `Err(MirrorError)` - The HTTP client could not be built, or the
///   checkpoint or final snapshot could not be read or written
///
/// # Example
///
/// ```no_run
/// use manifest_mirror::config::load_config_with_hash;
/// use manifest_mirror::crawler::crawl;
/// use std::path::Path;
/// use std::sync::atomic::AtomicBool;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("config.toml"))?;
/// let summary = crawl(&config, &hash, false, Arc::new(AtomicBool::new(false))).await?;
/// println!("{}", summary);
/// # Ok(())
/// # }
/// ```
pub async fn crawl(
    config: &Config,
    config_hash: &str,
    resume: bool,
    cancel: Arc<AtomicBool>,
) -> crate::Result<RunSummary> {
    let writer = LocalSnapshotWriter::new(&config.output.snapshot_dir, config.output.top_n)
        .with_config_hash(config_hash);

    let previous = if resume {
        let loaded = writer.load_checkpoint().await?;
        match &loaded {
            Some(state) => tracing::info!(
                "Resuming from checkpoint: {} records, {} publishers completed",
                state.record_count(),
                state.completed_publishers().len()
            ),
            None => tracing::info!("No checkpoint found, starting a fresh run"),
        }
        loaded
    } else {
        None
    };

    let clock = Clock::new_tokio();
    let mut orchestrator =
        CrawlOrchestrator::from_config(config, writer, clock)?.with_cancel_flag(cancel);
    if let Some(state) = previous {
        orchestrator = orchestrator.with_state(state);
    }

    orchestrator.run().await
}

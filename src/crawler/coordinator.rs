//! Crawl orchestrator - main crawl loop
//!
//! This module coordinates the walker, the record builder and the snapshot
//! writer:
//! - Listing publishers at the root (a failure here aborts the run)
//! - Processing publishers in fixed-width batches, packages sequentially
//! - Folding publisher outcomes into the crawl state as they complete
//! - Writing checkpoints every K batches and a final snapshot
//! - Stopping cleanly at a batch boundary on cancellation or deadline

use crate::config::{Config, CrawlerConfig};
use crate::crawler::fetcher::{HttpTransport, RateLimitedFetcher, Transport};
use crate::crawler::scheduler::Scheduler;
use crate::crawler::walker::{TreeWalker, WalkError};
use crate::output::SnapshotWriter;
use crate::record::{PackageNode, PackageRecord, PublisherNode, RecordBuilder};
use crate::state::{CrawlPhase, CrawlState, PublisherOutcome, RunStatus, RunSummary};
use crate::MirrorError;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tick::Clock;
use tokio::time::Instant;

/// Crawls the packages of one publisher
///
/// Borrows only what a publisher task needs, so the orchestrator can fold
/// finished outcomes into its state while other tasks are still running.
struct PublisherCrawler<'a, T: Transport> {
    walker: &'a TreeWalker<T>,
    builder: &'a RecordBuilder,
    package_delay: Duration,
}

impl<'a, T: Transport> PublisherCrawler<'a, T> {
    async fn crawl(&self, publisher: &PublisherNode) -> PublisherOutcome {
        let mut outcome = PublisherOutcome::new(&publisher.name);

        let packages = match self.walker.list_packages(publisher).await {
            Ok(packages) => packages,
            Err(e) => {
                tracing::error!("Failed to list packages of publisher {}: {}", publisher.name, e);
                outcome.listing_failed = true;
                return outcome;
            }
        };
        tracing::debug!("Publisher {}: {} packages", publisher.name, packages.len());

        for (index, package) in packages.iter().enumerate() {
            if index > 0 && !self.package_delay.is_zero() {
                tokio::time::sleep(self.package_delay).await;
            }

            outcome.processed += 1;
            match self.crawl_package(package).await {
                Ok(Some(record)) => outcome.records.push(record),
                Ok(None) => {
                    outcome.skipped += 1;
                    tracing::debug!("Skipping {}: no versions found", package);
                }
                Err(e) => {
                    outcome.errors += 1;
                    tracing::error!("Failed to process package {}: {}", package, e);
                }
            }
        }

        outcome
    }

    /// Versions, then the latest version's manifests, then the record
    async fn crawl_package(&self, package: &PackageNode) -> Result<Option<PackageRecord>, WalkError> {
        let versions = self.walker.list_versions(package).await?;
        let Some(latest) = versions.first() else {
            return Ok(None);
        };

        let manifests = self.walker.locate_manifests(latest).await?;
        if manifests.is_empty() {
            tracing::debug!("{} {} has no manifest documents", package, latest.version);
        }
        let documents = self
            .walker
            .fetch_manifests(package, latest, &manifests)
            .await?;

        Ok(self.builder.build(package, &versions, &documents))
    }
}

/// Main crawl orchestrator
pub struct CrawlOrchestrator<T: Transport, W: SnapshotWriter> {
    walker: TreeWalker<T>,
    writer: W,
    builder: RecordBuilder,
    config: CrawlerConfig,
    state: CrawlState,
    phase: CrawlPhase,
    cancel: Arc<AtomicBool>,
}

impl<W: SnapshotWriter> CrawlOrchestrator<HttpTransport, W> {
    /// Creates an orchestrator talking to the configured remote over HTTP
    ///
    /// Request pacing, quota pauses and retry delays all run on `clock`.
    pub fn from_config(config: &Config, writer: W, clock: Clock) -> crate::Result<Self> {
        let transport = HttpTransport::from_config(config)?;
        let fetcher = RateLimitedFetcher::new(transport, config.fetcher.clone(), clock);
        let walker = TreeWalker::new(fetcher, config.remote.root_location());
        Ok(Self::new(walker, writer, config.crawler.clone()))
    }
}

impl<T: Transport, W: SnapshotWriter> CrawlOrchestrator<T, W> {
    pub fn new(walker: TreeWalker<T>, writer: W, config: CrawlerConfig) -> Self {
        Self {
            walker,
            writer,
            builder: RecordBuilder::new(),
            config,
            state: CrawlState::new(),
            phase: CrawlPhase::Idle,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Seeds the run with state from an earlier checkpoint
    pub fn with_state(mut self, state: CrawlState) -> Self {
        self.state = state;
        self
    }

    /// Uses an externally owned cancellation flag
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    fn transition(&mut self, next: CrawlPhase) {
        if !self.phase.can_transition_to(next) {
            tracing::warn!("Unexpected phase transition {} -> {}", self.phase, next);
        }
        tracing::trace!("Phase {} -> {}", self.phase, next);
        self.phase = next;
    }

    /// Runs the crawl to completion, cancellation or deadline
    ///
    /// Returns `MirrorError::RootListing` without writing anything when the
    /// publisher list cannot be fetched. Any other node failure is counted and
    /// the run goes on.
    pub async fn run(&mut self) -> crate::Result<RunSummary> {
        let started = Instant::now();

        self.transition(CrawlPhase::ListingPublishers);
        let publishers = match self.walker.list_publishers().await {
            Ok(publishers) => publishers,
            Err(source) => {
                tracing::error!("Failed to list publishers: {}", source);
                self.transition(CrawlPhase::Done);
                return Err(MirrorError::RootListing {
                    location: self.walker.root_location().to_string(),
                    source,
                });
            }
        };

        let listed = publishers.len();
        let pending: Vec<PublisherNode> = publishers
            .into_iter()
            .filter(|p| !self.state.is_publisher_completed(&p.name))
            .collect();
        tracing::info!(
            "Found {} publishers, {} pending ({} already completed)",
            listed,
            pending.len(),
            listed - pending.len()
        );

        let mut scheduler = Scheduler::new(&self.config, pending, self.cancel.clone());
        let total_batches = scheduler.total_batches();
        let mut status = RunStatus::Completed;

        while !scheduler.is_empty() {
            if let Some(reason) = scheduler.stop_reason() {
                tracing::warn!(
                    "Stopping at batch boundary ({}), {} batches left",
                    reason,
                    scheduler.remaining_batches()
                );
                status = reason;
                break;
            }

            let Some(batch) = scheduler.next_batch() else {
                break;
            };
            self.transition(CrawlPhase::ProcessingBatch);
            self.process_batch(batch).await;
            self.state.batches_completed += 1;

            let done = total_batches - scheduler.remaining_batches();
            let elapsed = started.elapsed();
            let rate = self.state.processed as f64 / elapsed.as_secs_f64().max(0.001);
            tracing::info!(
                "Progress: batch {}/{}, {} records, {} errors, {:.2} packages/sec",
                done,
                total_batches,
                self.state.record_count(),
                self.state.errors,
                rate
            );

            if scheduler.batch_completed() && !scheduler.is_empty() {
                self.checkpoint().await;
            }
        }

        self.transition(CrawlPhase::Finalizing);
        self.writer.write(&self.state).await?;
        self.transition(CrawlPhase::Done);

        let summary = self.state.summary(status, started.elapsed());
        tracing::info!("Crawl {}", summary);
        Ok(summary)
    }

    async fn process_batch(&mut self, batch: Vec<PublisherNode>) {
        let crawler = PublisherCrawler {
            walker: &self.walker,
            builder: &self.builder,
            package_delay: self.config.package_delay(),
        };

        let mut tasks: FuturesUnordered<_> = batch
            .iter()
            .map(|publisher| crawler.crawl(publisher))
            .collect();

        while let Some(outcome) = tasks.next().await {
            tracing::debug!(
                "Publisher {} done: {} records, {} skipped, {} errors",
                outcome.publisher,
                outcome.records.len(),
                outcome.skipped,
                outcome.errors
            );
            self.state.apply(outcome);
        }
    }

    /// Hands the accumulated state to the writer mid-run
    ///
    /// A failed checkpoint is logged and the run continues; the previous
    /// checkpoint files stay in place.
    async fn checkpoint(&mut self) {
        self.transition(CrawlPhase::Checkpointing);
        self.state.checkpoints_written += 1;

        match self.writer.write(&self.state).await {
            Ok(report) => tracing::info!(
                "Checkpoint {} written: {} records after {} batches",
                self.state.checkpoints_written,
                report.records,
                self.state.batches_completed
            ),
            Err(e) => {
                self.state.checkpoints_written -= 1;
                tracing::error!("Checkpoint failed: {}", e);
            }
        }
    }
}

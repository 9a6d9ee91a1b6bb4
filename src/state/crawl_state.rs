use crate::record::PackageRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Result of crawling every package of one publisher
///
/// Produced by a publisher task and handed to the orchestrator, which is the
/// only place it gets folded into the `CrawlState`.
#[derive(Debug, Clone, Default)]
pub struct PublisherOutcome {
    /// Publisher node name
    pub publisher: String,

    /// Records built, in completion order
    pub records: Vec<PackageRecord>,

    /// Packages visited (built, skipped, or failed)
    pub processed: u64,

    /// Packages with no usable versions
    pub skipped: u64,

    /// Packages that failed with a fetch or parse error
    pub errors: u64,

    /// Set when the package listing of the publisher itself failed
    pub listing_failed: bool,
}

impl PublisherOutcome {
    pub fn new(publisher: impl Into<String>) -> Self {
        Self {
            publisher: publisher.into(),
            ..Self::default()
        }
    }
}

/// Progress persisted with every checkpoint (`run.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointProgress {
    pub started_at: DateTime<Utc>,
    pub written_at: DateTime<Utc>,
    pub completed_publishers: Vec<String>,
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub batches_completed: u32,
    pub checkpoints_written: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
}

/// Process-wide accumulator of a crawl run
///
/// Holds the growing record list and run-level counters. Only the orchestrator
/// mutates it; snapshot writers receive a shared reference.
#[derive(Debug, Clone)]
pub struct CrawlState {
    records: Vec<PackageRecord>,
    ids: HashSet<String>,
    completed_publishers: Vec<String>,
    completed_lookup: HashSet<String>,

    /// Packages visited
    pub processed: u64,

    /// Packages skipped for lack of versions
    pub skipped: u64,

    /// Package and publisher failures
    pub errors: u64,

    pub started_at: DateTime<Utc>,
    pub batches_completed: u32,
    pub checkpoints_written: u32,
}

impl Default for CrawlState {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlState {
    /// Creates an empty state for a fresh run
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            ids: HashSet::new(),
            completed_publishers: Vec::new(),
            completed_lookup: HashSet::new(),
            processed: 0,
            skipped: 0,
            errors: 0,
            started_at: Utc::now(),
            batches_completed: 0,
            checkpoints_written: 0,
        }
    }

    /// Rebuilds the state persisted by an earlier checkpoint
    pub fn from_checkpoint(records: Vec<PackageRecord>, progress: CheckpointProgress) -> Self {
        let mut state = Self {
            processed: progress.processed,
            skipped: progress.skipped,
            errors: progress.errors,
            started_at: progress.started_at,
            batches_completed: progress.batches_completed,
            checkpoints_written: progress.checkpoints_written,
            ..Self::new()
        };

        for record in records {
            state.push_record(record);
        }
        for publisher in progress.completed_publishers {
            state.mark_publisher_completed(publisher);
        }

        state
    }

    /// Appends a record, refusing duplicate ids
    ///
    /// Returns `false` when a record with the same id is already present.
    pub fn push_record(&mut self, record: PackageRecord) -> bool {
        if !self.ids.insert(record.id.clone()) {
            tracing::warn!("Dropping duplicate record id {}", record.id);
            return false;
        }
        self.records.push(record);
        true
    }

    /// Folds a finished publisher into the run
    pub fn apply(&mut self, outcome: PublisherOutcome) {
        self.processed += outcome.processed;
        self.skipped += outcome.skipped;
        self.errors += outcome.errors;
        if outcome.listing_failed {
            self.errors += 1;
        }

        for record in outcome.records {
            self.push_record(record);
        }

        // A publisher whose listing failed is retried by a resumed run
        if !outcome.listing_failed {
            self.mark_publisher_completed(outcome.publisher);
        }
    }

    fn mark_publisher_completed(&mut self, publisher: String) {
        if self.completed_lookup.insert(publisher.clone()) {
            self.completed_publishers.push(publisher);
        }
    }

    pub fn is_publisher_completed(&self, publisher: &str) -> bool {
        self.completed_lookup.contains(publisher)
    }

    pub fn records(&self) -> &[PackageRecord] {
        &self.records
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn completed_publishers(&self) -> &[String] {
        &self.completed_publishers
    }

    /// Progress marker persisted alongside a snapshot
    pub fn progress(&self, config_hash: Option<&str>) -> CheckpointProgress {
        CheckpointProgress {
            started_at: self.started_at,
            written_at: Utc::now(),
            completed_publishers: self.completed_publishers.clone(),
            processed: self.processed,
            skipped: self.skipped,
            errors: self.errors,
            batches_completed: self.batches_completed,
            checkpoints_written: self.checkpoints_written,
            config_hash: config_hash.map(str::to_string),
        }
    }

    /// Builds the run summary
    pub fn summary(&self, status: RunStatus, elapsed: Duration) -> RunSummary {
        RunSummary {
            status,
            processed: self.processed,
            skipped: self.skipped,
            errors: self.errors,
            records: self.records.len(),
            batches: self.batches_completed,
            checkpoints: self.checkpoints_written,
            elapsed,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// Every publisher was processed
    Completed,

    /// Stopped at a batch boundary on an external signal
    Cancelled,

    /// Stopped at a batch boundary after the run deadline passed
    TimedOut,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Summary reported at the end of every run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub status: RunStatus,
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub records: usize,
    pub batches: u32,
    pub checkpoints: u32,
    pub elapsed: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} records, {} packages processed, {} skipped, {} errors, {} batches, {} checkpoints in {:.1}s",
            self.status,
            self.records,
            self.processed,
            self.skipped,
            self.errors,
            self.batches,
            self.checkpoints,
            self.elapsed.as_secs_f64()
        )
    }
}

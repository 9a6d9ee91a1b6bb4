//! Output module for persisting crawl snapshots
//!
//! This module handles:
//! - Writing the full record list, per-publisher shards and per-record files
//! - Deriving and printing snapshot statistics
//! - Loading the last checkpoint for resumed runs

mod local;
pub mod stats;
mod traits;

pub use local::{
    assign_slugs, slugify, LocalSnapshotWriter, PACKAGES_FILE, PUBLISHERS_DIR, RECORDS_DIR,
    RUN_FILE, STATS_FILE,
};
pub use stats::{print_statistics, NamedCount, RunCounters, SnapshotStats};
pub use traits::{SnapshotError, SnapshotReport, SnapshotResult, SnapshotWriter};

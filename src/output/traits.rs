//! Snapshot writer trait and error types

use crate::state::CrawlState;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while persisting a snapshot
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Malformed snapshot file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl SnapshotError {
    /// Wraps an IO error with the path it happened on
    pub fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Counts of what one snapshot write produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    pub records: usize,
    pub shards: usize,
    pub stale_removed: usize,
}

/// Persists the accumulated crawl state
///
/// Every call writes a full materialization of the given state; intermediate
/// checkpoints and the final write go through the same call.
#[async_trait]
pub trait SnapshotWriter: Send + Sync {
    async fn write(&self, state: &CrawlState) -> SnapshotResult<SnapshotReport>;
}

//! Manifest-Mirror: a quota-aware mirror for publisher/package/version manifest trees
//!
//! This crate walks a remote three-level tree of manifest documents, merges the
//! documents of each package into a canonical record, and persists the
//! accumulated record set as a sharded snapshot with periodic checkpoints.

pub mod config;
pub mod crawler;
pub mod output;
pub mod record;
pub mod state;

use thiserror::Error;

/// Main error type for Manifest-Mirror operations
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] output::SnapshotError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Failed to list publishers at {location}: {source}")]
    RootListing {
        location: String,
        source: crawler::FetchError,
    },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Manifest-Mirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlOrchestrator, RateLimitedFetcher, TreeWalker};
pub use output::{LocalSnapshotWriter, SnapshotWriter};
pub use record::{PackageRecord, RecordBuilder, VersionEntry};
pub use state::{CrawlPhase, CrawlState, RateLimitState, RunSummary};

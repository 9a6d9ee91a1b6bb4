//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlState`: The record accumulator and run counters, owned by the orchestrator
//! - `RateLimitState`: Server-reported quota and the courtesy-throttle slot, owned by the fetcher
//! - `CrawlPhase`: The orchestrator's state machine

mod crawl_state;
mod phase;
mod rate_limit;

// Re-export main types
pub use crawl_state::{CheckpointProgress, CrawlState, PublisherOutcome, RunStatus, RunSummary};
pub use phase::CrawlPhase;
pub use rate_limit::RateLimitState;

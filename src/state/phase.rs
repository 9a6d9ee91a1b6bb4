/// Crawl phase definitions for the orchestrator state machine
///
/// A run moves through
/// `Idle -> ListingPublishers -> ProcessingBatch <-> Checkpointing -> Finalizing -> Done`.
/// A failure of the root listing goes straight from `ListingPublishers` to `Done`.
use std::fmt;

/// Represents the current phase of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlPhase {
    /// Created, nothing fetched yet
    Idle,

    /// Fetching the root listing of publishers
    ListingPublishers,

    /// Working through a batch of publishers
    ProcessingBatch,

    /// Handing the accumulated state to the snapshot writer mid-run
    Checkpointing,

    /// Writing the final snapshot
    Finalizing,

    /// Run finished, successfully or not
    Done,
}

impl CrawlPhase {
    /// Returns true if the orchestrator may move from this phase to `next`
    pub fn can_transition_to(&self, next: CrawlPhase) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::ListingPublishers)
                | (Self::ListingPublishers, Self::ProcessingBatch)
                | (Self::ListingPublishers, Self::Finalizing)
                | (Self::ListingPublishers, Self::Done)
                | (Self::ProcessingBatch, Self::ProcessingBatch)
                | (Self::ProcessingBatch, Self::Checkpointing)
                | (Self::ProcessingBatch, Self::Finalizing)
                | (Self::Checkpointing, Self::ProcessingBatch)
                | (Self::Checkpointing, Self::Finalizing)
                | (Self::Finalizing, Self::Done)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ListingPublishers => "listing_publishers",
            Self::ProcessingBatch => "processing_batch",
            Self::Checkpointing => "checkpointing",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

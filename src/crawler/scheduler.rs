//! Batch scheduler
//!
//! This module handles:
//! - Slicing the publisher list into fixed-width batches
//! - Deciding when a checkpoint is due
//! - Checking the cancellation flag and the run deadline at batch boundaries

use crate::config::CrawlerConfig;
use crate::record::PublisherNode;
use crate::state::RunStatus;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Hands out publisher batches in listing order
pub struct Scheduler {
    /// Batches not yet handed out
    batches: VecDeque<Vec<PublisherNode>>,

    total_batches: usize,

    /// Number of batches between checkpoints
    checkpoint_interval: u32,

    batches_since_checkpoint: u32,

    /// Run deadline, if a maximum run time is configured
    deadline: Option<Instant>,

    /// External cancellation signal
    cancel: Arc<AtomicBool>,
}

impl Scheduler {
    /// Creates a scheduler over the given publishers
    ///
    /// `max_publishers` truncates the list before batching. The deadline is
    /// measured from this call.
    pub fn new(config: &CrawlerConfig, mut publishers: Vec<PublisherNode>, cancel: Arc<AtomicBool>) -> Self {
        if let Some(limit) = config.max_publishers {
            publishers.truncate(limit);
        }

        let width = config.concurrency.max(1) as usize;
        let mut batches = VecDeque::new();
        let mut publishers = publishers.into_iter().peekable();
        while publishers.peek().is_some() {
            batches.push_back(publishers.by_ref().take(width).collect::<Vec<_>>());
        }

        Self {
            total_batches: batches.len(),
            batches,
            checkpoint_interval: config.checkpoint_interval.max(1),
            batches_since_checkpoint: 0,
            deadline: config.max_run_time().map(|limit| Instant::now() + limit),
            cancel,
        }
    }

    /// Returns the next batch, or None when every batch was handed out
    pub fn next_batch(&mut self) -> Option<Vec<PublisherNode>> {
        self.batches.pop_front()
    }

    /// Records a finished batch; returns true when a checkpoint is due
    pub fn batch_completed(&mut self) -> bool {
        self.batches_since_checkpoint += 1;
        if self.batches_since_checkpoint >= self.checkpoint_interval {
            self.batches_since_checkpoint = 0;
            true
        } else {
            false
        }
    }

    /// Checks whether the run must stop before the next batch
    pub fn stop_reason(&self) -> Option<RunStatus> {
        if self.cancel.load(Ordering::SeqCst) {
            return Some(RunStatus::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(RunStatus::TimedOut),
            _ => None,
        }
    }

    pub fn total_batches(&self) -> usize {
        self.total_batches
    }

    pub fn remaining_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

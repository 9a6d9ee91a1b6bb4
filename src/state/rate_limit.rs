use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Quota and pacing state derived from the most recent responses
///
/// Holds the server-reported quota (remaining requests and reset time) and
/// the time slot of the last issued request for the courtesy throttle. Owned
/// by the fetcher; never persisted.
#[derive(Debug, Clone, Default)]
pub struct RateLimitState {
    /// Requests remaining in the current quota window
    pub remaining_quota: Option<u64>,

    /// When the quota window resets
    pub reset_at: Option<DateTime<Utc>>,

    /// Time slot reserved by the most recent request
    pub last_request_slot: Option<Instant>,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records quota metadata from a response
    ///
    /// Fields missing from the response leave the previous value untouched.
    pub fn observe(&mut self, remaining: Option<u64>, reset_at: Option<DateTime<Utc>>) {
        if remaining.is_some() {
            self.remaining_quota = remaining;
        }
        if reset_at.is_some() {
            self.reset_at = reset_at;
        }
    }

    /// Returns true when the remaining quota is below the low-water mark
    pub fn is_below_low_water(&self, low_water_mark: u64) -> bool {
        matches!(self.remaining_quota, Some(remaining) if remaining < low_water_mark)
    }

    /// Calculates how long to pause before the next request for quota reasons
    ///
    /// Returns None if the quota is healthy, the reset time is unknown, or the
    /// reset time (plus margin) has already passed.
    pub fn quota_pause(
        &self,
        low_water_mark: u64,
        safety_margin: Duration,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        if !self.is_below_low_water(low_water_mark) {
            return None;
        }
        let deadline = self.reset_at? + chrono::Duration::from_std(safety_margin).ok()?;
        (deadline - now).to_std().ok().filter(|wait| !wait.is_zero())
    }

    /// Forgets the quota window after waiting it out
    pub fn clear_quota(&mut self) {
        self.remaining_quota = None;
        self.reset_at = None;
    }

    /// Reserves the next request slot under the courtesy throttle
    ///
    /// Slots are spaced at least `min_delay` apart. Returns how long the caller
    /// must wait before its slot begins.
    pub fn reserve_slot(&mut self, min_delay: Duration, now: Instant) -> Duration {
        let slot = match self.last_request_slot {
            Some(last) if last + min_delay > now => last + min_delay,
            _ => now,
        };
        self.last_request_slot = Some(slot);
        slot - now
    }
}

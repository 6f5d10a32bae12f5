//! Retry classification and decorrelated-jitter backoff

use rand::Rng;
use std::time::Duration;

use crate::error::BackendError;

/// HTTP statuses that signal transient backend unavailability.
const RETRYABLE_STATUSES: [u16; 7] = [429, 500, 502, 503, 520, 522, 524];

/// Decision for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Classifies failures and spaces retries with decorrelated jitter.
///
/// Each retry's delay is drawn uniformly from `[base, previous * 3]` and
/// capped, so a burst of concurrently failing tasks spreads apart instead of
/// retrying in lockstep the way plain exponential backoff would.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_retries,
            base,
            cap,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether this failure signals transient unavailability worth retrying.
    pub fn is_retryable(error: &BackendError) -> bool {
        match error {
            BackendError::Status { status, .. } => RETRYABLE_STATUSES.contains(status),
            BackendError::Timeout => true,
            BackendError::Transport(_) => true,
            BackendError::Task { retryable, .. } => *retryable,
            BackendError::InvalidResponse(_) => false,
            BackendError::DeadlineExceeded { .. } => false,
        }
    }

    /// Decide what to do after a failed attempt. `attempt` counts failures so
    /// far (1 after the first failure); `previous` is the delay used before
    /// this attempt, if any.
    pub fn decide<R: Rng>(
        &self,
        error: &BackendError,
        attempt: u32,
        previous: Option<Duration>,
        rng: &mut R,
    ) -> RetryDecision {
        if !Self::is_retryable(error) || attempt > self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.next_delay(previous, rng))
    }

    /// `delay = min(cap, uniform(base, previous * 3))`, seeded with
    /// `previous = base` on the first retry.
    pub fn next_delay<R: Rng>(&self, previous: Option<Duration>, rng: &mut R) -> Duration {
        let previous = previous.unwrap_or(self.base);
        let upper = (previous * 3).min(self.cap).max(self.base);
        let base_ms = self.base.as_millis() as u64;
        let upper_ms = upper.as_millis() as u64;
        let drawn = rng.gen_range(base_ms..=upper_ms);
        Duration::from_millis(drawn).min(self.cap)
    }
}

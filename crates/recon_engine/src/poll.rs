use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Upper bound on status polls for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxAttempts {
    Unbounded,
    Limited(u32),
}

impl MaxAttempts {
    fn allows(self, attempts_made: u32) -> bool {
        match self {
            MaxAttempts::Unbounded => true,
            MaxAttempts::Limited(limit) => attempts_made < limit,
        }
    }
}

/// Fixed-interval polling with an attempt bound. Timeouts are counted in
/// attempts, never in wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval_ms: u64,
    pub max_attempts: MaxAttempts,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: MaxAttempts) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            max_attempts,
        }
    }

    /// Upload ingestion: every second, 120 attempts.
    pub const fn upload() -> Self {
        Self::new(Duration::from_secs(1), MaxAttempts::Limited(120))
    }

    /// Reconciliation runs: every second until the run finishes.
    pub const fn reconcile() -> Self {
        Self::new(Duration::from_secs(1), MaxAttempts::Unbounded)
    }

    /// Remediation workflows: every five seconds, 60 attempts.
    pub const fn workflow() -> Self {
        Self::new(Duration::from_secs(5), MaxAttempts::Limited(60))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTick {
    /// Time to issue attempt number `n` (1-based).
    Attempt(u32),
    /// The bound was reached after this many attempts.
    Exhausted(u32),
    Cancelled,
}

/// Paces a poll loop. Cancellation is only observed while waiting, so a
/// request already in flight always runs to completion.
#[derive(Debug)]
pub struct Poller {
    policy: PollPolicy,
    cancel: CancellationToken,
    attempts: u32,
}

impl Poller {
    pub fn new(policy: PollPolicy, cancel: CancellationToken) -> Self {
        Self {
            policy,
            cancel,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub async fn next(&mut self) -> PollTick {
        if !self.policy.max_attempts.allows(self.attempts) {
            return PollTick::Exhausted(self.attempts);
        }
        if self.cancel.is_cancelled() {
            return PollTick::Cancelled;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return PollTick::Cancelled,
            _ = tokio::time::sleep(self.policy.interval()) => {}
        }
        self.attempts += 1;
        PollTick::Attempt(self.attempts)
    }
}

//! Retry classification and backoff state.
//!
//! [`classify`] decides whether a store error is worth retrying; [`Backoff`]
//! carries the growing delay for one unit of work. The bulk writer doubles its
//! backoff on every retry, while request-level retries grow by the factor the
//! decision carries.

use std::time::Duration;

use crate::store::{ErrorKind, StoreError};

/// Initial delay before the first retry of a group.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Growth applied by the bulk writer after each retried call, whether it
/// failed with a retryable error or handed items back.
pub const LADDER_BACKOFF_FACTOR: u32 = 2;

/// What to do after a failed store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Capacity exceeded or throttled: retry, request-level backoff x3.
    RetryThrottled,
    /// Store briefly unavailable: retry, request-level backoff x2.
    RetryTransient,
    /// Give up and report the error.
    Terminal,
}

impl RetryDecision {
    /// Multiplier for the backoff, or `None` when the error is terminal.
    pub const fn backoff_factor(self) -> Option<u32> {
        match self {
            RetryDecision::RetryThrottled => Some(3),
            RetryDecision::RetryTransient => Some(2),
            RetryDecision::Terminal => None,
        }
    }

    pub const fn is_retryable(self) -> bool {
        !matches!(self, RetryDecision::Terminal)
    }
}

/// Maps a store error to a retry decision. Unclassified errors are terminal.
pub fn classify(err: &StoreError) -> RetryDecision {
    match err.kind() {
        Some(ErrorKind::ThroughputExceeded | ErrorKind::Throttling) => {
            RetryDecision::RetryThrottled
        }
        Some(ErrorKind::ServiceUnavailable | ErrorKind::InternalFailure) => {
            RetryDecision::RetryTransient
        }
        _ => RetryDecision::Terminal,
    }
}

/// Mutable backoff owned by whoever is retrying.
///
/// Never shrinks: each [`wait`](Backoff::wait) sleeps for the current delay,
/// then grows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self { current: base }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Sleeps for the current delay, then multiplies it by `factor`.
    pub async fn wait(&mut self, factor: u32) {
        tokio::time::sleep(self.current).await;
        self.grow(factor);
    }

    pub fn grow(&mut self, factor: u32) {
        self.current = self.current.saturating_mul(factor.max(1));
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_BACKOFF)
    }
}

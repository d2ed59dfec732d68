//! Bounded exponential backoff shared by the content-service client and the
//! PDF render loop.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::cancel::Cancellation;

/// Returned when a backoff wait is interrupted by the job's cancellation token.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("cancelled while waiting to retry")]
pub struct Cancelled;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay before the second attempt; doubles for every attempt after that.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    /// 3 attempts, 1s then 2s between them.
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait after the given zero-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << attempt.min(16))
    }

    /// Whether another attempt follows the given zero-based attempt.
    pub fn has_next(&self, attempt: u32) -> bool {
        attempt + 1 < self.attempts
    }

    /// Sleeps for `delay_for(attempt)`, aborting early on cancellation.
    pub async fn backoff(
        &self,
        attempt: u32,
        what: &str,
        cancel: &Cancellation,
    ) -> Result<(), Cancelled> {
        let delay = self.delay_for(attempt);
        warn!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "{what} failed, retrying"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancel.cancelled() => Err(Cancelled),
        }
    }
}

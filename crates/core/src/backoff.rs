//! Retry policy for busy environments.
//!
//! Backoff is never slept through inside a worker. The dispatcher turns a
//! [`RetryDecision::Retry`] into a delayed re-submission of the same run
//! request with `retry_count + 1`.

use std::time::Duration;

/// Maximum number of busy-environment retries before giving up.
///
/// A run request therefore sees at most `MAX_RETRY + 1` dispatch attempts.
pub const MAX_RETRY: u32 = 10;

/// What to do after observing a busy environment at `retry_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-submit as attempt `next_retry` after `delay`.
    Retry { delay: Duration, next_retry: u32 },
    /// Give up; the request ends as `FAILED_TO_START`.
    Exhausted,
}

/// Delay before re-attempting after the `retry_count`-th busy observation.
///
/// `2^retry_count` seconds, starting at 1s for `retry_count == 0`.
pub fn backoff_delay(retry_count: u32) -> Duration {
    Duration::from_secs(1u64 << retry_count.min(63))
}

/// Decide whether a busy observation at `retry_count` is retried.
pub fn decide(retry_count: u32) -> RetryDecision {
    if retry_count < MAX_RETRY {
        RetryDecision::Retry {
            delay: backoff_delay(retry_count),
            next_retry: retry_count + 1,
        }
    } else {
        RetryDecision::Exhausted
    }
}

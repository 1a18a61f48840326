//! Retry policy for outbound HTTP calls.
//!
//! Upstream 502/503 answers usually mean the target service is still starting
//! or being redeployed, so those are retried with exponential backoff.

use reqwest::StatusCode;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for every retry after it.
    pub backoff_factor: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Response statuses that trigger a retry.
    pub retry_statuses: Vec<StatusCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_factor: Duration::from_millis(100),
            max_backoff: Duration::from_secs(120),
            retry_statuses: vec![StatusCode::BAD_GATEWAY, StatusCode::SERVICE_UNAVAILABLE],
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the specified number of attempts.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Create a policy that sends every request exactly once.
    pub fn no_retry() -> Self {
        Self::with_max_attempts(1)
    }

    /// Delay before retry number `retry` (1 for the first retry).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.backoff_factor
            .checked_mul(1u32 << exponent)
            .map_or(self.max_backoff, |backoff| backoff.min(self.max_backoff))
    }

    pub fn should_retry_status(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status)
    }
}

//! Bounded retry with exponential backoff
//!
//! Idempotent reads and the change request go through [`with_retry`];
//! mutations are sent once and their failures are surfaced immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::MirrorError;

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound on a single delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Retry budget and backoff curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles every attempt
    pub base_delay: Duration,
    /// Cap on a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based): base * 2^attempt, capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// An error that [`with_retry`] knows how to classify
pub trait RetryableError: Display {
    /// True if repeating the operation may succeed
    fn is_transient(&self) -> bool;

    /// Minimum wait requested by the other side, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RetryableError for MirrorError {
    fn is_transient(&self) -> bool {
        MirrorError::is_transient(self)
    }
}

/// Runs `f` until it succeeds, fails with a non-transient error, or the
/// retry budget is spent
///
/// The wait before a retry is the backoff delay, raised to the error's
/// `retry_after` hint and capped at `policy.max_delay`.
///
/// # Arguments
/// * `policy` - Retry budget and backoff curve
/// * `operation` - Name used in log records
/// * `f` - Produces a fresh future for every attempt
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, operation: &str, f: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() => {
                if attempt >= policy.max_retries {
                    warn!(operation, attempts = attempt + 1, error = %err, "Retry budget exhausted");
                    return Err(err);
                }
                let backoff = policy.delay_for(attempt);
                let delay = match err.retry_after() {
                    Some(hint) => backoff.max(hint).min(policy.max_delay),
                    None => backoff,
                };
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

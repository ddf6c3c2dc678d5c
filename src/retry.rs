//! Retry engine driven by error classification.
//!
//! [`execute_with_retry`] re-runs an async operation while it fails with a retryable
//! [`ClientError`], sleeping between attempts according to a [`RetryPolicy`]. Waits race
//! against a [`CancellationToken`] so a caller can abort a pending backoff at any time.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Ceiling applied to exponential delays unless a policy sets its own.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
/// Base delay used by adapters when building a policy from a [`ClientConfig`].
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Fraction of the capped delay that jitter may add on top of it.
const JITTER_RATIO: f64 = 0.25;

/// How the wait between two attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Always wait `base_delay`.
    Fixed,
    /// Wait `base_delay × (attempt + 1)`.
    Linear,
    /// Wait `base_delay × 2^attempt`, capped at `max_delay`.
    Exponential,
    /// Exponential delay plus bounded random noise.
    ExponentialWithJitter,
}

/// Limits and pacing for [`execute_with_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one; `0` means the operation runs exactly once.
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategy::Exponential,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, strategy: RetryStrategy, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy,
            base_delay,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Builds the policy an adapter applies to its network calls.
    ///
    /// Negative retry counts are treated as zero; [`crate::config::validate_config`]
    /// rejects them before a client is ever built.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            u32::try_from(config.retries).unwrap_or(0),
            config.retry_strategy,
            DEFAULT_BASE_DELAY,
        )
    }

    /// Delay to wait after the failed attempt number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.strategy {
            RetryStrategy::Fixed => self.base_delay,
            RetryStrategy::Linear => self.base_delay.saturating_mul(attempt.saturating_add(1)),
            RetryStrategy::Exponential => self.capped_exponential(attempt),
            RetryStrategy::ExponentialWithJitter => {
                let capped = self.capped_exponential(attempt);
                let bound = capped.mul_f64(JITTER_RATIO);
                if bound.is_zero() {
                    return capped;
                }
                let noise = rand::thread_rng().gen_range(Duration::ZERO..=bound);
                capped.saturating_add(noise)
            }
        }
    }

    fn capped_exponential(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or the policy is
/// exhausted.
///
/// The operation is invoked at most `policy.max_attempts + 1` times. A non-retryable error
/// is returned on first occurrence and the last retryable error is returned unchanged once
/// the attempts run out; no wait happens after the final attempt. If `cancel` fires while
/// waiting between attempts the call returns [`ClientError::cancelled`] immediately.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use chatdelta::error::ClientError;
/// use chatdelta::retry::{RetryPolicy, RetryStrategy, execute_with_retry};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let policy = RetryPolicy::new(2, RetryStrategy::Fixed, Duration::from_millis(1));
/// let mut calls = 0;
/// let result = execute_with_retry(&policy, &CancellationToken::new(), || {
///     calls += 1;
///     let attempt = calls;
///     async move {
///         if attempt < 2 {
///             Err(ClientError::server_error(503, "busy"))
///         } else {
///             Ok("done")
///         }
///     }
/// })
/// .await;
/// assert_eq!(result.unwrap(), "done");
/// assert_eq!(calls, 2);
/// # });
/// ```
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt: u32 = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            debug!(code = %err.code, "operation failed with non-retryable error");
            return Err(err);
        }
        if attempt >= policy.max_attempts {
            debug!(attempts = attempt + 1, code = %err.code, "retry attempts exhausted");
            return Err(err);
        }

        let delay = policy.delay_for(attempt);
        warn!(
            attempt = attempt + 1,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retryable failure, backing off"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::cancelled()),
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

/// Retries with exponential backoff from `base_delay`, capped at [`DEFAULT_MAX_DELAY`].
pub async fn execute_with_exponential_backoff<T, F, Fut>(
    cancel: &CancellationToken,
    retries: u32,
    base_delay: Duration,
    operation: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let policy = RetryPolicy::new(retries, RetryStrategy::Exponential, base_delay);
    execute_with_retry(&policy, cancel, operation).await
}

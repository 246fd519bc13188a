//! Retry policy implementation

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::duration_millis;
use crate::task::TaskError;

/// Exponential backoff with additive jitter
///
/// The delay before the k-th retry is `base_delay * 2^(k-1)` plus a jitter
/// drawn uniformly from `[0, max_jitter]`.
///
/// # Example
///
/// ```
/// use taskqueue::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(100))
///     .with_max_jitter(Duration::ZERO);
///
/// assert_eq!(policy.delay_for_retry(1), Duration::from_millis(100));
/// assert_eq!(policy.delay_for_retry(2), Duration::from_millis(200));
/// assert_eq!(policy.delay_for_retry(3), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; the action runs at most
    /// `max_retries + 1` times
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    /// Upper bound of the random delay added to every backoff
    #[serde(with = "duration_millis")]
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(100),
        }
    }
}

/// Information handed to the retry hook before each backoff sleep
#[derive(Debug)]
pub struct RetryAttempt<'a> {
    /// 1-based retry number (the attempt about to run is `retry + 1`)
    pub retry: u32,
    /// How long the policy will sleep before the retry
    pub delay: Duration,
    /// Failure of the attempt that just ran
    pub error: &'a TaskError,
}

/// Terminal outcome of a retried operation
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: TaskError,
    },
}

impl RetryError {
    /// Number of times the operation was invoked
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Cancelled { attempts } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl RetryPolicy {
    /// Create a policy with the default jitter bound
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Set the number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the jitter bound (zero disables jitter)
    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    /// Backoff before the k-th retry without jitter (1-based, saturating)
    pub fn backoff_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Full delay before the k-th retry, jitter included
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.backoff_for_retry(retry).saturating_add(self.jitter())
    }

    /// Check if another retry is allowed after `attempts` invocations
    pub fn has_retries_remaining(&self, attempts: u32) -> bool {
        attempts <= self.max_retries
    }

    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Run `op` until it succeeds, retries run out, or `cancel` fires
    pub async fn execute<R, F, Fut>(&self, cancel: &CancellationToken, op: F) -> Result<R, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<R, TaskError>>,
    {
        self.execute_with(cancel, op, |_| {}).await
    }

    /// Like [`execute`](Self::execute), calling `on_retry` before every
    /// backoff sleep
    ///
    /// `op` receives the 1-based attempt number. An `Err(TaskError::Cancelled)`
    /// from `op`, or any failure once `cancel` has fired, ends the loop as
    /// cancelled and is never retried.
    pub async fn execute_with<R, F, Fut, N>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
        mut on_retry: N,
    ) -> Result<R, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<R, TaskError>>,
        N: FnMut(RetryAttempt<'_>),
    {
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts });
            }

            attempts += 1;
            let error = match op(attempts).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if error.is_cancelled() || cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts });
            }

            if !self.has_retries_remaining(attempts) {
                return Err(RetryError::Exhausted {
                    attempts,
                    source: error,
                });
            }

            let delay = self.delay_for_retry(attempts);
            on_retry(RetryAttempt {
                retry: attempts,
                delay,
                error: &error,
            });

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

//! Retry with linear back-off around fallible upstream calls
//!
//! Attempt `n` that fails with a retryable error is followed by a wait of
//! `base_delay * n` before attempt `n + 1`. Non-retryable errors and the
//! failure of the last attempt are returned unchanged. Each call starts a
//! fresh attempt counter.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RetryConfig;

/// Outcome of a deadline-bounded retry sequence
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation failed terminally
    #[error("{0}")]
    Failed(E),

    /// The deadline passed before another attempt could start
    #[error("deadline elapsed after {attempts} attempt(s)")]
    DeadlineElapsed {
        attempts: u32,
        last_error: Option<E>,
    },
}

impl<E> RetryError<E> {
    /// The last operation error, if any attempt ran
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Failed(e) => Some(e),
            RetryError::DeadlineElapsed { last_error, .. } => last_error,
        }
    }
}

/// Retry policy: attempt ceiling and back-off step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// `max_attempts` is raised to 1 if zero
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.base_delay_ms))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// runs out of attempts
    pub async fn run<T, E, F, Fut, P>(&self, operation: &str, is_retryable: P, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && is_retryable(&e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(operation, attempt, error = %e, "Giving up");
                    return Err(e);
                }
            }
        }
    }

    /// Like `run`, but no attempt starts once `deadline` has passed
    ///
    /// A back-off wait is cut short at the deadline.
    pub async fn run_until<T, E, F, Fut, P>(
        &self,
        deadline: Instant,
        operation: &str,
        is_retryable: P,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempts = 0;
        let mut last_error = None;
        loop {
            if Instant::now() >= deadline {
                tracing::warn!(operation, attempts, "Deadline elapsed, not retrying");
                return Err(RetryError::DeadlineElapsed {
                    attempts,
                    last_error,
                });
            }

            attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempts < self.max_attempts && is_retryable(&e) => {
                    let delay = self.delay_for(attempts);
                    tracing::warn!(
                        operation,
                        attempt = attempts,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    last_error = Some(e);
                    tokio::time::sleep_until((Instant::now() + delay).min(deadline)).await;
                }
                Err(e) => {
                    tracing::warn!(operation, attempt = attempts, error = %e, "Giving up");
                    return Err(RetryError::Failed(e));
                }
            }
        }
    }
}

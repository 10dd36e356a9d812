//! Bounded retry with linear backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use super::error::ExecutorError;
use super::transient::is_transient;

/// Retry policy for whole transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (values below 1 behave as 1).
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `n × base_delay` before the next try.
    pub base_delay: Duration,
    /// Optional cap on a single wait.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    /// Create a linear policy.
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: None,
        }
    }

    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Delay after failed attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let linear = self.base_delay.saturating_mul(attempt);
        match self.max_delay {
            Some(cap) => linear.min(cap),
            None => linear,
        }
    }

    /// Check if another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}

/// Run `attempt_fn` until it succeeds, fails permanently, or the policy is
/// exhausted on transient failures.
///
/// The closure receives the 1-indexed attempt number and must redo all of its
/// work on every call (a fresh transaction, session pinning included).
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut attempt_fn: F,
) -> Result<T, ExecutorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) => {
                if !policy.should_retry(attempt) {
                    error!(
                        operation,
                        attempts = attempt,
                        error = %err,
                        "transient failures exhausted retry budget"
                    );
                    return Err(ExecutorError::ConnectionInterrupted {
                        operation,
                        attempts: attempt,
                        source: err,
                    });
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient database failure; retrying transaction"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                return Err(ExecutorError::Database {
                    operation,
                    source: err,
                });
            }
        }
    }
}

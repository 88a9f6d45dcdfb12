//! Retry with linear backoff.

use std::future::Future;
use std::time::Duration;

use crate::error::MuxError;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Policy allowing `retries` attempts after the first.
    pub fn with_retries(retries: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            backoff,
        }
    }

    /// Execute an async operation, retrying only errors that report
    /// [`MuxError::is_retryable`].
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, MuxError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, MuxError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !e.is_retryable() || attempt >= max_attempts {
                        return Err(e);
                    }

                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Retrying after error"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}

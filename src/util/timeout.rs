//! Deadlines for tool attempts and engine steps.

use std::future::Future;
use std::time::Duration;

use crate::error::{MuxError, Result};

/// Bound one tool attempt. Elapsing yields [`MuxError::Timeout`], which the
/// retry policy treats as retryable.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    within(duration, future, MuxError::Timeout).await
}

/// Bound the opening of an engine step. Elapsing yields
/// [`MuxError::GenerationTimeout`], which ends the generation as TimedOut.
pub async fn with_step_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    within(duration, future, MuxError::GenerationTimeout).await
}

async fn within<T>(
    duration: Duration,
    future: impl Future<Output = Result<T>>,
    elapsed: fn(u64) -> MuxError,
) -> Result<T> {
    tokio::time::timeout(duration, future)
        .await
        .unwrap_or_else(|_| Err(elapsed(duration.as_millis() as u64)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_attempt_reports_its_budget() {
        let err = with_timeout(Duration::from_millis(250), std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, MuxError::Timeout(250)));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_step_is_a_generation_timeout() {
        let err = with_step_timeout(Duration::from_secs(2), std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, MuxError::GenerationTimeout(2000)));
    }

    #[tokio::test]
    async fn inner_errors_pass_through() {
        let failing = async { Err::<(), _>(MuxError::Cancelled) };
        let result = with_step_timeout(Duration::from_secs(1), failing).await;
        assert!(matches!(result, Err(MuxError::Cancelled)));
    }
}

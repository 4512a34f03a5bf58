//! Retry with exponential backoff for transient provider errors
//!
//! Only overload-class errors are retried; cancellation and fatal errors
//! surface immediately. Delay doubles from the initial value up to a cap.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::model::GenerateError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Run `op` until it succeeds, fails non-transiently, or exhausts attempts.
pub async fn with_backoff<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, GenerateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenerateError>>,
{
    let mut delay = policy.initial_delay;

    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Provider overloaded, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
            }
            Err(e) => return Err(e),
        }
    }

    // Unreachable: the loop always returns on the final attempt.
    Err(GenerateError::Fatal("retry loop exhausted".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn retries_overloaded_until_success() {
        let attempts = AtomicU32::new(0);
        let result = with_backoff(fast_policy(), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(GenerateError::Overloaded("busy".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_do_not_retry() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(fast_policy(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(GenerateError::Fatal("bad request".into())) }
        })
        .await;

        assert!(matches!(result, Err(GenerateError::Fatal(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_does_not_retry() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(fast_policy(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(GenerateError::Cancelled) }
        })
        .await;

        assert!(matches!(result, Err(GenerateError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_last_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(fast_policy(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(GenerateError::Overloaded("still busy".into())) }
        })
        .await;

        assert!(matches!(result, Err(GenerateError::Overloaded(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }
}

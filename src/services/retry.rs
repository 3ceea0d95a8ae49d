//! Idempotent-tool retry helper (`spec.md` §4.3, §5).
//!
//! Generalizes the teacher's hand-rolled `RetryPolicy`
//! (`infrastructure/claude/retry.rs`, a manual `tokio::time::sleep` loop)
//! into a reusable helper built on the `backoff` crate, already in the
//! teacher's dependency table. Backoff is `100ms · 2^i` per `spec.md` §5,
//! capped at `max_retries` attempts, and only applied to errors the
//! taxonomy marks `retryable()`.

use std::future::Future;
use std::time::Duration;

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;

use crate::domain::errors::MediatorError;

/// Retries `operation` while it returns a `retryable()` [`MediatorError`],
/// backing off `100ms · 2^i` between attempts, up to `max_retries` retries
/// total (so `max_retries + 1` attempts at most).
pub async fn retry_idempotent<F, Fut, T>(max_retries: u32, mut operation: F) -> Result<T, MediatorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MediatorError>>,
{
    let backoff_policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(100))
        .with_multiplier(2.0)
        .with_max_elapsed_time(None)
        .build();

    let mut attempts_remaining = max_retries;
    retry(backoff_policy, || {
        let fut = operation();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(err) if err.retryable() && attempts_remaining > 0 => {
                    attempts_remaining -= 1;
                    Err(backoff::Error::transient(err))
                }
                Err(err) => Err(backoff::Error::permanent(err)),
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let attempts = AtomicU32::new(0);
        let result = retry_idempotent(3, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(MediatorError::BackpressureBusy("busy".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<i32, _> = retry_idempotent(3, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(MediatorError::InvalidIntent("bad".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausting_budget_surfaces_last_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<i32, _> = retry_idempotent(2, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(MediatorError::EmbeddingUnavailable("down".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}

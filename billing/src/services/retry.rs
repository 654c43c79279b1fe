use std::future::Future;
use std::time::Duration;

use rand::Rng;
use vpnshop_observability::log_retry;

use crate::errors::ServiceError;

const BASE_BACKOFF_MS: u64 = 10;

fn backoff(attempt: u32) -> Duration {
    let exp = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..=BASE_BACKOFF_MS);
    Duration::from_millis(exp + jitter)
}

/// Re-runs a whole transaction while the store reports a deadlock or
/// serialization failure. After `max_retries` extra attempts the caller gets
/// [`ServiceError::ConcurrencyConflict`].
pub async fn with_conflict_retry<T, F, Fut>(
    operation: &'static str,
    max_retries: u32,
    mut run: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let max_attempts = max_retries + 1;
    let mut attempt = 1;

    loop {
        match run().await {
            Err(ServiceError::DatabaseError(err)) if err.is_conflict() => {
                if attempt >= max_attempts {
                    tracing::error!(operation, attempts = attempt, error = %err, "Retry budget exhausted");
                    return Err(ServiceError::ConcurrencyConflict);
                }
                log_retry!(operation, attempt, max_attempts, err);
                tokio::time::sleep(backoff(attempt)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vpnshop_database::StoreError;

    #[tokio::test]
    async fn test_conflicts_are_retried_then_succeed() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_conflict_retry("test", 3, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ServiceError::DatabaseError(StoreError::Conflict("deadlock".to_string())))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_surfaces_conflict() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_conflict_retry("test", 2, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::DatabaseError(StoreError::Conflict("serialization".to_string())))
        })
        .await;

        assert!(matches!(result, Err(ServiceError::ConcurrencyConflict)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_domain_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_conflict_retry("test", 3, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::TrialAlreadyUsed)
        })
        .await;

        assert!(matches!(result, Err(ServiceError::TrialAlreadyUsed)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

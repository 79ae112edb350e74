pub mod conversation_service;
pub mod message_service;

pub use conversation_service::ConversationService;
pub use message_service::MessageService;

use crate::error::{AppError, AppResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry a storage operation once if it failed with a retryable error.
/// Backoff is short and jittered so concurrent retries do not re-collide.
pub async fn retry_once<T, F, Fut>(op: F) -> AppResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    match op().await {
        Err(e) if e.is_retryable() => {
            let backoff_ms = rand::thread_rng().gen_range(50..200);
            tracing::warn!(error = %e, backoff_ms, "retrying transient storage failure");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            op().await
        }
        other => other,
    }
}

/// Bound a storage call so a slow database cannot hang a connection's read
/// loop; elapsed calls surface as a retryable error.
pub async fn with_storage_timeout<T, Fut>(timeout_ms: u64, fut: Fut) -> AppResult<T>
where
    Fut: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::TransientStorage(format!(
            "storage call exceeded {timeout_ms}ms"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_once_retries_transient() {
        let attempts = AtomicU32::new(0);
        let result: AppResult<u32> = retry_once(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AppError::TransientStorage("pool wait".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_once_does_not_retry_permanent() {
        let attempts = AtomicU32::new(0);
        let result: AppResult<u32> = retry_once(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Forbidden) }
        })
        .await;

        assert!(matches!(result, Err(AppError::Forbidden)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_once_gives_up_after_second_failure() {
        let result: AppResult<u32> =
            retry_once(|| async { Err(AppError::TransientStorage("still down".into())) }).await;
        assert!(matches!(result, Err(AppError::TransientStorage(_))));
    }

    #[tokio::test]
    async fn test_storage_timeout_elapses() {
        let result: AppResult<u32> = with_storage_timeout(10, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;

        match result {
            Err(e) => assert!(e.is_retryable()),
            Ok(_) => panic!("expected timeout"),
        }
    }

    #[tokio::test]
    async fn test_storage_timeout_passes_through() {
        let result: AppResult<u32> = with_storage_timeout(1000, async { Ok(5) }).await;
        assert_eq!(result.unwrap(), 5);
    }
}

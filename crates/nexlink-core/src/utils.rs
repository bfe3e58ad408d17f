/*!
 * Utility functions and helpers for Nexlink.
 */
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Run a future with a timeout
///
/// Returns the result of the future, or a timeout error if the timeout
/// is reached.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout("Operation timed out")),
    }
}

/// Run a future with a timeout and retry on failure
///
/// `future_factory` creates a new future for each attempt. Returns the
/// first successful result, or the last error if all retries fail.
pub async fn with_retry<F, Fut, T>(
    duration: Duration,
    retries: usize,
    mut future_factory: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;
    let start = Instant::now();

    for i in 0..=retries {
        if i > 0 {
            debug!("Retry {}/{}", i, retries);
        }

        match timeout(duration, future_factory()).await {
            Ok(Ok(result)) => {
                if i > 0 {
                    debug!("Succeeded after {} retries", i);
                }
                return Ok(result);
            }
            Ok(Err(e)) => {
                warn!("Attempt {} failed: {}", i + 1, e);
                last_error = Some(e);
            }
            Err(_) => {
                warn!("Attempt {} timed out", i + 1);
                last_error = Some(Error::timeout("Operation timed out"));
            }
        }
    }

    warn!("All {} retries failed after {:?}", retries, start.elapsed());

    Err(last_error.unwrap_or_else(|| Error::other("Unknown error in retry loop")))
}

/// Spawn a background task and log its outcome
pub fn spawn_and_log<F, T, E>(name: &str, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let task_name = name.to_string();
    tokio::spawn(async move {
        match fut.await {
            Ok(_) => {
                debug!("Task '{}' completed successfully", task_name);
            }
            Err(e) => {
                warn!("Task '{}' failed: {}", task_name, e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, Error>(42)
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_retry_success_after_retries() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(Duration::from_secs(1), 3, move || {
            let current = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if current < 2 {
                    Err(Error::other("Intentional failure"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_all_failures() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(Duration::from_secs(1), 2, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::other("Intentional failure")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3); // Initial + 2 retries
    }

    #[tokio::test]
    async fn test_spawn_and_log() {
        let handle = spawn_and_log("ok-task", async { Ok::<_, Error>(1) });
        handle.await.unwrap();

        let handle = spawn_and_log("err-task", async { Err::<(), _>(Error::other("boom")) });
        handle.await.unwrap();
    }
}

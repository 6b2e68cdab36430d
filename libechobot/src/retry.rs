//! Retry wrapper shared by every remote call site
//!
//! Remote failures are never fatal: the call is repeated after a cooldown
//! until it succeeds or the worker is asked to stop.

use std::future::Future;
use std::time::Duration;
use tracing::error;

use crate::error::RemoteError;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait after every failure
    pub delay: Duration,
}

impl RetryPolicy {
    /// Same cooldown after every failure
    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }
}

/// Run `op` until it succeeds.
///
/// Every failure is logged at error level with `what` as context. Returns
/// `None` if stop is requested while waiting to retry; an attempt already in
/// flight is always allowed to finish.
pub async fn retry_forever<T, F, Fut>(
    policy: &RetryPolicy,
    shutdown: &Shutdown,
    what: &str,
    mut op: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Some(value),
            Err(e) => {
                let wait = policy.delay;
                error!(
                    operation = what,
                    attempt,
                    error = %e,
                    "An error occurred. Sleep for {}s and try again",
                    wait.as_secs_f64()
                );
                if shutdown.sleep(wait).await {
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retries_until_success() {
        let (_trigger, shutdown) = shutdown::channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy::fixed(Duration::from_millis(5));

        let counter = calls.clone();
        let result = retry_forever(&policy, &shutdown, "search", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(RemoteError::Request(format!("attempt {}", n)))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stop_during_cooldown_gives_up() {
        let (trigger, shutdown) = shutdown::channel();
        let policy = RetryPolicy::fixed(Duration::from_secs(600));

        let handle = tokio::spawn(async move {
            retry_forever(&policy, &shutdown, "post", || async {
                Err::<(), _>(RemoteError::Request("down".to_string()))
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();

        assert_eq!(handle.await.unwrap(), None);
    }
}

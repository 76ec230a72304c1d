//! Exponential-backoff retry for backend calls.
//!
//! Terminal failures (4xx, auth, preflight rejections) propagate on the
//! first attempt; transient failures (timeouts, connection errors, 5xx)
//! are retried with `min(base * 2^attempt, max_backoff)` delays. Sleeps
//! observe the enclosing chunk deadline and abandon further attempts
//! rather than overrun it.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{BackendError, BackendResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (0-based).
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Run `op` until it succeeds, fails terminally, exhausts retries, or
/// would sleep past `deadline`.
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    mut op: F,
) -> BackendResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BackendResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                warn!("{label} failed with non-retryable error: {e}");
                return Err(e);
            }
            Err(e) => {
                if attempt >= policy.max_retries {
                    warn!("{label} exhausted {} retries: {e}", policy.max_retries);
                    return Err(e);
                }
                let delay = policy.delay_for(attempt);
                if let Some(deadline) = deadline
                    && Instant::now() + delay >= deadline
                {
                    debug!("{label} abandoning retries: deadline would be exceeded");
                    return Err(e);
                }
                warn!(
                    "attempt {}/{} for {label} failed: {e}; retrying in {:.1}s",
                    attempt + 1,
                    policy.max_retries + 1,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn server_error() -> BackendError {
        BackendError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "boom".into())
    }

    fn client_error() -> BackendError {
        BackendError::from_status(StatusCode::BAD_REQUEST, "bad".into())
    }

    #[tokio::test]
    async fn test_success_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: BackendResult<u32> =
            retry_with_backoff("test", &RetryPolicy::default(), None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_invokes_exactly_once() {
        let calls = AtomicU32::new(0);
        let result: BackendResult<u32> =
            retry_with_backoff("test", &RetryPolicy::default(), None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(client_error()) }
            })
            .await;
        assert!(matches!(result, Err(BackendError::Client { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_exhausts_all_attempts() {
        let calls = AtomicU32::new(0);
        let result: BackendResult<u32> =
            retry_with_backoff("test", &RetryPolicy::default(), None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(server_error()) }
            })
            .await;
        assert!(matches!(result, Err(BackendError::Server { .. })));
        // 1 initial + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: BackendResult<u32> =
            retry_with_backoff("test", &RetryPolicy::default(), None, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 { Err(server_error()) } else { Ok(42) }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retries() {
        let calls = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_millis(500);
        let policy = RetryPolicy {
            base_backoff: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        let result: BackendResult<u32> = retry_with_backoff("test", &policy, Some(deadline), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(server_error()) }
        })
        .await;
        assert!(result.is_err());
        // First retry would sleep 1s past the 500ms deadline: one attempt only.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(16));
        assert_eq!(policy.delay_for(4), Duration::from_secs(30));
        assert_eq!(policy.delay_for(9), Duration::from_secs(30));
    }
}

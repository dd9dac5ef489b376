// Retry-with-backoff for asset fetches: exponential delay, capped, with jitter.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::CacheError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub max_retries: u32,
    /// Base delay between retries. Actual delay = base * 2^attempt + jitter.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// Adds random jitter of [0, base_delay/2).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Compute the delay for a given attempt number (0-indexed).
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails permanently, retries are exhausted
/// or `token` is cancelled. Retryability comes from [`CacheError::is_retryable`].
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, CacheError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, CacheError>>,
{
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() || attempt >= policy.max_retries {
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            attempt = attempt + 1,
            max = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying asset fetch after transient error"
        );
        tokio::select! {
            _ = token.cancelled() => return Err(CacheError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter: false,
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let p = policy(10);
        assert_eq!(p.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(40));
        assert_eq!(p.delay_for_attempt(10), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(40), Duration::from_millis(100));
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let p = RetryPolicy {
            jitter: true,
            ..policy(10)
        };
        for attempt in 0..8 {
            assert!(p.delay_for_attempt(attempt) <= p.max_delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result = retry_with_backoff(&policy(3), &token, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CacheError::http_status(StatusCode::BAD_GATEWAY, "u"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<(), _> = retry_with_backoff(&policy(3), &token, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CacheError::http_status(StatusCode::NOT_FOUND, "u")) }
        })
        .await;
        assert!(matches!(result, Err(CacheError::HttpStatus { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<(), _> = retry_with_backoff(&policy(2), &token, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CacheError::http_status(StatusCode::SERVICE_UNAVAILABLE, "u")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<(), _> =
            retry_with_backoff(&policy(3), &token, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(CacheError::Cancelled)));
    }
}

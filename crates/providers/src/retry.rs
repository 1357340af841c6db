//! Bounded retry with exponential backoff and jitter for provider calls.

use crate::ProviderError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based). A server supplied
    /// `Retry-After` wins over the computed backoff.
    pub fn delay_for(&self, attempt: usize, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_delay);
        }
        let capped = attempt.min(6) as u32;
        let backoff = self.base_delay.saturating_mul(1 << capped);
        let jitter_ceiling = (self.base_delay.as_millis() as u64 / 2).max(1);
        let jitter = rand::thread_rng().gen_range(0..=jitter_ceiling);
        (backoff + Duration::from_millis(jitter)).min(self.max_delay)
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                attempt += 1;
                let delay = policy.delay_for(attempt, err.retry_after());
                warn!(
                    "{} failed ({}), retrying in {:?} ({}/{})",
                    label, err, delay, attempt, policy.max_attempts
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn retries_throttling_until_success() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let out = with_retry(&fast(4), "embed", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ProviderError::Throttled {
                    status: 429,
                    retry_after: None,
                })
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let res: Result<(), _> = with_retry(&fast(5), "embed", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::RequestFailed("status 400".into()))
        })
        .await;
        assert!(res.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let res: Result<(), _> = with_retry(&fast(3), "ocr", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Server {
                status: 502,
                body: String::new(),
            })
        })
        .await;
        assert!(matches!(res, Err(ProviderError::Server { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_respects_cap_and_hint() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
        };
        assert!(policy.delay_for(10, None) <= Duration::from_secs(2));
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_millis(700))),
            Duration::from_millis(700)
        );
        assert!(policy.delay_for(1, None) >= Duration::from_millis(1000));
    }
}

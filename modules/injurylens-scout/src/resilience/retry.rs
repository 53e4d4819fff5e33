use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use injurylens_common::config::RetryConfig;
use injurylens_common::CallError;

/// Exponential backoff with jitter. Only [`CallError::Transient`] is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// `base * 2^attempt` plus up to `base` of jitter, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let exp = base_ms.saturating_mul(1u64 << attempt.min(16));
        let jitter = rand::rng().random_range(0..=base_ms);
        Duration::from_millis(exp.saturating_add(jitter)).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails non-transiently, or retries run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        what,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast(3)
            .run("test", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(CallError::Transient("429".into()))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = fast(2)
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CallError::Transient("503".into()))
            })
            .await;
        assert!(matches!(result, Err(CallError::Transient(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_and_malformed_are_not_retried() {
        for err in [CallError::Permanent("401".into()), CallError::Malformed("empty".into())] {
            let counter = AtomicU32::new(0);
            let calls = &counter;
            let result: Result<(), _> = fast(3)
                .run("test", || {
                    let err = err.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(err)
                    }
                })
                .await;
            assert_eq!(result, Err(err));
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1000), Duration::from_millis(12_000));
        let first = policy.delay_for(0);
        assert!(first >= Duration::from_millis(1000) && first <= Duration::from_millis(2000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(12_000));
        assert_eq!(RetryPolicy::none().delay_for(3), Duration::ZERO);
    }
}

//! Retry policy with exponential backoff and jitter

use crate::config::RetrySettings;
use crate::error::ProviderError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry policy applied to every provider call before the breaker sees the outcome
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
    pub attempt_timeout: Duration,
    pub rate_limit_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay(),
            multiplier: settings.multiplier,
            max_delay: settings.max_delay(),
            jitter: settings.jitter,
            attempt_timeout: settings.attempt_timeout(),
            rate_limit_multiplier: settings.rate_limit_multiplier,
        }
    }
}

/// Successful result of a retried operation
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    pub failed_attempts: u32,
}

/// Final error once retries are exhausted or a non-retryable error occurred
#[derive(Debug)]
pub struct Exhausted {
    pub error: ProviderError,
    pub failed_attempts: u32,
}

impl RetryPolicy {
    /// Deterministic backoff for a zero-based attempt index
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(32) as i32);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay before the next attempt, given the error that ended this one
    pub fn delay_for(&self, attempt: u32, error: &ProviderError) -> Duration {
        let mut delay = self.backoff(attempt);

        if self.jitter && !delay.is_zero() {
            let half = delay.as_millis() as u64 / 2;
            let extra = rand::thread_rng().gen_range(0..=half);
            delay += Duration::from_millis(extra);
        }

        if let ProviderError::RateLimited { retry_after } = error {
            delay = delay.mul_f64(self.rate_limit_multiplier);
            if let Some(hint) = retry_after {
                delay = delay.max(*hint);
            }
        }

        delay.min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error or attempts run out
    ///
    /// The closure receives the zero-based attempt number. Each attempt is
    /// bounded by `attempt_timeout`; an elapsed timeout counts as a failure.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<Attempted<T>, Exhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(self.attempt_timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };

            let error = match outcome {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        failed_attempts: attempt,
                    })
                }
                Err(e) => e,
            };

            let failed_attempts = attempt + 1;
            if !error.is_retryable() || failed_attempts >= self.max_attempts {
                return Err(Exhausted {
                    error,
                    failed_attempts,
                });
            }

            let delay = self.delay_for(attempt, &error);
            debug!(attempt = failed_attempts, delay_ms = delay.as_millis() as u64, error = %error, "Retrying provider call");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(10),
            jitter: false,
            attempt_timeout: Duration::from_millis(200),
            rate_limit_multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter: false,
            ..fast_policy()
        };

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_half() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
            ..fast_policy()
        };

        for _ in 0..50 {
            let delay = policy.delay_for(0, &ProviderError::Timeout);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_rate_limit_honours_retry_after() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: false,
            ..fast_policy()
        };

        let plain = policy.delay_for(0, &ProviderError::RateLimited { retry_after: None });
        assert_eq!(plain, Duration::from_millis(200));

        let hinted = policy.delay_for(
            0,
            &ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(3)),
            },
        );
        assert_eq!(hinted, Duration::from_secs(3));

        let capped = policy.delay_for(
            0,
            &ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(60)),
            },
        );
        assert_eq!(capped, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_fail_fail_succeed() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = fast_policy()
            .run(move |_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ProviderError::Network("reset".to_string()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, "ok");
        assert_eq!(result.failed_attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = fast_policy()
            .run(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ProviderError::Unauthorized) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.error, ProviderError::Unauthorized);
        assert_eq!(err.failed_attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_failure() {
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(20),
            max_attempts: 2,
            ..fast_policy()
        };

        let err = policy
            .run(|_| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, ProviderError>(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.error, ProviderError::Timeout);
        assert_eq!(err.failed_attempts, 2);
    }
}

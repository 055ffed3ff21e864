//! Throttle handling: bounded retries that honor `Retry-After`

use super::limiter::SlidingWindowLimiter;
use super::ProviderError;
use crate::shutdown::Shutdown;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    /// Retries after the first attempt before giving up
    pub max_retries: u32,
    /// Wait used when the provider sends no usable `Retry-After`
    pub default_backoff: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            default_backoff: Duration::from_secs(1),
        }
    }
}

/// Outcome of one attempt at a throttled call
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Throttled { retry_after: Option<Duration> },
}

/// Per-request retry state
#[derive(Debug)]
pub struct ThrottleBackoff {
    policy: ThrottlePolicy,
    current_attempt: u32,
}

impl ThrottleBackoff {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy,
            current_attempt: 0,
        }
    }

    /// Sleep before the next retry, or fail once the budget is spent.
    ///
    /// The reported attempt count includes the initial request.
    pub async fn sleep(
        &mut self,
        retry_after: Option<Duration>,
        shutdown: &Shutdown,
    ) -> Result<(), ProviderError> {
        if self.current_attempt >= self.policy.max_retries {
            return Err(ProviderError::Throttled {
                attempts: self.current_attempt + 1,
            });
        }

        let delay = retry_after.unwrap_or(self.policy.default_backoff);

        log::warn!(
            "⏳ Provider throttled, retry {} of {} in {}ms",
            self.current_attempt + 1,
            self.policy.max_retries,
            delay.as_millis()
        );

        let mut shutdown = shutdown.clone();
        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.wait() => return Err(ProviderError::Cancelled),
        }

        self.current_attempt += 1;
        Ok(())
    }
}

/// Run `op` under the limiter, retrying while the provider throttles.
///
/// Every attempt (retries included) takes a limiter slot. Errors other than
/// throttling are returned immediately.
pub async fn with_throttle_retry<T, F, Fut>(
    limiter: &SlidingWindowLimiter,
    policy: ThrottlePolicy,
    shutdown: &Shutdown,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt<T>, ProviderError>>,
{
    let mut backoff = ThrottleBackoff::new(policy);
    loop {
        limiter.acquire(shutdown).await?;
        match op().await? {
            Attempt::Done(value) => return Ok(value),
            Attempt::Throttled { retry_after } => backoff.sleep(retry_after, shutdown).await?,
        }
    }
}

/// Parse a delay-seconds `Retry-After` header
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::limiter::LimiterConfig;
    use reqwest::header::HeaderValue;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn roomy_limiter() -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(LimiterConfig {
            max_per_second: 100,
            max_per_minute: 1000,
        })
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(3)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_once_then_succeeds_honoring_retry_after() {
        let limiter = roomy_limiter();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = with_throttle_retry(&limiter, ThrottlePolicy::default(), &Shutdown::never(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(Attempt::Throttled {
                        retry_after: Some(Duration::from_secs(4)),
                    })
                } else {
                    Ok(Attempt::Done("ok"))
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_backoff_without_retry_after() {
        let limiter = roomy_limiter();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = with_throttle_retry(&limiter, ThrottlePolicy::default(), &Shutdown::never(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Ok(Attempt::Throttled { retry_after: None })
                } else {
                    Ok(Attempt::Done(n))
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let limiter = roomy_limiter();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> =
            with_throttle_retry(&limiter, ThrottlePolicy::default(), &Shutdown::never(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Attempt::Throttled { retry_after: None }) }
            })
            .await;

        // One initial attempt plus five retries
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert!(matches!(result, Err(ProviderError::Throttled { attempts: 6 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let limiter = roomy_limiter();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> =
            with_throttle_retry(&limiter, ThrottlePolicy::default(), &Shutdown::never(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ProviderError::Status {
                        status: 503,
                        body: "unavailable".to_string(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ProviderError::Status { status: 503, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_consume_limiter_slots() {
        let limiter = SlidingWindowLimiter::new(LimiterConfig {
            max_per_second: 1,
            max_per_minute: 100,
        });
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let policy = ThrottlePolicy {
            max_retries: 5,
            default_backoff: Duration::from_millis(10),
        };
        with_throttle_retry(&limiter, policy, &Shutdown::never(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(Attempt::Throttled { retry_after: None })
                } else {
                    Ok(Attempt::Done(()))
                }
            }
        })
        .await
        .unwrap();

        // Backoff is 10ms but the retry still waits for the 1/s budget
        assert!(start.elapsed() >= Duration::from_secs(1));
    }
}

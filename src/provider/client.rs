//! Rate-limited HTTP client
//!
//! Wraps a `reqwest::Client` with the shared [`SlidingWindowLimiter`] and
//! the throttle retry loop. Network errors and non-429 statuses are returned
//! as-is; only throttling is retried here.

use super::limiter::SlidingWindowLimiter;
use super::retry::{retry_after, with_throttle_retry, Attempt, ThrottlePolicy};
use super::ProviderError;
use crate::shutdown::Shutdown;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct RateLimitedClient {
    http: reqwest::Client,
    limiter: Arc<SlidingWindowLimiter>,
    policy: ThrottlePolicy,
    shutdown: Shutdown,
}

impl RateLimitedClient {
    pub fn new(
        limiter: Arc<SlidingWindowLimiter>,
        policy: ThrottlePolicy,
        shutdown: Shutdown,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("hypeatlas/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            limiter,
            policy,
            shutdown,
        })
    }

    /// Underlying client, for calls that sit outside the provider budget
    /// (OAuth token endpoint)
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter> {
        &self.limiter
    }

    /// Send a request built by `build`, retrying on HTTP 429.
    ///
    /// `build` is called once per attempt since a `RequestBuilder` is
    /// consumed by `send`.
    pub async fn send<F>(&self, build: F) -> Result<Response, ProviderError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let http = &self.http;
        let build = &build;

        with_throttle_retry(&self.limiter, self.policy, &self.shutdown, move || async move {
            let response = build(http).send().await?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after(response.headers());
                log::debug!("🚦 Provider answered 429 (retry-after: {:?})", wait);
                return Ok(Attempt::Throttled { retry_after: wait });
            }

            Ok(Attempt::Done(response))
        })
        .await
    }
}

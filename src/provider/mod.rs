//! Outbound access to live-streaming providers
//!
//! Every request to a provider goes through one shared
//! [`SlidingWindowLimiter`] (per-second and per-minute ceilings). Provider
//! throttling (HTTP 429) is retried inside [`RateLimitedClient`] up to a
//! bounded count; every other failure is handed back to the caller, which
//! decides whether to skip the batch.
//!
//! ## Module Organization
//!
//! - `limiter` - dual sliding-window request budget
//! - `retry` - throttle backoff and `Retry-After` parsing
//! - `client` - rate-limited HTTP client (limiter + throttle retry)
//! - `token` - short-lived bearer token cache with serialized refresh
//! - `twitch` - Twitch Helix implementation of [`StreamProvider`]

pub mod client;
pub mod limiter;
pub mod retry;
pub mod token;
pub mod twitch;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use client::RateLimitedClient;
pub use limiter::{LimiterConfig, SlidingWindowLimiter};
pub use retry::ThrottlePolicy;
pub use token::{AccessToken, TokenCache};
pub use twitch::{TwitchClient, TwitchConfig, TwitchStream};

/// Hard cap on identifiers per provider call (Twitch `user_login` limit)
pub const MAX_BATCH: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("batch of {size} handles exceeds provider maximum {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("could not decode provider payload: {0}")]
    Decode(String),

    /// Still throttled after the retry budget was spent
    #[error("provider throttled after {attempts} attempts")]
    Throttled { attempts: u32 },

    #[error("request cancelled by shutdown")]
    Cancelled,
}

/// Provider-side view of one handle, before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderPayload {
    Twitch(TwitchStream),
    /// Minimal `{viewers, is_live, language}` status report
    Status(StatusPayload),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub viewers: Option<i64>,
    #[serde(default)]
    pub is_live: Option<bool>,
    #[serde(default)]
    pub language: Option<String>,
    /// Unix seconds
    #[serde(default)]
    pub started_at: Option<i64>,
}

/// A provider that reports live status for a batch of handles
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Lowercase platform key stored on creators ("twitch")
    fn platform(&self) -> &str;

    /// Largest batch one call accepts
    fn max_batch(&self) -> usize {
        MAX_BATCH
    }

    /// Public channel URL for a handle
    fn channel_url(&self, handle: &str) -> String;

    /// Fetch status for at most `max_batch()` handles.
    ///
    /// The returned map is keyed by lowercase handle and only contains the
    /// handles the provider reported on; absent handles are simply not
    /// streaming.
    async fn fetch_live(
        &self,
        handles: &[String],
    ) -> Result<HashMap<String, ProviderPayload>, ProviderError>;
}

/// Split `items` into consecutive batches of at most `size`, keeping order
pub fn chunk<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    items.chunks(size).map(|c| c.to_vec()).collect()
}

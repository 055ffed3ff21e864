//! Twitch Helix integration
//!
//! Live status for up to 100 logins per call via `GET /helix/streams`.
//! Authentication uses the OAuth client-credentials grant; the app token is
//! cached in a [`TokenCache`] and refreshed shortly before it expires.
//!
//! ## API Reference
//!
//! - Token: `POST https://id.twitch.tv/oauth2/token`
//! - Streams: `GET https://api.twitch.tv/helix/streams?user_login=a&user_login=b&first=100`
//!
//! Only channels that are currently broadcasting appear in `data`.

use super::client::RateLimitedClient;
use super::token::{AccessToken, TokenCache};
use super::{ProviderError, ProviderPayload, StreamProvider, MAX_BATCH};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const PLATFORM: &str = "twitch";

const OAUTH_URL: &str = "https://id.twitch.tv/oauth2/token";
const API_BASE: &str = "https://api.twitch.tv/helix";

#[derive(Debug, Clone)]
pub struct TwitchConfig {
    pub client_id: String,
    pub client_secret: String,
    pub oauth_url: String,
    pub api_base: String,
}

impl TwitchConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            oauth_url: OAUTH_URL.to_string(),
            api_base: API_BASE.to_string(),
        }
    }
}

/// One entry of the Helix `streams` response (fields we read)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwitchStream {
    #[serde(default)]
    pub user_login: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub viewer_count: Option<i64>,
    /// "live", or "" on error
    #[serde(default, rename = "type")]
    pub stream_type: Option<String>,
    /// RFC 3339
    #[serde(default)]
    pub started_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    #[serde(default)]
    data: Vec<TwitchStream>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

pub struct TwitchClient {
    config: TwitchConfig,
    client: RateLimitedClient,
    tokens: TokenCache,
}

impl TwitchClient {
    pub fn new(config: TwitchConfig, client: RateLimitedClient) -> Self {
        Self {
            config,
            client,
            tokens: TokenCache::default(),
        }
    }

    async fn request_token(&self) -> Result<AccessToken, ProviderError> {
        let response = self
            .client
            .http()
            .post(&self.config.oauth_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Auth(format!(
                "twitch oauth returned {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        log::info!("🔑 Twitch app token refreshed (expires in {}s)", body.expires_in);

        Ok(AccessToken::expiring_in(
            body.access_token,
            Duration::from_secs(body.expires_in),
        ))
    }
}

#[async_trait]
impl StreamProvider for TwitchClient {
    fn platform(&self) -> &str {
        PLATFORM
    }

    fn channel_url(&self, handle: &str) -> String {
        format!("https://twitch.tv/{}", handle)
    }

    async fn fetch_live(
        &self,
        handles: &[String],
    ) -> Result<HashMap<String, ProviderPayload>, ProviderError> {
        let logins: Vec<String> = handles
            .iter()
            .map(|h| h.trim().to_lowercase())
            .filter(|h| !h.is_empty())
            .collect();

        if logins.is_empty() {
            return Ok(HashMap::new());
        }
        if logins.len() > MAX_BATCH {
            return Err(ProviderError::BatchTooLarge {
                size: logins.len(),
                max: MAX_BATCH,
            });
        }

        let token = self.tokens.get_or_refresh(|| self.request_token()).await?;

        let url = format!("{}/streams", self.config.api_base);
        let mut query: Vec<(&str, &str)> = logins.iter().map(|l| ("user_login", l.as_str())).collect();
        query.push(("first", "100"));

        let response = self
            .client
            .send(|http| {
                http.get(&url)
                    .query(&query)
                    .header("Client-Id", &self.config.client_id)
                    .bearer_auth(&token)
            })
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
            return Err(ProviderError::Auth("twitch rejected app token".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: StreamsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        log::debug!("📡 Twitch reported {}/{} logins live", body.data.len(), logins.len());

        Ok(body
            .data
            .into_iter()
            .map(|s| (s.user_login.to_lowercase(), ProviderPayload::Twitch(s)))
            .collect())
    }
}

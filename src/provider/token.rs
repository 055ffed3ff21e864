//! Cached bearer token with serialized refresh

use super::ProviderError;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Refresh this long before the provider-declared expiry
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: Instant,
}

impl AccessToken {
    pub fn expiring_in(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }
}

/// Holds the current token. The lock stays held across a refresh, so
/// concurrent callers queue behind one refresh instead of starting their own.
#[derive(Debug)]
pub struct TokenCache {
    current: Mutex<Option<AccessToken>>,
    margin: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_SAFETY_MARGIN)
    }
}

impl TokenCache {
    pub fn new(margin: Duration) -> Self {
        Self {
            current: Mutex::new(None),
            margin,
        }
    }

    /// Return a token valid for at least the safety margin, refreshing first if needed
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, ProviderError>>,
    {
        let mut current = self.current.lock().await;

        if let Some(token) = current.as_ref() {
            if Instant::now() + self.margin < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        log::debug!("🔑 Refreshing provider access token");
        let fresh = refresh().await?;
        let value = fresh.value.clone();
        *current = Some(fresh);
        Ok(value)
    }

    /// Drop the cached token (e.g. after a 401)
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_token_reused_until_margin() {
        let cache = TokenCache::default();
        let refreshes = AtomicU32::new(0);
        let counter = &refreshes;

        let refresh = move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken::expiring_in(format!("tok-{}", n), Duration::from_secs(3600)))
        };

        assert_eq!(cache.get_or_refresh(refresh).await.unwrap(), "tok-0");
        assert_eq!(cache.get_or_refresh(refresh).await.unwrap(), "tok-0");

        // 59m30s later the token is inside the 60s margin
        tokio::time::advance(Duration::from_secs(3570)).await;
        assert_eq!(cache.get_or_refresh(refresh).await.unwrap(), "tok-1");
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let cache = Arc::new(TokenCache::default());
        let refreshes = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let refreshes = refreshes.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(|| async move {
                        refreshes.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(AccessToken::expiring_in("shared".to_string(), Duration::from_secs(3600)))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "shared");
        }
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_not_cached() {
        let cache = TokenCache::default();

        let result = cache
            .get_or_refresh(|| async { Err(ProviderError::Auth("bad secret".to_string())) })
            .await;
        assert!(matches!(result, Err(ProviderError::Auth(_))));

        let token = cache
            .get_or_refresh(|| async {
                Ok(AccessToken::expiring_in("good".to_string(), Duration::from_secs(3600)))
            })
            .await
            .unwrap();
        assert_eq!(token, "good");
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let cache = TokenCache::default();
        let fresh = |v: &'static str| {
            move || async move { Ok(AccessToken::expiring_in(v.to_string(), Duration::from_secs(3600))) }
        };

        assert_eq!(cache.get_or_refresh(fresh("a")).await.unwrap(), "a");
        cache.invalidate().await;
        assert_eq!(cache.get_or_refresh(fresh("b")).await.unwrap(), "b");
    }
}

//! Runtime configuration from environment variables
//!
//! Every value has a default; unparsable or non-positive numbers fall back
//! to it. Twitch ingestion is enabled only when both credentials are set.

use crate::provider::{LimiterConfig, ThrottlePolicy, TwitchConfig, MAX_BATCH};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub db_path: String,
    pub schema_dir: String,
    /// Time between cycle starts
    pub interval: Duration,
    /// Sweeper grace period
    pub stale_after: Duration,
    /// HypeMap leniency window for recently seen rows
    pub active_window: Duration,
    pub twitch: Option<TwitchConfig>,
    pub limiter: LimiterConfig,
    pub throttle: ThrottlePolicy,
    /// 1..=100
    pub batch_size: usize,
    pub fetch_parallelism: usize,
    pub comps_feed_path: Option<PathBuf>,
    pub default_game: String,
    /// Twitch handles registered on start-up
    pub seed_handles: Vec<String>,
}

fn positive<T>(key: &str, default: T) -> T
where
    T: FromStr + PartialOrd + Default,
{
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .filter(|v: &T| *v > T::default())
        .unwrap_or(default)
}

/// Whole minutes from `key`, saturating on absurdly large values
fn minutes(key: &str, default: u64) -> Duration {
    Duration::from_secs(positive(key, default).saturating_mul(60))
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl WorkerConfig {
    /// Environment variables:
    /// - `HYPEATLAS_DB_PATH` (default: hypeatlas.db)
    /// - `HYPEATLAS_SCHEMA_DIR` (default: sql)
    /// - `WORKER_INTERVAL_SEC` (default: 30)
    /// - `WORKER_STALE_MINUTES` (default: 10)
    /// - `HYPEMAP_ACTIVE_MINUTES` (default: 5)
    /// - `TWITCH_CLIENT_ID`, `TWITCH_SECRET`
    /// - `PROVIDER_MAX_PER_SECOND` (default: 18)
    /// - `PROVIDER_MAX_PER_MINUTE` (default: 95)
    /// - `PROVIDER_MAX_RETRIES` (default: 5)
    /// - `PROVIDER_BATCH_SIZE` (default: 100, at most 100)
    /// - `FETCH_PARALLELISM` (default: 2)
    /// - `COMPS_FEED_PATH` (optional)
    /// - `DEFAULT_GAME` (default: val)
    /// - `TWITCH_HANDLES` (comma-separated, optional)
    pub fn from_env() -> Self {
        let twitch = match (non_empty("TWITCH_CLIENT_ID"), non_empty("TWITCH_SECRET")) {
            (Some(id), Some(secret)) => Some(TwitchConfig::new(id, secret)),
            _ => None,
        };

        let seed_handles = env::var("TWITCH_HANDLES")
            .map(|s| {
                s.split(',')
                    .map(|h| h.trim().to_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            db_path: non_empty("HYPEATLAS_DB_PATH").unwrap_or_else(|| "hypeatlas.db".to_string()),
            schema_dir: non_empty("HYPEATLAS_SCHEMA_DIR").unwrap_or_else(|| "sql".to_string()),
            interval: Duration::from_secs(positive("WORKER_INTERVAL_SEC", 30)),
            stale_after: minutes("WORKER_STALE_MINUTES", 10),
            active_window: minutes("HYPEMAP_ACTIVE_MINUTES", 5),
            twitch,
            limiter: LimiterConfig {
                max_per_second: positive("PROVIDER_MAX_PER_SECOND", 18),
                max_per_minute: positive("PROVIDER_MAX_PER_MINUTE", 95),
            },
            throttle: ThrottlePolicy {
                max_retries: positive("PROVIDER_MAX_RETRIES", 5),
                ..ThrottlePolicy::default()
            },
            batch_size: positive("PROVIDER_BATCH_SIZE", MAX_BATCH).min(MAX_BATCH),
            fetch_parallelism: positive("FETCH_PARALLELISM", 2),
            comps_feed_path: non_empty("COMPS_FEED_PATH").map(PathBuf::from),
            default_game: non_empty("DEFAULT_GAME").unwrap_or_else(|| "val".to_string()),
            seed_handles,
        }
    }
}

//! Ingestion worker
//!
//! Runs one ingestion cycle every `WORKER_INTERVAL_SEC`: Twitch live status
//! for tracked creators, the optional composition feed, then the staleness
//! sweep. CTRL+C stops scheduling; the running cycle is allowed to finish.
//!
//! Usage:
//!   cargo run --release --bin worker
//!
//! See `WorkerConfig::from_env` for the environment variables.

use dotenv::dotenv;
use hypeatlas::clock::{Clock, SystemClock};
use hypeatlas::config::WorkerConfig;
use hypeatlas::pipeline::{
    run_scheduler, IngestionCycle, IngestionSettings, JsonlCompositionFeed, StalenessSweeper,
};
use hypeatlas::provider::{twitch, RateLimitedClient, SlidingWindowLimiter, TwitchClient};
use hypeatlas::shutdown;
use hypeatlas::store::SqliteStore;
use log::{error, info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = WorkerConfig::from_env();

    info!("🚀 Starting HypeAtlas worker");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Interval: {}s", config.interval.as_secs());
    info!("   ├─ Stale after: {}s", config.stale_after.as_secs());
    info!(
        "   ├─ Provider budget: {}/s, {}/min, {} retries",
        config.limiter.max_per_second, config.limiter.max_per_minute, config.throttle.max_retries
    );
    info!(
        "   └─ Batch size: {} (parallelism {})",
        config.batch_size, config.fetch_parallelism
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    info!("🔧 Initializing database...");
    let store = Arc::new(SqliteStore::open(&config.db_path, clock.clone())?);
    store.migrate(&config.schema_dir)?;

    for handle in &config.seed_handles {
        if let Err(e) = store.track_creator(twitch::PLATFORM, handle, true) {
            warn!("⚠️  Could not track {}: {}", handle, e);
        }
    }
    if !config.seed_handles.is_empty() {
        info!("✅ Tracking {} seeded Twitch handles", config.seed_handles.len());
    }

    let (trigger, shutdown) = shutdown::channel();

    let sweeper = StalenessSweeper::new(store.clone(), config.stale_after);
    let mut cycle = IngestionCycle::new(
        store.clone(),
        clock.clone(),
        sweeper,
        IngestionSettings {
            batch_size: config.batch_size,
            parallelism: config.fetch_parallelism,
            default_game: config.default_game.clone(),
        },
    );

    match &config.twitch {
        Some(twitch_config) => {
            let limiter = Arc::new(SlidingWindowLimiter::new(config.limiter));
            let client = RateLimitedClient::new(limiter, config.throttle, shutdown.clone())?;
            cycle = cycle.with_provider(Arc::new(TwitchClient::new(twitch_config.clone(), client)));
            info!("✅ Twitch ingestion enabled");
        }
        None => {
            warn!("⚠️  TWITCH_CLIENT_ID / TWITCH_SECRET not set, Twitch ingestion disabled");
        }
    }

    if let Some(path) = &config.comps_feed_path {
        let feed = JsonlCompositionFeed::new(path);
        info!("✅ Composition feed: {}", feed.path().display());
        cycle = cycle.with_feed(Arc::new(feed));
    }

    let scheduler = tokio::spawn(run_scheduler(Arc::new(cycle), config.interval, shutdown));

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, finishing current cycle...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    trigger.trigger();

    match scheduler.await {
        Ok(cycles) => info!("✅ Worker stopped after {} cycles", cycles),
        Err(e) => error!("❌ Scheduler task failed: {}", e),
    }

    Ok(())
}

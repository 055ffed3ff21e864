//! Time-decay of liveness
//!
//! A co-stream that stays `is_live` without a fresh signal for longer than
//! the grace period is flipped offline. Rows are never deleted.

use crate::store::{IngestStore, StoreError};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_GRACE: Duration = Duration::from_secs(10 * 60);

pub struct StalenessSweeper {
    store: Arc<dyn IngestStore>,
    grace: Duration,
}

impl StalenessSweeper {
    /// A zero grace falls back to [`DEFAULT_GRACE`]
    pub fn new(store: Arc<dyn IngestStore>, grace: Duration) -> Self {
        let grace = if grace.is_zero() { DEFAULT_GRACE } else { grace };
        Self { store, grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Sweep with the configured grace
    pub async fn run(&self) -> Result<usize, StoreError> {
        self.sweep(self.grace).await
    }

    /// Rows flipped offline. Zero is a normal result.
    pub async fn sweep(&self, older_than: Duration) -> Result<usize, StoreError> {
        let flipped = self.store.sweep_stale(older_than).await?;

        if flipped > 0 {
            log::info!("🧹 Marked {} stale co-streams offline (older than {}s)", flipped, older_than.as_secs());
        } else {
            log::debug!("🧹 No stale co-streams");
        }

        Ok(flipped)
    }
}

//! Periodic driver for ingestion cycles
//!
//! One cycle at a time. A cycle that overruns the interval delays the next
//! tick instead of overlapping it. Shutdown stops new cycles from starting
//! but never interrupts the one in flight.

use super::ingestion::{CycleReport, IngestionCycle};
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self) -> CycleReport;
}

#[async_trait]
impl CycleRunner for IngestionCycle {
    async fn run_cycle(&self) -> CycleReport {
        self.run_once().await
    }
}

/// Run cycles every `every` until `shutdown` fires. The first cycle starts
/// immediately. Returns the number of cycles that ran.
pub async fn run_scheduler(runner: Arc<dyn CycleRunner>, every: Duration, mut shutdown: Shutdown) -> u64 {
    log::info!("⏰ Starting ingestion scheduler (interval: {}s)", every.as_secs());

    let mut timer = interval(every.max(Duration::from_millis(1)));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycles = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = timer.tick() => {}
        }

        if shutdown.is_triggered() {
            break;
        }

        cycles += 1;
        log::debug!("🔄 Cycle {} starting", cycles);
        runner.run_cycle().await;
    }

    log::info!("🛑 Scheduler stopped after {} cycles", cycles);
    cycles
}

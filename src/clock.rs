//! Wall-clock source shared by the store, the sweeper and the ranking engine
//!
//! Everything that stamps or compares `last_seen_at` reads time through a
//! [`Clock`], so tests can pin "now" instead of sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Source of the current Unix timestamp (seconds)
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Real time via chrono
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Settable clock for tests and replays
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// `now - span` in Unix seconds, saturating instead of wrapping
pub fn cutoff(now: i64, span: Duration) -> i64 {
    now.saturating_sub(i64::try_from(span.as_secs()).unwrap_or(i64::MAX))
}

//! Dual sliding-window request budget
//!
//! Two windows of request timestamps are kept, one spanning the last second
//! and one spanning the last minute. A request is admitted only when both
//! windows are below their ceilings; otherwise the caller sleeps until the
//! oldest blocking timestamp falls out of its window.
//!
//! Timestamps use `tokio::time::Instant`, so tests running on a paused tokio
//! clock exercise the real waiting logic without wall-clock sleeps.

use super::ProviderError;
use crate::shutdown::Shutdown;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    pub max_per_second: usize,
    pub max_per_minute: usize,
}

impl Default for LimiterConfig {
    /// 18/s and 95/min, just under the provider's published 20/100
    fn default() -> Self {
        Self {
            max_per_second: 18,
            max_per_minute: 95,
        }
    }
}

/// Timestamps of admitted requests, one queue per window
#[derive(Debug)]
pub struct SlidingWindows {
    config: LimiterConfig,
    second: VecDeque<Instant>,
    minute: VecDeque<Instant>,
}

impl SlidingWindows {
    pub fn new(config: LimiterConfig) -> Self {
        let config = LimiterConfig {
            max_per_second: config.max_per_second.max(1),
            max_per_minute: config.max_per_minute.max(1),
        };
        Self {
            config,
            second: VecDeque::with_capacity(config.max_per_second),
            minute: VecDeque::with_capacity(config.max_per_minute),
        }
    }

    fn prune(&mut self, now: Instant) {
        evict_older_than(&mut self.second, now, SECOND);
        evict_older_than(&mut self.minute, now, MINUTE);
    }

    /// Admit a request at `now`, or report how long to wait before retrying
    pub fn admit(&mut self, now: Instant) -> Result<(), Duration> {
        self.prune(now);

        let wait = wait_for_room(&self.second, now, SECOND, self.config.max_per_second)
            .max(wait_for_room(&self.minute, now, MINUTE, self.config.max_per_minute));

        if !wait.is_zero() {
            return Err(wait);
        }

        self.second.push_back(now);
        self.minute.push_back(now);
        Ok(())
    }

    /// Requests currently counted against the (second, minute) windows
    pub fn in_flight(&mut self, now: Instant) -> (usize, usize) {
        self.prune(now);
        (self.second.len(), self.minute.len())
    }
}

fn evict_older_than(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while let Some(&oldest) = window.front() {
        if now.saturating_duration_since(oldest) >= span {
            window.pop_front();
        } else {
            break;
        }
    }
}

/// Time until the window has fewer than `max` entries
fn wait_for_room(window: &VecDeque<Instant>, now: Instant, span: Duration, max: usize) -> Duration {
    if window.len() < max {
        return Duration::ZERO;
    }
    // The entry that must expire for the count to drop below max
    let blocking = window[window.len() - max];
    span.saturating_sub(now.saturating_duration_since(blocking))
}

/// Lock-protected limiter shared by every caller of one provider
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    windows: Mutex<SlidingWindows>,
}

impl SlidingWindowLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            windows: Mutex::new(SlidingWindows::new(config)),
        }
    }

    /// Wait until a request may leave, then count it.
    ///
    /// The lock is held only while checking; sleeping happens outside it.
    /// Returns `Cancelled` as soon as `shutdown` fires.
    pub async fn acquire(&self, shutdown: &Shutdown) -> Result<(), ProviderError> {
        let mut shutdown = shutdown.clone();
        loop {
            if shutdown.is_triggered() {
                return Err(ProviderError::Cancelled);
            }

            let wait = {
                let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
                match windows.admit(Instant::now()) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };

            log::debug!("⏳ Rate limiter full, waiting {}ms", wait.as_millis());

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.wait() => return Err(ProviderError::Cancelled),
            }
        }
    }

    pub fn in_flight(&self) -> (usize, usize) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.in_flight(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use std::sync::Arc;

    fn config(per_second: usize, per_minute: usize) -> LimiterConfig {
        LimiterConfig {
            max_per_second: per_second,
            max_per_minute: per_minute,
        }
    }

    #[test]
    fn test_admit_blocks_at_per_second_ceiling() {
        let mut windows = SlidingWindows::new(config(3, 100));
        let t0 = Instant::now();

        assert!(windows.admit(t0).is_ok());
        assert!(windows.admit(t0 + Duration::from_millis(100)).is_ok());
        assert!(windows.admit(t0 + Duration::from_millis(200)).is_ok());

        // Fourth request must wait until t0 leaves the 1s window
        let wait = windows.admit(t0 + Duration::from_millis(300)).unwrap_err();
        assert_eq!(wait, Duration::from_millis(700));

        assert!(windows.admit(t0 + SECOND).is_ok());
    }

    #[test]
    fn test_admit_blocks_at_per_minute_ceiling() {
        let mut windows = SlidingWindows::new(config(10, 5));
        let t0 = Instant::now();

        for i in 0..5 {
            assert!(windows.admit(t0 + Duration::from_secs(i * 2)).is_ok());
        }

        let wait = windows.admit(t0 + Duration::from_secs(10)).unwrap_err();
        assert_eq!(wait, Duration::from_secs(50));

        assert!(windows.admit(t0 + MINUTE).is_ok());
        assert_eq!(windows.in_flight(t0 + MINUTE), (1, 5));
    }

    #[test]
    fn test_rejected_attempt_is_not_counted() {
        let mut windows = SlidingWindows::new(config(1, 100));
        let t0 = Instant::now();

        assert!(windows.admit(t0).is_ok());
        assert!(windows.admit(t0).is_err());
        assert!(windows.admit(t0).is_err());
        assert_eq!(windows.in_flight(t0), (1, 1));
    }

    #[test]
    fn test_zero_ceilings_are_raised_to_one() {
        let mut windows = SlidingWindows::new(config(0, 0));
        let t0 = Instant::now();
        assert!(windows.admit(t0).is_ok());
        assert!(windows.admit(t0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_sleeps_until_window_frees() {
        let limiter = SlidingWindowLimiter::new(config(2, 100));
        let shutdown = Shutdown::never();
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire(&shutdown).await.unwrap();
        }

        assert!(start.elapsed() >= SECOND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_is_cancelled_by_shutdown() {
        let limiter = Arc::new(SlidingWindowLimiter::new(config(1, 1)));
        let (trigger, shutdown) = shutdown::channel();

        limiter.acquire(&shutdown).await.unwrap();

        // Next slot is a full minute away; shutdown must cut the wait short
        let waiter = {
            let limiter = limiter.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { limiter.acquire(&shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.trigger();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }
}

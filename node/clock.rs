//! Time sources for the producer loop and the simulation.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tenure_consensus::Timestamp;

/// Millisecond clock the host schedules against.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    /// Resolve once `now() >= at`.
    async fn sleep_until(&self, at: Timestamp);
}

/// Unix wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }

    async fn sleep_until(&self, at: Timestamp) {
        let wait = at.saturating_sub(self.now());
        if wait > 0 {
            tokio::time::sleep(Duration::from_millis(wait)).await;
        }
    }
}

/// Clock driven by tokio's timer, offset to `base`. Follows paused test time.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
    base: Timestamp,
}

impl TokioClock {
    pub fn starting_at(base: Timestamp) -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            base,
        }
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Timestamp {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.base.saturating_add(elapsed)
    }

    async fn sleep_until(&self, at: Timestamp) {
        let offset = Duration::from_millis(at.saturating_sub(self.base));
        tokio::time::sleep_until(self.origin + offset).await;
    }
}

/// Clock that only moves when told to. Sleeping jumps straight to the target.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move to `at`; never moves backward.
    pub fn set(&self, at: Timestamp) {
        self.now.fetch_max(at, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| Some(t.saturating_add(ms)));
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep_until(&self, at: Timestamp) {
        self.set(at);
    }
}

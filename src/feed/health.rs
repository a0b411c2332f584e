//! Shared connection health between stream readers, watchdog and poller.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Point-in-time view of the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHealth {
    pub last_tick_at: DateTime<Utc>,
    pub stale: bool,
}

/// Last real tick time and the stale flag, updated lock-free.
#[derive(Debug)]
pub struct FeedHealth {
    origin: Instant,
    /// Milliseconds after `origin`
    last_tick_ms: AtomicU64,
    stale: AtomicBool,
}

impl Default for FeedHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedHealth {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_tick_ms: AtomicU64::new(0),
            stale: AtomicBool::new(false),
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// A real stream tick arrived.
    pub fn record_tick(&self) {
        self.last_tick_ms.store(self.now_ms(), Ordering::SeqCst);
        self.stale.store(false, Ordering::SeqCst);
    }

    /// Restart the age clock for a new connection without clearing `stale`.
    pub fn reset_baseline(&self) {
        self.last_tick_ms.store(self.now_ms(), Ordering::SeqCst);
    }

    pub fn tick_age(&self) -> Duration {
        let last = self.last_tick_ms.load(Ordering::SeqCst);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    /// Set the stale flag. Returns true only when it was not already set.
    pub fn mark_stale(&self) -> bool {
        !self.stale.swap(true, Ordering::SeqCst)
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ConnectionHealth {
        let age = chrono::Duration::from_std(self.tick_age()).unwrap_or_default();
        ConnectionHealth {
            last_tick_at: Utc::now() - age,
            stale: self.is_stale(),
        }
    }
}

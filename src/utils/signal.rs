//! Cooperative stop flag shared between background tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often an idle task checks its stop signal between timer ticks.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Cloneable stop flag. Tasks poll it on each timer tick; nothing is preempted.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this signal to wind down.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

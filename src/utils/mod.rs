//! Shared utilities: cooperative cancellation for background tasks.

mod signal;

pub use signal::{StopSignal, STOP_POLL_INTERVAL};

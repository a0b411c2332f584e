//! Live price feed.
//!
//! Websocket streams, a staleness watchdog and a REST fallback poller all
//! publish `PriceTick`s onto one channel. The supervisor rebuilds the
//! transport on failure without touching anything downstream.

mod extract;
mod health;
mod supervisor;
mod watchdog;

pub use extract::extract_price;
pub use health::{ConnectionHealth, FeedHealth};
pub use supervisor::FeedSupervisor;
pub use watchdog::{run_fallback_poller, run_watchdog, StalenessPolicy};

use crate::exchange::PriceStream;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Where a tick came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSource {
    AggTrade,
    MarkPrice,
    /// REST poll while the streams are stale
    Fallback,
}

impl From<PriceStream> for TickSource {
    fn from(stream: PriceStream) -> Self {
        match stream {
            PriceStream::AggTrade => TickSource::AggTrade,
            PriceStream::MarkPrice => TickSource::MarkPrice,
        }
    }
}

/// One observed price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceTick {
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
    pub source: TickSource,
}

impl PriceTick {
    pub fn new(price: Decimal, source: TickSource) -> Self {
        Self {
            price,
            observed_at: Utc::now(),
            source,
        }
    }
}

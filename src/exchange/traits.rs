//! Collaborator traits for market data and account access.
//!
//! The pipeline only talks to these traits, so the live Binance client and
//! the paper-trading mock are interchangeable.

use super::error::ExchangeError;
use super::types::{NewOrder, OrderResponse, PositionSnapshot};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt;

/// Pull-side market data for a single instrument.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Latest price from the ticker endpoint.
    async fn current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Closing prices of the `limit` most recent completed bars, oldest first.
    async fn recent_closes(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> Result<Vec<Decimal>, ExchangeError>;
}

/// Authenticated account and order operations.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Free (available) balance of `asset`.
    async fn free_balance(&self, asset: &str) -> Result<Decimal, ExchangeError>;

    /// Submit a market order.
    async fn place_market_order(&self, order: &NewOrder) -> Result<OrderResponse, ExchangeError>;

    /// Current one-way position for `symbol`. Flat positions report size zero.
    async fn position(&self, symbol: &str) -> Result<PositionSnapshot, ExchangeError>;
}

/// Which account backend is executing orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    Live,
    Mock,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Live => write!(f, "LIVE"),
            TradingMode::Mock => write!(f, "MOCK"),
        }
    }
}

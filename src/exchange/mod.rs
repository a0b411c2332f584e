//! Exchange integrations for the renko trader.
//!
//! ## Binance
//! Provides REST and WebSocket connectivity for:
//! - Market data (ticker price, klines, trade and mark price streams)
//! - Account operations (balance, position, market orders)
//!
//! ## Mock
//! Paper-trading account that fills at a live or fixed price.

mod client;
mod error;
pub mod mock;
mod traits;
mod types;
mod websocket;

pub use client::BinanceClient;
pub use error::{ErrorClass, ExchangeError};
pub use mock::MockExchange;
pub use traits::{AccountService, MarketData, TradingMode};
pub use types::*;
pub use websocket::{BinanceWebSocket, PriceStream, StreamEnd};

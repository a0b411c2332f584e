//! # Renko Trader
//!
//! A Renko brick trend follower for Binance USD-M futures.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Binance API client (REST + WebSocket) and the paper-trading mock
//! - `feed`: Live price streams, staleness watchdog, fallback polling and reconnects
//! - `renko`: Fixed-box brick aggregation
//! - `indicators`: EMA and Wilder RSI over brick closes
//! - `strategy`: FLAT/LONG/SHORT state machine
//! - `execution`: Order sizing, submission, session renewal and confirmation
//! - `warmup`: Historical priming of bricks and indicators
//! - `pipeline`: Single consumer driving everything above, one tick at a time
//! - `replay`: Offline replay of recorded prices
//! - `utils`: Cooperative stop signal shared by background tasks

pub mod config;
pub mod exchange;
pub mod execution;
pub mod feed;
pub mod indicators;
pub mod pipeline;
pub mod renko;
pub mod replay;
pub mod strategy;
pub mod utils;
pub mod warmup;

pub use config::Config;

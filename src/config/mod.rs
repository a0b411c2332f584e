//! Configuration management for the renko trader.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Binance API credentials
    #[serde(default)]
    pub binance: BinanceConfig,
    /// Traded instrument and one-shot account setup
    #[serde(default)]
    pub instrument: InstrumentConfig,
    /// Brick geometry
    #[serde(default)]
    pub bricks: BrickConfig,
    /// Indicator lengths
    #[serde(default)]
    pub indicators: IndicatorConfig,
    /// Entry bands and debounce scope
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Order sizing
    #[serde(default)]
    pub sizing: SizingConfig,
    /// Live feed, staleness and reconnection
    #[serde(default)]
    pub feed: FeedConfig,
    /// Historical warm-up
    #[serde(default)]
    pub warmup: WarmupConfig,
    /// Order submission and confirmation
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Futures symbol, e.g. BTCUSDT
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Asset whose free balance funds new entries
    #[serde(default = "default_margin_asset")]
    pub margin_asset: String,
    /// Leverage applied once at startup in live mode
    #[serde(default = "default_leverage")]
    pub leverage: u8,
    /// Use cross margin (true) or isolated margin (false)
    #[serde(default = "default_cross_margin")]
    pub cross_margin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrickConfig {
    /// Absolute price delta of one brick
    #[serde(default = "default_box_size")]
    pub box_size: Decimal,
    /// Boxes price must travel against the trend to reverse
    #[serde(default = "default_reversal")]
    pub reversal: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_ema_fast")]
    pub ema_fast: usize,
    #[serde(default = "default_ema_slow")]
    pub ema_slow: usize,
    #[serde(default = "default_rsi_length")]
    pub rsi_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Inclusive RSI band for long entries
    #[serde(default = "default_rsi_long_min")]
    pub rsi_long_min: f64,
    #[serde(default = "default_rsi_long_max")]
    pub rsi_long_max: f64,
    /// Inclusive RSI band for short entries
    #[serde(default = "default_rsi_short_min")]
    pub rsi_short_min: f64,
    #[serde(default = "default_rsi_short_max")]
    pub rsi_short_max: f64,
    /// Allow an opposite entry in the same brick that stopped the position
    #[serde(default = "default_true")]
    pub allow_same_brick_reversal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Share of free margin balance committed per entry (0.0-1.0)
    #[serde(default = "default_balance_fraction")]
    pub balance_fraction: Decimal,
    /// Smallest order quantity the strategy will send
    #[serde(default = "default_min_quantity")]
    pub min_quantity: Decimal,
    /// Instrument quantity step
    #[serde(default = "default_quantity_step")]
    pub quantity_step: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Subscribe to the mark price stream next to aggregate trades
    #[serde(default = "default_true")]
    pub use_mark_price: bool,
    /// Websocket keep-alive ping period
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// How often the watchdog checks tick age
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,
    /// Silence after which the feed is considered stale
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    /// Silence after which the transport is rebuilt
    #[serde(default = "default_reconnect_after")]
    pub reconnect_after_secs: u64,
    /// Poll the ticker endpoint while the feed is stale
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    #[serde(default = "default_fallback_interval")]
    pub fallback_interval_secs: u64,
    /// Randomized reconnect backoff bounds
    #[serde(default = "default_backoff_min")]
    pub reconnect_backoff_min_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub reconnect_backoff_max_ms: u64,
    /// Capacity of the tick channel feeding the pipeline
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of historical klines replayed at startup
    #[serde(default = "default_warmup_bars")]
    pub bars: u16,
    /// Kline interval, e.g. "1m"
    #[serde(default = "default_warmup_interval")]
    pub interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Confirm each order by watching the exchange position move
    #[serde(default = "default_true")]
    pub confirm_position: bool,
    /// Delay between confirmation samples
    #[serde(default = "default_confirm_delay")]
    pub confirm_delay_ms: u64,
    /// Confirmation samples before giving up
    #[serde(default = "default_confirm_attempts")]
    pub confirm_attempts: u32,
    /// REST request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_margin_asset() -> String {
    "USDT".to_string()
}

fn default_leverage() -> u8 {
    1
}

fn default_cross_margin() -> bool {
    true
}

fn default_box_size() -> Decimal {
    Decimal::new(550, 0)
}

fn default_reversal() -> u32 {
    2
}

fn default_ema_fast() -> usize {
    9
}

fn default_ema_slow() -> usize {
    21
}

fn default_rsi_length() -> usize {
    14
}

fn default_rsi_long_min() -> f64 {
    40.0
}

fn default_rsi_long_max() -> f64 {
    65.0
}

fn default_rsi_short_min() -> f64 {
    35.0
}

fn default_rsi_short_max() -> f64 {
    60.0
}

fn default_balance_fraction() -> Decimal {
    Decimal::new(85, 2) // 0.85
}

fn default_min_quantity() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_quantity_step() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_ping_interval() -> u64 {
    30
}

fn default_watchdog_interval() -> u64 {
    5
}

fn default_stale_after() -> u64 {
    10
}

fn default_reconnect_after() -> u64 {
    180
}

fn default_fallback_interval() -> u64 {
    2
}

fn default_backoff_min() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    3000
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_warmup_bars() -> u16 {
    500
}

fn default_warmup_interval() -> String {
    "1m".to_string()
}

fn default_confirm_delay() -> u64 {
    750
}

fn default_confirm_attempts() -> u32 {
    4
}

fn default_request_timeout() -> u64 {
    10
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("RENKO"))
            .build()
            .context("Failed to build configuration")?;

        let mut config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Plain credential variables are honoured when the prefixed ones are absent
        if config.binance.api_key.is_empty() {
            config.binance.api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
        }
        if config.binance.secret_key.is_empty() {
            config.binance.secret_key = std::env::var("BINANCE_SECRET_KEY").unwrap_or_default();
        }

        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.bricks.box_size > Decimal::ZERO,
            "box_size must be positive"
        );

        anyhow::ensure!(self.bricks.reversal >= 1, "reversal must be >= 1");

        anyhow::ensure!(
            self.indicators.ema_fast >= 1
                && self.indicators.ema_slow >= 1
                && self.indicators.rsi_length >= 1,
            "indicator lengths must be >= 1"
        );

        anyhow::ensure!(
            self.strategy.rsi_long_min <= self.strategy.rsi_long_max
                && self.strategy.rsi_short_min <= self.strategy.rsi_short_max,
            "RSI entry bands must be ordered min <= max"
        );

        anyhow::ensure!(
            self.sizing.balance_fraction > Decimal::ZERO
                && self.sizing.balance_fraction <= Decimal::ONE,
            "balance_fraction must be between 0 and 1"
        );

        anyhow::ensure!(
            self.sizing.quantity_step > Decimal::ZERO && self.sizing.min_quantity > Decimal::ZERO,
            "quantity_step and min_quantity must be positive"
        );

        anyhow::ensure!(
            self.feed.stale_after_secs < self.feed.reconnect_after_secs,
            "stale_after_secs must be shorter than reconnect_after_secs"
        );

        anyhow::ensure!(
            self.feed.reconnect_backoff_min_ms <= self.feed.reconnect_backoff_max_ms,
            "reconnect backoff bounds must be ordered min <= max"
        );

        anyhow::ensure!(
            self.feed.watchdog_interval_secs >= 1 && self.feed.fallback_interval_secs >= 1,
            "watchdog and fallback intervals must be at least one second"
        );

        anyhow::ensure!(
            self.feed.ping_interval_secs >= 1,
            "ping_interval_secs must be at least one second"
        );

        anyhow::ensure!(
            self.feed.channel_capacity >= 1,
            "channel_capacity must be at least 1"
        );

        Ok(())
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            testnet: false,
        }
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            margin_asset: default_margin_asset(),
            leverage: default_leverage(),
            cross_margin: default_cross_margin(),
        }
    }
}

impl Default for BrickConfig {
    fn default() -> Self {
        Self {
            box_size: default_box_size(),
            reversal: default_reversal(),
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ema_fast: default_ema_fast(),
            ema_slow: default_ema_slow(),
            rsi_length: default_rsi_length(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            rsi_long_min: default_rsi_long_min(),
            rsi_long_max: default_rsi_long_max(),
            rsi_short_min: default_rsi_short_min(),
            rsi_short_max: default_rsi_short_max(),
            allow_same_brick_reversal: true,
        }
    }
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            balance_fraction: default_balance_fraction(),
            min_quantity: default_min_quantity(),
            quantity_step: default_quantity_step(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            use_mark_price: true,
            ping_interval_secs: default_ping_interval(),
            watchdog_interval_secs: default_watchdog_interval(),
            stale_after_secs: default_stale_after(),
            reconnect_after_secs: default_reconnect_after(),
            fallback_enabled: true,
            fallback_interval_secs: default_fallback_interval(),
            reconnect_backoff_min_ms: default_backoff_min(),
            reconnect_backoff_max_ms: default_backoff_max(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bars: default_warmup_bars(),
            interval: default_warmup_interval(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            confirm_position: true,
            confirm_delay_ms: default_confirm_delay(),
            confirm_attempts: default_confirm_attempts(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

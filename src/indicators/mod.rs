//! Brick-driven technical indicators.
//!
//! The engine is updated once per brick close, never per tick:
//! - EMA fast / slow
//! - Wilder RSI

mod ema;
mod rsi;

pub use ema::Ema;
pub use rsi::Rsi;

use crate::config::IndicatorConfig;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

/// Indicator outputs after the latest brick. A field is `None` until its
/// indicator has seen enough bricks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub rsi: Option<f64>,
}

/// Fully defined indicator values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorValues {
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub rsi: f64,
}

impl IndicatorSnapshot {
    /// All three values, or `None` while any is still warming up.
    pub fn values(&self) -> Option<IndicatorValues> {
        Some(IndicatorValues {
            ema_fast: self.ema_fast?,
            ema_slow: self.ema_slow?,
            rsi: self.rsi?,
        })
    }
}

/// Running EMA(fast), EMA(slow) and RSI over brick closes.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    ema_fast: Ema,
    ema_slow: Ema,
    rsi: Rsi,
    bricks_seen: u64,
    snapshot: IndicatorSnapshot,
}

impl IndicatorEngine {
    pub fn new(fast: usize, slow: usize, rsi_length: usize) -> Self {
        Self {
            ema_fast: Ema::new(fast),
            ema_slow: Ema::new(slow),
            rsi: Rsi::new(rsi_length),
            bricks_seen: 0,
            snapshot: IndicatorSnapshot::default(),
        }
    }

    pub fn from_config(config: &IndicatorConfig) -> Self {
        Self::new(config.ema_fast, config.ema_slow, config.rsi_length)
    }

    /// Feed one brick close.
    pub fn update(&mut self, close: Decimal) -> IndicatorSnapshot {
        let x = close.to_f64().unwrap_or_default();

        let fast = self.ema_fast.update(x);
        let slow = self.ema_slow.update(x);
        let rsi = self.rsi.update(x);
        self.bricks_seen += 1;

        self.snapshot = IndicatorSnapshot {
            ema_fast: self.ema_fast.is_ready().then_some(fast),
            ema_slow: self.ema_slow.is_ready().then_some(slow),
            rsi: rsi.filter(|_| self.rsi.is_ready()),
        };
        self.snapshot
    }

    pub fn snapshot(&self) -> IndicatorSnapshot {
        self.snapshot
    }

    pub fn bricks_seen(&self) -> u64 {
        self.bricks_seen
    }
}

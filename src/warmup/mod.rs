//! Historical warm-up of bricks and indicators before live trading.
//!
//! Recent klines are replayed through the aggregator so the indicators are
//! defined from the first live brick. The aggregator is then re-anchored at
//! the current price; no orders are ever sent from here.

use crate::config::WarmupConfig;
use crate::exchange::{ExchangeError, MarketData};
use crate::indicators::{IndicatorEngine, IndicatorSnapshot};
use crate::renko::BrickAggregator;
use rust_decimal::Decimal;
use tracing::{debug, info};

/// What a warm-up run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct WarmupReport {
    /// Bars fetched
    pub bars: usize,
    /// Bricks formed from those bars
    pub bricks: usize,
    pub snapshot: IndicatorSnapshot,
    /// Live anchor after re-anchoring
    pub anchor: Decimal,
}

pub struct WarmupBootstrapper {
    symbol: String,
    bars: u16,
    interval: String,
}

impl WarmupBootstrapper {
    pub fn new(symbol: &str, config: &WarmupConfig) -> Self {
        Self {
            symbol: symbol.to_string(),
            bars: config.bars,
            interval: config.interval.clone(),
        }
    }

    /// Replay recent closes into `aggregator` and `indicators`, then re-anchor
    /// at the current price.
    pub async fn prime(
        &self,
        market: &dyn MarketData,
        aggregator: &mut BrickAggregator,
        indicators: &mut IndicatorEngine,
    ) -> Result<WarmupReport, ExchangeError> {
        let closes = market
            .recent_closes(&self.symbol, &self.interval, self.bars)
            .await?;
        let current = market.current_price(&self.symbol).await?;

        let mut bricks = 0;
        for close in &closes {
            for brick in aggregator.feed(*close) {
                indicators.update(brick.close);
                bricks += 1;
                debug!(brick = %brick, "Warm-up brick");
            }
        }

        aggregator.reanchor(current);

        let report = WarmupReport {
            bars: closes.len(),
            bricks,
            snapshot: indicators.snapshot(),
            anchor: current,
        };

        info!(
            symbol = %self.symbol,
            interval = %self.interval,
            bars = report.bars,
            bricks = report.bricks,
            anchor = %report.anchor,
            ema_fast = ?report.snapshot.ema_fast,
            ema_slow = ?report.snapshot.ema_slow,
            rsi = ?report.snapshot.rsi,
            "Warm-up complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchange;
    use crate::renko::Direction;
    use rust_decimal_macros::dec;

    fn bootstrapper(bars: u16) -> WarmupBootstrapper {
        WarmupBootstrapper::new(
            "BTCUSDT",
            &WarmupConfig {
                enabled: true,
                bars,
                interval: "1m".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_prime_feeds_bricks_and_reanchors() {
        let exchange = MockExchange::new(dec!(1000));
        exchange
            .set_closes(vec![dec!(20000), dec!(20551), dec!(21101), dec!(21300)])
            .await;
        exchange.set_price(dec!(21450)).await;

        let mut aggregator = BrickAggregator::new(dec!(550), 2);
        let mut indicators = IndicatorEngine::new(2, 2, 2);

        let report = bootstrapper(500)
            .prime(&exchange, &mut aggregator, &mut indicators)
            .await
            .unwrap();

        assert_eq!(report.bars, 4);
        assert_eq!(report.bricks, 2);
        assert_eq!(report.anchor, dec!(21450));
        assert!(report.snapshot.values().is_some());
        assert_eq!(indicators.bricks_seen(), 2);

        let state = aggregator.state();
        assert_eq!(state.anchor, Some(dec!(21450)));
        assert_eq!(state.direction, None);
        assert_eq!(state.next_id, 3);
    }

    #[tokio::test]
    async fn test_prime_requests_only_configured_bars() {
        let exchange = MockExchange::new(dec!(1000));
        exchange
            .set_closes((0..10).map(|i| Decimal::from(100 + i * 10)).collect())
            .await;
        exchange.set_price(dec!(200)).await;

        let mut aggregator = BrickAggregator::new(dec!(10), 2);
        let mut indicators = IndicatorEngine::new(3, 5, 3);

        let report = bootstrapper(3)
            .prime(&exchange, &mut aggregator, &mut indicators)
            .await
            .unwrap();

        // 170 seeds, then 180 and 190 each add one brick
        assert_eq!(report.bars, 3);
        assert_eq!(report.bricks, 2);
    }

    #[tokio::test]
    async fn test_live_bricks_continue_ids_after_warmup() {
        let exchange = MockExchange::new(dec!(1000));
        exchange
            .set_closes(vec![dec!(20000), dec!(20551), dec!(21101)])
            .await;
        exchange.set_price(dec!(21000)).await;

        let mut aggregator = BrickAggregator::new(dec!(550), 2);
        let mut indicators = IndicatorEngine::new(2, 2, 2);
        bootstrapper(500)
            .prime(&exchange, &mut aggregator, &mut indicators)
            .await
            .unwrap();

        // Undirected after re-anchor: one box down is enough
        let bricks = aggregator.feed(dec!(20450));
        assert_eq!(bricks.len(), 1);
        assert_eq!(bricks[0].id, 3);
        assert_eq!(bricks[0].direction, Direction::Down);
    }
}

//! Single consumer of the tick channel.
//!
//! Each tick runs aggregation, indicator updates and strategy evaluation,
//! including any order round-trips, before the next tick is read.

use crate::execution::Execution;
use crate::feed::PriceTick;
use crate::indicators::IndicatorEngine;
use crate::renko::BrickAggregator;
use crate::strategy::{StrategyMachine, Transition};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub struct Pipeline<E> {
    aggregator: BrickAggregator,
    indicators: IndicatorEngine,
    strategy: StrategyMachine,
    execution: E,
    ticks: u64,
}

impl<E: Execution> Pipeline<E> {
    pub fn new(
        aggregator: BrickAggregator,
        indicators: IndicatorEngine,
        strategy: StrategyMachine,
        execution: E,
    ) -> Self {
        Self {
            aggregator,
            indicators,
            strategy,
            execution,
            ticks: 0,
        }
    }

    /// Process one tick to completion.
    pub async fn on_tick(&mut self, tick: &PriceTick) -> Vec<Transition> {
        self.ticks += 1;
        let mut transitions = Vec::new();

        for brick in self.aggregator.feed(tick.price) {
            let snapshot = self.indicators.update(brick.close);
            info!(
                brick_id = brick.id,
                close = %brick.close,
                direction = brick.direction.arrow(),
                source = ?tick.source,
                ema_fast = ?snapshot.ema_fast,
                ema_slow = ?snapshot.ema_slow,
                rsi = ?snapshot.rsi,
                "Brick closed"
            );
            transitions.extend(
                self.strategy
                    .on_brick(&brick, &snapshot, &mut self.execution)
                    .await,
            );
        }

        transitions
    }

    /// Drain `rx` until every sender is gone.
    pub async fn run(mut self, mut rx: mpsc::Receiver<PriceTick>) -> Self {
        info!("Pipeline started");
        while let Some(tick) = rx.recv().await {
            debug!(price = %tick.price, source = ?tick.source, "Tick");
            self.on_tick(&tick).await;
        }
        info!(
            ticks = self.ticks,
            exposure = %self.strategy.state().exposure,
            "Pipeline stopped"
        );
        self
    }

    pub fn aggregator(&self) -> &BrickAggregator {
        &self.aggregator
    }

    pub fn indicators(&self) -> &IndicatorEngine {
        &self.indicators
    }

    pub fn strategy(&self) -> &StrategyMachine {
        &self.strategy
    }

    pub fn execution(&self) -> &E {
        &self.execution
    }
}

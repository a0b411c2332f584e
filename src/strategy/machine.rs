//! Brick-driven FLAT/LONG/SHORT state machine.

use super::{EntryKey, Exposure, PositionState, Transition};
use crate::config::StrategyConfig;
use crate::exchange::OrderSide;
use crate::execution::{Execution, OrderFailure, OrderRequest};
use crate::indicators::{IndicatorSnapshot, IndicatorValues};
use crate::renko::{Brick, Direction};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

/// Evaluates each brick against the position and the indicators.
///
/// Stops take priority over entries. With `allow_same_brick_reversal` a brick
/// that stops a position may also open the opposite one.
#[derive(Debug, Clone)]
pub struct StrategyMachine {
    config: StrategyConfig,
    state: PositionState,
}

impl StrategyMachine {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            state: PositionState::default(),
        }
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    /// Evaluate one brick. Orders are awaited in turn; the returned
    /// transitions are in the order they happened.
    pub async fn on_brick<E>(
        &mut self,
        brick: &Brick,
        snapshot: &IndicatorSnapshot,
        execution: &mut E,
    ) -> Vec<Transition>
    where
        E: Execution + ?Sized,
    {
        let mut transitions = Vec::new();

        let Some(values) = snapshot.values() else {
            debug!(brick_id = brick.id, "Indicators not ready, skipping evaluation");
            return transitions;
        };

        let stopped = match self.stop_side(brick) {
            Some(side) => match self.stop(brick, side, &values, execution).await {
                Ok(transition) => {
                    transitions.push(transition);
                    true
                }
                Err(transition) => {
                    transitions.push(transition);
                    return transitions;
                }
            },
            None => false,
        };

        if stopped && !self.config.allow_same_brick_reversal {
            debug!(brick_id = brick.id, "Same-brick reversal disabled");
            return transitions;
        }

        let entry = self
            .entry_signal(brick, &values)
            .and_then(|target| target.entry_side().map(|side| (target, side)));
        if let Some((target, side)) = entry {
            transitions.push(self.enter(brick, target, side, &values, execution).await);
        }

        transitions
    }

    fn stop_side(&self, brick: &Brick) -> Option<OrderSide> {
        match (self.state.exposure, brick.direction) {
            (Exposure::Long, Direction::Down) | (Exposure::Short, Direction::Up) => {
                self.state.exposure.exit_side()
            }
            _ => None,
        }
    }

    /// Exposure to enter on this brick, if any.
    fn entry_signal(&self, brick: &Brick, values: &IndicatorValues) -> Option<Exposure> {
        if self.state.exposure != Exposure::Flat {
            return None;
        }

        let config = &self.config;
        match brick.direction {
            Direction::Up
                if values.ema_fast > values.ema_slow
                    && (config.rsi_long_min..=config.rsi_long_max).contains(&values.rsi) =>
            {
                Some(Exposure::Long)
            }
            Direction::Down
                if values.ema_fast < values.ema_slow
                    && (config.rsi_short_min..=config.rsi_short_max).contains(&values.rsi) =>
            {
                Some(Exposure::Short)
            }
            _ => None,
        }
    }

    async fn stop<E>(
        &mut self,
        brick: &Brick,
        side: OrderSide,
        values: &IndicatorValues,
        execution: &mut E,
    ) -> Result<Transition, Transition>
    where
        E: Execution + ?Sized,
    {
        let from = self.state.exposure;
        let request = OrderRequest {
            side,
            quantity: self.state.quantity,
            reduce_only: true,
        };

        match execution.submit(&request).await {
            Ok(fill) => {
                info!(
                    brick_id = brick.id,
                    close = %brick.close,
                    from = %from,
                    side = side.as_str(),
                    quantity = %request.quantity,
                    avg_price = %fill.avg_price,
                    ema_fast = values.ema_fast,
                    ema_slow = values.ema_slow,
                    rsi = values.rsi,
                    "Stop executed, now FLAT"
                );
                self.state.exposure = Exposure::Flat;
                self.state.quantity = Decimal::ZERO;
                Ok(Transition::Stopped {
                    brick_id: brick.id,
                    from,
                    quantity: request.quantity,
                    avg_price: fill.avg_price,
                })
            }
            Err(failure) => Err(self.order_failed(brick, &request, values, failure)),
        }
    }

    async fn enter<E>(
        &mut self,
        brick: &Brick,
        target: Exposure,
        side: OrderSide,
        values: &IndicatorValues,
        execution: &mut E,
    ) -> Transition
    where
        E: Execution + ?Sized,
    {
        let key = EntryKey {
            brick_id: brick.id,
            exposure: target,
        };
        if self.state.last_entry == Some(key) {
            info!(
                brick_id = brick.id,
                exposure = %target,
                "Entry already taken on this brick, skipping"
            );
            return Transition::Debounced {
                brick_id: brick.id,
                exposure: target,
            };
        }

        let quantity = match execution.entry_quantity(brick.close).await {
            Ok(quantity) => quantity,
            Err(failure) => {
                let request = OrderRequest {
                    side,
                    quantity: Decimal::ZERO,
                    reduce_only: false,
                };
                return self.order_failed(brick, &request, values, failure);
            }
        };

        let request = OrderRequest {
            side,
            quantity,
            reduce_only: false,
        };

        match execution.submit(&request).await {
            Ok(fill) => {
                let filled = if fill.executed_qty > Decimal::ZERO {
                    fill.executed_qty
                } else {
                    quantity
                };
                info!(
                    brick_id = brick.id,
                    close = %brick.close,
                    exposure = %target,
                    side = side.as_str(),
                    quantity = %filled,
                    avg_price = %fill.avg_price,
                    ema_fast = values.ema_fast,
                    ema_slow = values.ema_slow,
                    rsi = values.rsi,
                    "Entry executed"
                );
                self.state = PositionState {
                    exposure: target,
                    quantity: filled,
                    last_entry: Some(key),
                };
                Transition::Entered {
                    brick_id: brick.id,
                    exposure: target,
                    quantity: filled,
                    avg_price: fill.avg_price,
                }
            }
            Err(failure) => self.order_failed(brick, &request, values, failure),
        }
    }

    fn order_failed(
        &self,
        brick: &Brick,
        request: &OrderRequest,
        values: &IndicatorValues,
        failure: OrderFailure,
    ) -> Transition {
        if failure.is_terminal() {
            error!(
                brick_id = brick.id,
                side = request.side.as_str(),
                quantity = %request.quantity,
                reduce_only = request.reduce_only,
                kind = ?failure.kind(),
                ema_fast = values.ema_fast,
                ema_slow = values.ema_slow,
                rsi = values.rsi,
                error = %failure,
                "Order failed, position unchanged"
            );
        } else {
            warn!(
                brick_id = brick.id,
                side = request.side.as_str(),
                quantity = %request.quantity,
                reduce_only = request.reduce_only,
                kind = ?failure.kind(),
                error = %failure,
                "Order failed, position unchanged"
            );
        }

        Transition::OrderFailed {
            brick_id: brick.id,
            side: request.side,
            reduce_only: request.reduce_only,
            kind: failure.kind(),
            reason: failure.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{FailureKind, OrderFill, OrderResult};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;

    /// Execution double that fills everything unless a result is scripted.
    #[derive(Default)]
    struct ScriptedExecution {
        results: VecDeque<OrderResult>,
        submitted: Vec<OrderRequest>,
    }

    impl ScriptedExecution {
        fn failing_with(failure: OrderFailure) -> Self {
            Self {
                results: VecDeque::from([Err(failure)]),
                submitted: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Execution for ScriptedExecution {
        async fn entry_quantity(&mut self, _reference_price: Decimal) -> Result<Decimal, OrderFailure> {
            Ok(dec!(0.01))
        }

        async fn submit(&mut self, request: &OrderRequest) -> OrderResult {
            self.submitted.push(*request);
            self.results.pop_front().unwrap_or(Ok(OrderFill {
                order_id: Some(self.submitted.len() as i64),
                executed_qty: request.quantity,
                avg_price: dec!(20000),
            }))
        }
    }

    fn brick(id: u64, close: Decimal, direction: Direction) -> Brick {
        Brick {
            id,
            close,
            direction,
        }
    }

    fn snapshot(ema_fast: f64, ema_slow: f64, rsi: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            ema_fast: Some(ema_fast),
            ema_slow: Some(ema_slow),
            rsi: Some(rsi),
        }
    }

    fn bullish() -> IndicatorSnapshot {
        snapshot(21000.0, 20500.0, 55.0)
    }

    fn bearish() -> IndicatorSnapshot {
        snapshot(20000.0, 20500.0, 45.0)
    }

    // =========================================================================
    // Entries
    // =========================================================================

    #[tokio::test]
    async fn test_long_entered_once() {
        let mut machine = StrategyMachine::new(StrategyConfig::default());
        let mut exec = ScriptedExecution::default();

        let first = machine
            .on_brick(&brick(1, dec!(20550), Direction::Up), &bullish(), &mut exec)
            .await;
        assert!(matches!(
            first.as_slice(),
            [Transition::Entered {
                brick_id: 1,
                exposure: Exposure::Long,
                ..
            }]
        ));

        let second = machine
            .on_brick(&brick(2, dec!(21100), Direction::Up), &bullish(), &mut exec)
            .await;
        assert!(second.is_empty());
        assert_eq!(exec.submitted.len(), 1);

        let state = machine.state();
        assert_eq!(state.exposure, Exposure::Long);
        assert_eq!(state.quantity, dec!(0.01));
        assert_eq!(
            state.last_entry,
            Some(EntryKey {
                brick_id: 1,
                exposure: Exposure::Long
            })
        );
    }

    #[tokio::test]
    async fn test_undefined_indicators_do_nothing() {
        let mut machine = StrategyMachine::new(StrategyConfig::default());
        let mut exec = ScriptedExecution::default();
        let partial = IndicatorSnapshot {
            rsi: None,
            ..bullish()
        };

        let transitions = machine
            .on_brick(&brick(1, dec!(20550), Direction::Up), &partial, &mut exec)
            .await;

        assert!(transitions.is_empty());
        assert!(exec.submitted.is_empty());
    }

    #[tokio::test]
    async fn test_rsi_outside_band_blocks_entry() {
        let mut machine = StrategyMachine::new(StrategyConfig::default());
        let mut exec = ScriptedExecution::default();

        let overbought = snapshot(21000.0, 20500.0, 70.0);
        let transitions = machine
            .on_brick(&brick(1, dec!(20550), Direction::Up), &overbought, &mut exec)
            .await;
        assert!(transitions.is_empty());

        // Band edges are inclusive
        let edge = snapshot(21000.0, 20500.0, 65.0);
        let transitions = machine
            .on_brick(&brick(2, dec!(21100), Direction::Up), &edge, &mut exec)
            .await;
        assert_eq!(transitions.len(), 1);
    }

    #[tokio::test]
    async fn test_direction_must_agree_with_ema() {
        let mut machine = StrategyMachine::new(StrategyConfig::default());
        let mut exec = ScriptedExecution::default();

        let transitions = machine
            .on_brick(&brick(1, dec!(19450), Direction::Down), &bullish(), &mut exec)
            .await;
        assert!(transitions.is_empty());
        assert_eq!(machine.state().exposure, Exposure::Flat);
    }

    // =========================================================================
    // Stops and Reversals
    // =========================================================================

    #[tokio::test]
    async fn test_down_brick_stops_long_and_opens_short() {
        let mut machine = StrategyMachine::new(StrategyConfig::default());
        let mut exec = ScriptedExecution::default();

        machine
            .on_brick(&brick(1, dec!(20550), Direction::Up), &bullish(), &mut exec)
            .await;
        let transitions = machine
            .on_brick(&brick(2, dec!(19450), Direction::Down), &bearish(), &mut exec)
            .await;

        assert_eq!(transitions.len(), 2);
        assert!(matches!(
            transitions[0],
            Transition::Stopped {
                brick_id: 2,
                from: Exposure::Long,
                ..
            }
        ));
        assert!(matches!(
            transitions[1],
            Transition::Entered {
                brick_id: 2,
                exposure: Exposure::Short,
                ..
            }
        ));

        let stop = exec.submitted[1];
        assert_eq!(stop.side, OrderSide::Sell);
        assert!(stop.reduce_only);
        assert_eq!(stop.quantity, dec!(0.01));

        let entry = exec.submitted[2];
        assert_eq!(entry.side, OrderSide::Sell);
        assert!(!entry.reduce_only);
        assert_eq!(machine.state().exposure, Exposure::Short);
    }

    #[tokio::test]
    async fn test_same_brick_reversal_can_be_disabled() {
        let config = StrategyConfig {
            allow_same_brick_reversal: false,
            ..StrategyConfig::default()
        };
        let mut machine = StrategyMachine::new(config);
        let mut exec = ScriptedExecution::default();

        machine
            .on_brick(&brick(1, dec!(20550), Direction::Up), &bullish(), &mut exec)
            .await;
        let transitions = machine
            .on_brick(&brick(2, dec!(19450), Direction::Down), &bearish(), &mut exec)
            .await;

        assert_eq!(transitions.len(), 1);
        assert_eq!(machine.state().exposure, Exposure::Flat);
        assert_eq!(machine.state().quantity, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_stop_without_opposite_signal_goes_flat() {
        let mut machine = StrategyMachine::new(StrategyConfig::default());
        let mut exec = ScriptedExecution::default();

        machine
            .on_brick(&brick(1, dec!(20550), Direction::Up), &bullish(), &mut exec)
            .await;
        // EMA still bullish, so no short
        let transitions = machine
            .on_brick(&brick(2, dec!(19450), Direction::Down), &bullish(), &mut exec)
            .await;

        assert_eq!(transitions.len(), 1);
        assert_eq!(machine.state().exposure, Exposure::Flat);
    }

    #[tokio::test]
    async fn test_failed_stop_keeps_position() {
        let mut machine = StrategyMachine::new(StrategyConfig::default());
        let mut exec = ScriptedExecution::default();

        machine
            .on_brick(&brick(1, dec!(20550), Direction::Up), &bullish(), &mut exec)
            .await;
        exec.results
            .push_back(Err(OrderFailure::Network("connection reset".to_string())));

        let transitions = machine
            .on_brick(&brick(2, dec!(19450), Direction::Down), &bearish(), &mut exec)
            .await;

        assert!(matches!(
            transitions.as_slice(),
            [Transition::OrderFailed {
                reduce_only: true,
                kind: FailureKind::Network,
                ..
            }]
        ));
        assert_eq!(machine.state().exposure, Exposure::Long);
        assert_eq!(exec.submitted.len(), 2);
    }

    // =========================================================================
    // Debounce and Failures
    // =========================================================================

    #[tokio::test]
    async fn test_same_brick_entry_is_debounced() {
        let mut machine = StrategyMachine::new(StrategyConfig::default());
        let mut exec = ScriptedExecution::default();

        let entry_brick = brick(5, dec!(22750), Direction::Up);
        machine.on_brick(&entry_brick, &bullish(), &mut exec).await;
        machine
            .on_brick(&brick(6, dec!(21650), Direction::Down), &bullish(), &mut exec)
            .await;
        assert_eq!(machine.state().exposure, Exposure::Flat);

        // Redelivery of the entry brick must not trade again
        let transitions = machine.on_brick(&entry_brick, &bullish(), &mut exec).await;

        assert_eq!(
            transitions,
            vec![Transition::Debounced {
                brick_id: 5,
                exposure: Exposure::Long
            }]
        );
        assert_eq!(exec.submitted.len(), 2);
        assert_eq!(machine.state().exposure, Exposure::Flat);
    }

    #[tokio::test]
    async fn test_insufficient_margin_leaves_state_unchanged() {
        let mut machine = StrategyMachine::new(StrategyConfig::default());
        let mut exec = ScriptedExecution::failing_with(OrderFailure::InsufficientMargin(
            "Margin is insufficient.".to_string(),
        ));

        let transitions = machine
            .on_brick(&brick(1, dec!(20550), Direction::Up), &bullish(), &mut exec)
            .await;

        assert!(matches!(
            transitions.as_slice(),
            [Transition::OrderFailed {
                kind: FailureKind::InsufficientMargin,
                reduce_only: false,
                ..
            }]
        ));
        assert_eq!(machine.state(), PositionState::default());
        assert_eq!(exec.submitted.len(), 1);
    }
}

//! Mock exchange for paper trading and tests.

use super::error::ExchangeError;
use super::traits::{AccountService, MarketData};
use super::types::*;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Simulated account for a single one-way futures position.
#[derive(Debug, Clone)]
pub struct MockAccountState {
    pub initial_balance: Decimal,
    /// Wallet balance after fees and realized PnL
    pub balance: Decimal,
    /// Signed position quantity, negative when short
    pub position_qty: Decimal,
    pub entry_price: Decimal,
    pub total_trading_fees: Decimal,
    pub realized_pnl: Decimal,
    pub order_count: u64,
}

impl MockAccountState {
    fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            balance: initial_balance,
            position_qty: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            total_trading_fees: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            order_count: 0,
        }
    }

    /// Balance not tied up as 1x margin for the open position.
    fn available(&self) -> Decimal {
        (self.balance - self.position_qty.abs() * self.entry_price).max(Decimal::ZERO)
    }
}

/// Mock client that simulates Binance futures responses.
pub struct MockExchange {
    state: Arc<RwLock<MockAccountState>>,
    order_id_counter: AtomicU64,
    /// Market orders attempted, including rejected ones
    order_attempts: AtomicU64,
    /// Fixed price used when no live source is attached
    price: RwLock<Decimal>,
    /// Live source for fills and ticker queries in paper trading
    price_source: Option<Arc<dyn MarketData>>,
    /// Closing prices served by `recent_closes`
    closes: RwLock<Vec<Decimal>>,
    /// Errors returned by the next order calls, in order
    scripted_failures: Mutex<VecDeque<ExchangeError>>,
    /// Position reads that still report the size before the last fill
    lagging_reads: AtomicU32,
    position_lag: AtomicU32,
    last_reported_qty: RwLock<Decimal>,
    /// Trading fee rate (0.04% taker)
    fee_rate: Decimal,
}

impl MockExchange {
    /// Create a new mock exchange with initial balance.
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            state: Arc::new(RwLock::new(MockAccountState::new(initial_balance))),
            order_id_counter: AtomicU64::new(1),
            order_attempts: AtomicU64::new(0),
            price: RwLock::new(Decimal::ZERO),
            price_source: None,
            closes: RwLock::new(Vec::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            lagging_reads: AtomicU32::new(0),
            position_lag: AtomicU32::new(0),
            last_reported_qty: RwLock::new(Decimal::ZERO),
            fee_rate: dec!(0.0004), // 0.04% taker fee
        }
    }

    /// Fill and quote at prices from a live market data source.
    pub fn with_price_source(mut self, source: Arc<dyn MarketData>) -> Self {
        self.price_source = Some(source);
        self
    }

    /// Set the simulated price.
    pub async fn set_price(&self, price: Decimal) {
        *self.price.write().await = price;
    }

    /// Set the bars served as history.
    pub async fn set_closes(&self, closes: Vec<Decimal>) {
        *self.closes.write().await = closes;
    }

    /// Queue an error for the next order call.
    pub async fn fail_next_order(&self, error: ExchangeError) {
        self.scripted_failures.lock().await.push_back(error);
    }

    /// After each fill, report the previous size for the next `reads` position queries.
    pub fn set_position_lag(&self, reads: u32) {
        self.position_lag.store(reads, Ordering::SeqCst);
    }

    /// Number of order submissions seen, rejected ones included.
    pub fn order_attempts(&self) -> u64 {
        self.order_attempts.load(Ordering::SeqCst)
    }

    /// Get current mock state for logging.
    pub async fn get_state(&self) -> MockAccountState {
        self.state.read().await.clone()
    }

    async fn quote(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        match &self.price_source {
            Some(source) => source.current_price(symbol).await,
            None => Ok(*self.price.read().await),
        }
    }

    fn next_order_id(&self) -> u64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketData for MockExchange {
    async fn current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.quote(symbol).await
    }

    async fn recent_closes(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> Result<Vec<Decimal>, ExchangeError> {
        if let Some(source) = &self.price_source {
            return source.recent_closes(symbol, interval, limit).await;
        }
        let closes = self.closes.read().await;
        let skip = closes.len().saturating_sub(limit as usize);
        Ok(closes[skip..].to_vec())
    }
}

#[async_trait]
impl AccountService for MockExchange {
    async fn free_balance(&self, _asset: &str) -> Result<Decimal, ExchangeError> {
        Ok(self.state.read().await.available())
    }

    /// Simulate placing a futures market order.
    async fn place_market_order(&self, order: &NewOrder) -> Result<OrderResponse, ExchangeError> {
        self.order_attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.scripted_failures.lock().await.pop_front() {
            debug!(symbol = %order.symbol, error = %error, "Mock order rejected (scripted)");
            return Err(error);
        }

        let price = self.quote(&order.symbol).await?;
        let mut state = self.state.write().await;
        let signed = match order.side {
            OrderSide::Buy => order.quantity,
            OrderSide::Sell => -order.quantity,
        };

        let quantity = if order.reduce_only {
            let reduces = state.position_qty != Decimal::ZERO
                && state.position_qty.is_sign_positive() != signed.is_sign_positive();
            if !reduces {
                return Err(ExchangeError::Api {
                    code: -2022,
                    msg: "ReduceOnly Order is rejected.".to_string(),
                });
            }
            order.quantity.min(state.position_qty.abs())
        } else {
            let required = order.quantity * price;
            if required > state.available() {
                return Err(ExchangeError::Api {
                    code: -2019,
                    msg: "Margin is insufficient.".to_string(),
                });
            }
            order.quantity
        };

        let fee = quantity * price * self.fee_rate;
        let before = state.position_qty;
        let delta = if signed.is_sign_positive() {
            quantity
        } else {
            -quantity
        };

        // Realize PnL on the reduced part, average in on the increased part
        if before != Decimal::ZERO && before.is_sign_positive() != delta.is_sign_positive() {
            let closed = quantity.min(before.abs());
            let pnl = if before.is_sign_positive() {
                (price - state.entry_price) * closed
            } else {
                (state.entry_price - price) * closed
            };
            state.realized_pnl += pnl;
            state.balance += pnl;
        } else if before + delta != Decimal::ZERO {
            state.entry_price = (state.entry_price * before.abs() + price * quantity)
                / (before.abs() + quantity);
        }

        state.position_qty = before + delta;
        if state.position_qty == Decimal::ZERO {
            state.entry_price = Decimal::ZERO;
        } else if before.is_sign_positive() != state.position_qty.is_sign_positive()
            && before != Decimal::ZERO
        {
            state.entry_price = price;
        }

        state.balance -= fee;
        state.total_trading_fees += fee;
        state.order_count += 1;

        *self.last_reported_qty.write().await = before;
        self.lagging_reads
            .store(self.position_lag.load(Ordering::SeqCst), Ordering::SeqCst);

        let order_id = self.next_order_id() as i64;

        info!(
            order_id,
            symbol = %order.symbol,
            side = ?order.side,
            quantity = %quantity,
            price = %price,
            fee = %fee,
            position = %state.position_qty,
            "Mock futures order executed"
        );

        Ok(OrderResponse {
            order_id,
            symbol: order.symbol.clone(),
            status: OrderStatus::Filled,
            client_order_id: format!("mock-{}", order_id),
            avg_price: price,
            orig_qty: order.quantity,
            executed_qty: quantity,
            side: order.side,
            reduce_only: order.reduce_only,
            update_time: chrono::Utc::now().timestamp_millis(),
        })
    }

    async fn position(&self, symbol: &str) -> Result<PositionSnapshot, ExchangeError> {
        let lagging = self
            .lagging_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let state = self.state.read().await;
        let size = if lagging {
            *self.last_reported_qty.read().await
        } else {
            state.position_qty
        };
        let mark_price = self.quote(symbol).await.unwrap_or(state.entry_price);

        Ok(PositionSnapshot {
            size,
            entry_price: state.entry_price,
            mark_price,
            unrealized_pnl: (mark_price - state.entry_price) * size,
        })
    }
}

//! Order submission for the strategy.
//!
//! The strategy only sees the `Execution` trait. `OrderGateway` is the
//! exchange-backed implementation: it sizes entries from free margin, submits
//! market orders one at a time and optionally waits until the position
//! reflects the fill.

mod error;
mod gateway;
pub mod sizing;

pub use error::{FailureKind, OrderFailure};
pub use gateway::{position_moved, OrderGateway, SessionFactory};

use crate::exchange::OrderSide;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// A market order as decided by the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderRequest {
    pub side: OrderSide,
    pub quantity: Decimal,
    pub reduce_only: bool,
}

/// A confirmed fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderFill {
    /// `None` when the fill was inferred from the position
    pub order_id: Option<i64>,
    pub executed_qty: Decimal,
    pub avg_price: Decimal,
}

/// Outcome of one order submission.
pub type OrderResult = Result<OrderFill, OrderFailure>;

/// Order-side collaborator of the strategy.
#[async_trait]
pub trait Execution: Send {
    /// Quantity to use for a new entry at `reference_price`.
    async fn entry_quantity(&mut self, reference_price: Decimal) -> Result<Decimal, OrderFailure>;

    /// Submit one order and wait for its outcome.
    async fn submit(&mut self, request: &OrderRequest) -> OrderResult;
}

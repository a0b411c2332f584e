//! Renko trend-following strategy.
//!
//! A three-state machine (FLAT, LONG, SHORT) evaluated once per brick:
//! - Stop an open position on a brick against it
//! - Enter on a brick that agrees with the EMA cross and an RSI band
//! - Never enter twice for the same brick and side

mod machine;

pub use machine::StrategyMachine;

use crate::exchange::OrderSide;
use crate::execution::FailureKind;
use rust_decimal::Decimal;
use std::fmt;

/// Current market exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Exposure {
    #[default]
    Flat,
    Long,
    Short,
}

impl Exposure {
    /// Side of the order that opens this exposure.
    pub fn entry_side(&self) -> Option<OrderSide> {
        match self {
            Exposure::Flat => None,
            Exposure::Long => Some(OrderSide::Buy),
            Exposure::Short => Some(OrderSide::Sell),
        }
    }

    /// Side of the reduce-only order that closes this exposure.
    pub fn exit_side(&self) -> Option<OrderSide> {
        match self {
            Exposure::Flat => None,
            Exposure::Long => Some(OrderSide::Sell),
            Exposure::Short => Some(OrderSide::Buy),
        }
    }
}

impl fmt::Display for Exposure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exposure::Flat => write!(f, "FLAT"),
            Exposure::Long => write!(f, "LONG"),
            Exposure::Short => write!(f, "SHORT"),
        }
    }
}

/// Identity of a confirmed entry, used to debounce repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub brick_id: u64,
    pub exposure: Exposure,
}

/// Position as tracked by the strategy. Changes only after a confirmed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionState {
    pub exposure: Exposure,
    pub quantity: Decimal,
    pub last_entry: Option<EntryKey>,
}

/// One outcome of evaluating a brick.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Open position closed by a reduce-only order
    Stopped {
        brick_id: u64,
        from: Exposure,
        quantity: Decimal,
        avg_price: Decimal,
    },
    /// New position opened
    Entered {
        brick_id: u64,
        exposure: Exposure,
        quantity: Decimal,
        avg_price: Decimal,
    },
    /// Entry skipped because this brick and side already produced one
    Debounced { brick_id: u64, exposure: Exposure },
    /// Order did not go through; position unchanged
    OrderFailed {
        brick_id: u64,
        side: OrderSide,
        reduce_only: bool,
        kind: FailureKind,
        reason: String,
    },
}

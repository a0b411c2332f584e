//! Renko brick construction.
//!
//! A pure, deterministic reduction of price ticks into fixed-size bricks.

mod aggregator;

pub use aggregator::{AggregatorState, Brick, BrickAggregator, Direction};

//! Fixed-box brick aggregation with a reversal multiplier.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Direction of a brick or of the aggregator's current trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// +1 for up, -1 for down.
    pub fn sign(&self) -> i8 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }

    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::Up => "▲",
            Direction::Down => "▼",
        }
    }
}

/// One completed brick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Brick {
    /// Monotonic, starts at 1
    pub id: u64,
    pub close: Decimal,
    pub direction: Direction,
}

impl fmt::Display for Brick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {}", self.id, self.direction.arrow(), self.close)
    }
}

/// Mutable aggregator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorState {
    /// Close of the last brick, or the seed price
    pub anchor: Option<Decimal>,
    /// `None` until the first brick after a (re)anchor
    pub direction: Option<Direction>,
    pub next_id: u64,
}

/// Turns a price stream into bricks of `box_size`.
///
/// Continuing the current direction needs one box of travel from the anchor;
/// reversing needs `box_size * reversal` and moves the anchor by that amount.
/// Output depends only on the sequence of prices fed.
#[derive(Debug, Clone)]
pub struct BrickAggregator {
    box_size: Decimal,
    reversal: u32,
    state: AggregatorState,
}

impl BrickAggregator {
    pub fn new(box_size: Decimal, reversal: u32) -> Self {
        Self {
            box_size,
            reversal: reversal.max(1),
            state: AggregatorState {
                anchor: None,
                direction: None,
                next_id: 1,
            },
        }
    }

    /// Start from a known anchor with no direction.
    pub fn with_anchor(box_size: Decimal, reversal: u32, anchor: Decimal) -> Self {
        let mut aggregator = Self::new(box_size, reversal);
        aggregator.state.anchor = Some(anchor);
        aggregator
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    pub fn box_size(&self) -> Decimal {
        self.box_size
    }

    /// Price distance that completes the next brick in `direction`.
    fn step(&self, direction: Direction) -> Decimal {
        match self.state.direction {
            Some(current) if current != direction => self.box_size * Decimal::from(self.reversal),
            _ => self.box_size,
        }
    }

    /// Feed one price. Returns every brick it completes, oldest first.
    pub fn feed(&mut self, price: Decimal) -> Vec<Brick> {
        let mut bricks = Vec::new();

        let Some(mut anchor) = self.state.anchor else {
            self.state.anchor = Some(price);
            return bricks;
        };

        loop {
            let up_step = self.step(Direction::Up);
            let down_step = self.step(Direction::Down);

            let direction = if price >= anchor + up_step {
                anchor += up_step;
                Direction::Up
            } else if price <= anchor - down_step {
                anchor -= down_step;
                Direction::Down
            } else {
                break;
            };

            self.state.anchor = Some(anchor);
            self.state.direction = Some(direction);
            bricks.push(Brick {
                id: self.state.next_id,
                close: anchor,
                direction,
            });
            self.state.next_id += 1;
        }

        bricks
    }

    /// Move the anchor to `price` and forget the direction. Emits nothing and
    /// keeps the id sequence. Only valid before live trading starts.
    pub fn reanchor(&mut self, price: Decimal) {
        self.state.anchor = Some(price);
        self.state.direction = None;
    }
}

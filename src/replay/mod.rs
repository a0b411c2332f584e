//! Offline replay of a recorded price series.
//!
//! Runs prices through the brick aggregator and indicator engine exactly as
//! the live pipeline does, without a strategy or any orders.

use crate::config::{BrickConfig, IndicatorConfig};
use crate::indicators::{IndicatorEngine, IndicatorSnapshot};
use crate::renko::{Brick, BrickAggregator};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::Path;

/// Column names accepted as the price column, case-insensitive.
const PRICE_COLUMNS: [&str; 3] = ["price", "close", "p"];

/// Prices loaded from a CSV file, in file order.
///
/// Expected CSV format, any extra columns ignored:
/// ```csv
/// timestamp,price
/// 2024-01-01T00:00:00Z,42000.50
/// ```
/// A file with a single column and no header is read as bare prices.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    prices: Vec<Decimal>,
}

impl PriceSeries {
    /// Load prices from a CSV file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        Self::from_csv_content(&content)
    }

    /// Parse prices from CSV content.
    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut lines = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .peekable();

        let Some((_, first)) = lines.peek().copied() else {
            anyhow::bail!("CSV file contains no data rows");
        };

        let column = match header_column(first) {
            Some(column) => {
                lines.next();
                column
            }
            None if first.split(',').count() == 1 => 0,
            None => anyhow::bail!(
                "CSV header must name a price column ({})",
                PRICE_COLUMNS.join(", ")
            ),
        };

        let mut prices = Vec::new();
        for (line_num, line) in lines {
            let field = line.split(',').nth(column).with_context(|| {
                format!("Line {} has no column {}: {}", line_num + 1, column + 1, line)
            })?;
            let price: Decimal = field
                .trim()
                .parse()
                .with_context(|| format!("Invalid price on line {}: {}", line_num + 1, field))?;
            prices.push(price);
        }

        if prices.is_empty() {
            anyhow::bail!("CSV file contains no data rows");
        }

        Ok(Self { prices })
    }

    pub fn prices(&self) -> &[Decimal] {
        &self.prices
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// Index of the price column if `line` is a header row.
fn header_column(line: &str) -> Option<usize> {
    let names: Vec<String> = line.split(',').map(|n| n.trim().to_lowercase()).collect();
    PRICE_COLUMNS
        .iter()
        .find_map(|wanted| names.iter().position(|name| name == wanted))
}

/// One brick with the indicator values right after it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReplayBrick {
    pub brick: Brick,
    pub snapshot: IndicatorSnapshot,
}

/// Result of a replay run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    pub ticks: usize,
    pub bricks: Vec<ReplayBrick>,
}

impl ReplayReport {
    /// Bricks after which every indicator was defined.
    pub fn tradable_bricks(&self) -> usize {
        self.bricks
            .iter()
            .filter(|b| b.snapshot.values().is_some())
            .count()
    }

    pub fn summary(&self) -> String {
        let last = self.bricks.last();
        format!(
            "Ticks: {}\nBricks: {}\nBricks with indicators: {}\nLast brick: {}",
            self.ticks,
            self.bricks.len(),
            self.tradable_bricks(),
            last.map(|b| b.brick.to_string())
                .unwrap_or_else(|| "none".to_string()),
        )
    }
}

/// Feed every price through a fresh aggregator and indicator engine.
pub fn replay(prices: &[Decimal], bricks: &BrickConfig, indicators: &IndicatorConfig) -> ReplayReport {
    let mut aggregator = BrickAggregator::new(bricks.box_size, bricks.reversal);
    let mut engine = IndicatorEngine::from_config(indicators);

    let bricks = prices
        .iter()
        .flat_map(|price| aggregator.feed(*price))
        .map(|brick| ReplayBrick {
            brick,
            snapshot: engine.update(brick.close),
        })
        .collect();

    ReplayReport {
        ticks: prices.len(),
        bricks,
    }
}

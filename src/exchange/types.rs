//! Type definitions for Binance API requests and responses.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest traded price for a symbol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerPrice {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

/// One kline row as returned by `/fapi/v1/klines`.
///
/// Binance encodes klines as heterogeneous arrays:
/// `[open_time, open, high, low, close, volume, close_time, ...]`.
#[derive(Debug, Clone, Deserialize)]
pub struct Kline(pub Vec<serde_json::Value>);

impl Kline {
    /// Close price of the bar.
    pub fn close(&self) -> Option<Decimal> {
        match self.0.get(4)? {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.to_string().parse().ok(),
            _ => None,
        }
    }

    /// Last millisecond covered by the bar.
    pub fn close_time(&self) -> Option<i64> {
        self.0.get(6)?.as_i64()
    }
}

/// Account balance information.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub available_balance: Decimal,
}

/// Futures position information from `/fapi/v2/positionRisk`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub position_amt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub mark_price: Decimal,
    #[serde(rename = "unRealizedProfit", with = "rust_decimal::serde::str")]
    pub unrealized_profit: Decimal,
    #[serde(default)]
    pub position_side: Option<PositionSide>,
}

/// Normalized view of the instrument position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionSnapshot {
    /// Signed size, negative when short
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
}

impl From<&Position> for PositionSnapshot {
    fn from(p: &Position) -> Self {
        Self {
            size: p.position_amt,
            entry_price: p.entry_price,
            mark_price: p.mark_price,
            unrealized_pnl: p.unrealized_profit,
        }
    }
}

/// Position side (long, short, or both for one-way mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Both,
    Long,
    Short,
}

/// Margin type for positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginType {
    Isolated,
    Cross,
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
        }
    }
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    ExpiredInMatch,
}

/// New market order request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub reduce_only: bool,
}

impl NewOrder {
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal, reduce_only: bool) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            reduce_only,
        }
    }
}

/// Order response from the exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub client_order_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub orig_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    pub side: OrderSide,
    #[serde(default)]
    pub reduce_only: bool,
    pub update_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_kline_close_parses() {
        let raw = r#"[1499040000000,"0.01634790","0.80000000","0.01575800","0.01577100","148976.11427815",1499644799999,"2434.19055334",308,"1756.87402397","28.46694368","0"]"#;
        let kline: Kline = serde_json::from_str(raw).unwrap();
        assert_eq!(kline.close(), Some(dec!(0.01577100)));
        assert_eq!(kline.close_time(), Some(1499644799999));
    }

    #[test]
    fn test_position_snapshot_from_position_risk() {
        let raw = r#"{
            "symbol": "BTCUSDT",
            "positionAmt": "-0.010",
            "entryPrice": "60000.0",
            "markPrice": "59500.5",
            "unRealizedProfit": "4.995",
            "liquidationPrice": "0",
            "leverage": "1",
            "positionSide": "BOTH"
        }"#;
        let position: Position = serde_json::from_str(raw).unwrap();
        let snapshot = PositionSnapshot::from(&position);
        assert_eq!(snapshot.size, dec!(-0.010));
        assert_eq!(snapshot.mark_price, dec!(59500.5));
        assert_eq!(position.position_side, Some(PositionSide::Both));
    }

    #[test]
    fn test_order_response_parses() {
        let raw = r#"{
            "orderId": 22542179,
            "symbol": "BTCUSDT",
            "status": "FILLED",
            "clientOrderId": "abc",
            "price": "0",
            "avgPrice": "60010.10",
            "origQty": "0.002",
            "executedQty": "0.002",
            "side": "BUY",
            "type": "MARKET",
            "reduceOnly": false,
            "updateTime": 1566818724722
        }"#;
        let response: OrderResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.status, OrderStatus::Filled);
        assert_eq!(response.executed_qty, dec!(0.002));
        assert_eq!(response.side, OrderSide::Buy);
    }
}

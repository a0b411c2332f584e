//! Price extraction from raw stream messages.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Field names that may carry a price, highest priority first.
const PRICE_KEYS: [&str; 3] = ["p", "c", "price"];

/// Pull a positive price out of a JSON message.
///
/// Looks at the top-level object first, then one level down (object values
/// such as a combined-stream `data` wrapper, or the elements of a top-level
/// array). Returns `None` for anything unparseable or price-less.
pub fn extract_price(text: &str) -> Option<Decimal> {
    let value: Value = serde_json::from_str(text).ok()?;
    price_in(&value).or_else(|| nested_price(&value))
}

fn price_in(value: &Value) -> Option<Decimal> {
    let object = value.as_object()?;
    PRICE_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(as_price))
}

fn nested_price(value: &Value) -> Option<Decimal> {
    match value {
        Value::Object(map) => map.values().find_map(price_in),
        Value::Array(items) => items.iter().find_map(price_in),
        _ => None,
    }
}

fn as_price(value: &Value) -> Option<Decimal> {
    let price = match value {
        Value::String(s) => Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .ok()?,
        Value::Number(n) => match Decimal::from_str(&n.to_string()) {
            Ok(price) => price,
            Err(_) => Decimal::from_f64(n.as_f64()?)?,
        },
        _ => return None,
    };
    (price > Decimal::ZERO).then_some(price)
}

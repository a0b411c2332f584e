//! Entry sizing from free margin.

use rust_decimal::Decimal;

/// Quantity for a new entry.
///
/// `free * fraction / price`, floored to `step` and clamped up to `min`.
/// A non-positive price sizes to `min`.
pub fn entry_quantity(
    free: Decimal,
    fraction: Decimal,
    price: Decimal,
    step: Decimal,
    min: Decimal,
) -> Decimal {
    if price <= Decimal::ZERO {
        return min;
    }
    floor_to_step(free * fraction / price, step).max(min)
}

/// Largest multiple of `step` not above `quantity`.
pub fn floor_to_step(quantity: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return quantity;
    }
    (quantity / step).floor() * step
}

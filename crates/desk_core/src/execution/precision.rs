use std::sync::atomic::{AtomicU64, Ordering};

use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::types::{OrderIntent, Side};
use crate::venue::SymbolRules;

static PRECISION_REJECT_TOTAL: AtomicU64 = AtomicU64::new(0);

pub fn precision_reject_total() -> u64 {
    PRECISION_REJECT_TOTAL.load(Ordering::Relaxed)
}

pub fn is_multiple_of(value: Decimal, step: Decimal) -> bool {
    step > Decimal::ZERO && (value % step).is_zero()
}

pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).floor() * step).normalize()
}

pub fn ceil_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).ceil() * step).normalize()
}

/// Buys round down and sells round up, so snapping never makes a price worse
/// for the desk.
pub fn price_to_tick(side: Side, price: Decimal, tick: Decimal) -> Decimal {
    match side {
        Side::Buy => floor_to_step(price, tick),
        Side::Sell => ceil_to_step(price, tick),
    }
}

/// Checks an intent against the exchange filters. Values are never rounded here.
pub fn validate_intent(intent: &OrderIntent, rules: &SymbolRules) -> Result<(), ValidationError> {
    let result = check_intent(intent, rules);
    if let Err(err) = &result {
        PRECISION_REJECT_TOTAL.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target: "desk", symbol = intent.symbol(), error = %err, "intent failed precision check");
    }
    result
}

fn check_intent(intent: &OrderIntent, rules: &SymbolRules) -> Result<(), ValidationError> {
    if intent.symbol() != rules.symbol {
        return Err(ValidationError::UnknownSymbol {
            symbol: intent.symbol().to_string(),
        });
    }

    let quantity = intent.quantity();
    if !is_multiple_of(quantity, rules.step_size) {
        return Err(ValidationError::QuantityOffStep {
            quantity,
            step: rules.step_size,
        });
    }
    if quantity < rules.min_qty {
        return Err(ValidationError::BelowMinQuantity {
            quantity,
            min: rules.min_qty,
        });
    }

    if let Some(price) = intent.price() {
        check_tick("price", price, rules.tick_size)?;
    }
    if let Some(stop_price) = intent.stop_price() {
        check_tick("stop_price", stop_price, rules.tick_size)?;
    }
    Ok(())
}

fn check_tick(field: &'static str, value: Decimal, tick: Decimal) -> Result<(), ValidationError> {
    if is_multiple_of(value, tick) {
        Ok(())
    } else {
        Err(ValidationError::PriceOffTick { field, value, tick })
    }
}

/// Notional bounds: at or above the exchange minimum, at or below the desk cap.
pub fn check_notional(
    notional: Decimal,
    rules: &SymbolRules,
    cap: Decimal,
) -> Result<(), ValidationError> {
    if notional > cap {
        return Err(ValidationError::NotionalAboveCap { notional, cap });
    }
    if notional < rules.min_notional {
        return Err(ValidationError::BelowMinNotional {
            notional,
            min: rules.min_notional,
        });
    }
    Ok(())
}

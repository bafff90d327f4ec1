use std::sync::atomic::{AtomicU64, Ordering};

use rust_decimal::Decimal;

use crate::types::{OrderId, OrderRecord, OrderSnapshot, OrderStatus};

static LIFECYCLE_OUT_OF_ORDER_TOTAL: AtomicU64 = AtomicU64::new(0);

pub fn lifecycle_out_of_order_total() -> u64 {
    LIFECYCLE_OUT_OF_ORDER_TOTAL.load(Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub filled_quantity: Decimal,
    pub newly_filled: Decimal,
}

impl StatusTransition {
    pub fn became_terminal(&self) -> bool {
        !self.from.is_terminal() && self.to.is_terminal()
    }

    pub fn became_filled(&self) -> bool {
        self.from != OrderStatus::Filled && self.to == OrderStatus::Filled
    }
}

fn progress_rank(status: OrderStatus) -> u8 {
    match status {
        OrderStatus::Pending => 0,
        OrderStatus::Open => 1,
        OrderStatus::PartiallyFilled => 2,
        OrderStatus::Filled
        | OrderStatus::Canceled
        | OrderStatus::Rejected
        | OrderStatus::Failed => 3,
    }
}

fn next_status(current: OrderStatus, reported: OrderStatus) -> OrderStatus {
    // A fill report always wins, even over a terminal cancel seen earlier.
    if reported == OrderStatus::Filled {
        return OrderStatus::Filled;
    }
    if current.is_terminal() {
        return current;
    }
    if progress_rank(reported) < progress_rank(current) {
        return current;
    }
    reported
}

fn is_out_of_order(current: OrderStatus, reported: OrderStatus) -> bool {
    if reported == OrderStatus::Filled || reported == current {
        return false;
    }
    current.is_terminal() || progress_rank(reported) < progress_rank(current)
}

/// Applies an exchange snapshot to the local record. Returns the transition when
/// the status or the filled quantity moved; stale reports change nothing.
pub fn apply_snapshot(
    record: &mut OrderRecord,
    snapshot: &OrderSnapshot,
    now_ms: u64,
) -> Option<StatusTransition> {
    let from = record.status;
    if is_out_of_order(from, snapshot.status) {
        LIFECYCLE_OUT_OF_ORDER_TOTAL.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            target: "desk",
            order_id = %record.exchange_order_id,
            current = from.as_str(),
            reported = snapshot.status.as_str(),
            "stale order status ignored"
        );
    }

    let to = next_status(from, snapshot.status);
    let previous_filled = record.filled_quantity;
    let filled_quantity = if to == OrderStatus::Filled {
        snapshot.filled_quantity.max(previous_filled)
    } else if from.is_terminal() {
        previous_filled
    } else {
        snapshot.filled_quantity.max(previous_filled)
    };

    if to == from && filled_quantity == previous_filled {
        return None;
    }

    record.status = to;
    record.filled_quantity = filled_quantity;
    if snapshot.avg_fill_price.is_some() {
        record.avg_fill_price = snapshot.avg_fill_price;
    }
    record.last_updated_at_ms = now_ms;

    Some(StatusTransition {
        order_id: record.exchange_order_id.clone(),
        from,
        to,
        filled_quantity,
        newly_filled: filled_quantity - previous_filled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_wins_over_canceled() {
        assert_eq!(
            next_status(OrderStatus::Canceled, OrderStatus::Filled),
            OrderStatus::Filled
        );
    }

    #[test]
    fn test_terminal_is_sticky() {
        assert_eq!(
            next_status(OrderStatus::Filled, OrderStatus::Open),
            OrderStatus::Filled
        );
        assert_eq!(
            next_status(OrderStatus::Rejected, OrderStatus::Canceled),
            OrderStatus::Rejected
        );
    }

    #[test]
    fn test_no_regression_from_partial_to_open() {
        assert_eq!(
            next_status(OrderStatus::PartiallyFilled, OrderStatus::Open),
            OrderStatus::PartiallyFilled
        );
        assert!(is_out_of_order(
            OrderStatus::PartiallyFilled,
            OrderStatus::Open
        ));
    }
}

//! One-cancels-other pairs.
//!
//! With native venue support the exchange cancels the sibling and the engine only
//! mirrors state. Without it the engine cancels the sibling itself and declares
//! the pair resolved only after a status query confirms the cancel.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::{OrderId, OrderRecord, OrderStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OcoState {
    Pending,
    /// One leg traded; the other closed with `sibling_status`, normally
    /// `Canceled` but `Rejected` or `Failed` when the venue ended it first.
    Resolved {
        filled: OrderId,
        sibling: OrderId,
        sibling_status: OrderStatus,
    },
    /// Both legs traded before the sibling cancel landed.
    BothFilled,
    /// Neither leg traded and both are closed.
    Closed,
}

impl OcoState {
    pub fn is_final(&self) -> bool {
        !matches!(self, OcoState::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OcoPair {
    pub first: OrderId,
    pub second: OrderId,
    pub native: bool,
    pub state: OcoState,
}

impl OcoPair {
    pub fn new(first: OrderId, second: OrderId, native: bool) -> Self {
        Self {
            first,
            second,
            native,
            state: OcoState::Pending,
        }
    }

    pub fn key(&self) -> &str {
        &self.first
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcoAction {
    Wait,
    CancelSibling { filled: OrderId, sibling: OrderId },
    Settle(OcoState),
}

fn has_fill(record: &OrderRecord) -> bool {
    record.status == OrderStatus::Filled || record.filled_quantity > Decimal::ZERO
}

/// What to do next given the latest view of both legs.
pub fn decide(first: &OrderRecord, second: &OrderRecord) -> OcoAction {
    match (has_fill(first), has_fill(second)) {
        (true, true) => OcoAction::Settle(OcoState::BothFilled),
        (true, false) => settle_or_cancel(first, second),
        (false, true) => settle_or_cancel(second, first),
        (false, false) => {
            if first.is_terminal() && second.is_terminal() {
                OcoAction::Settle(OcoState::Closed)
            } else {
                OcoAction::Wait
            }
        }
    }
}

fn settle_or_cancel(filled: &OrderRecord, sibling: &OrderRecord) -> OcoAction {
    if sibling.is_terminal() {
        OcoAction::Settle(OcoState::Resolved {
            filled: filled.exchange_order_id.clone(),
            sibling: sibling.exchange_order_id.clone(),
            sibling_status: sibling.status,
        })
    } else {
        OcoAction::CancelSibling {
            filled: filled.exchange_order_id.clone(),
            sibling: sibling.exchange_order_id.clone(),
        }
    }
}

//! Time-weighted slicing of one parent order.
//!
//! `TwapPlan` fixes every slice size and offset up front, so the total is exact
//! before anything is sent. The scheduler task submits one slice per tick through
//! the execution engine and aborts the whole plan on the first failed slice.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::handle::{StatusReporter, StrategyProgress, StrategyStatus};
use crate::error::{StrategyFatalError, ValidationError};
use crate::events::EventType;
use crate::execution::ExecutionEngine;
use crate::execution::engine::intent_details;
use crate::execution::precision::{floor_to_step, validate_intent};
use crate::types::{OrderId, OrderIntent, OrderRecord, OrderStatus};
use crate::venue::SymbolRules;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwapPlan {
    parent: OrderIntent,
    total_duration: Duration,
    slice_count: u32,
    slice_quantities: Vec<Decimal>,
    interval: Duration,
}

impl TwapPlan {
    /// Builds a plan without touching the network. Every slice but the last is
    /// `Q / N` floored to the lot step; the last one takes the remainder.
    pub fn new(
        parent: OrderIntent,
        total_duration: Duration,
        slice_count: u32,
        rules: &SymbolRules,
    ) -> Result<Self, ValidationError> {
        if slice_count == 0 {
            return Err(ValidationError::ZeroSliceCount);
        }
        if total_duration.is_zero() {
            return Err(ValidationError::ZeroDuration);
        }
        validate_intent(&parent, rules)?;

        let total = parent.quantity();
        let slice = floor_to_step(total / Decimal::from(slice_count), rules.step_size);
        if slice <= Decimal::ZERO {
            return Err(ValidationError::SliceRoundsToZero {
                quantity: total,
                slices: slice_count,
            });
        }
        if slice < rules.min_qty {
            return Err(ValidationError::BelowMinQuantity {
                quantity: slice,
                min: rules.min_qty,
            });
        }

        let mut slice_quantities = vec![slice; slice_count as usize - 1];
        let last = total - slice * Decimal::from(slice_count - 1);
        slice_quantities.push(last.normalize());

        Ok(Self {
            parent,
            total_duration,
            slice_count,
            slice_quantities,
            interval: total_duration / slice_count,
        })
    }

    pub fn parent(&self) -> &OrderIntent {
        &self.parent
    }

    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    pub fn slice_count(&self) -> u32 {
        self.slice_count
    }

    pub fn slice_quantities(&self) -> &[Decimal] {
        &self.slice_quantities
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Offset of each slice from the plan start.
    pub fn slice_offsets(&self) -> Vec<Duration> {
        (0..self.slice_count).map(|i| self.interval * i).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TwapSummary {
    pub executed_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub slices_total: u32,
    pub slices_submitted: u32,
    pub slices_filled: u32,
    /// Executed quantity over the parent quantity.
    pub fill_rate: Decimal,
}

impl TwapSummary {
    pub fn from_slices(parent_quantity: Decimal, slices_total: u32, slices: &[OrderRecord]) -> Self {
        let mut executed_quantity = Decimal::ZERO;
        let mut priced_quantity = Decimal::ZERO;
        let mut notional = Decimal::ZERO;
        let mut slices_filled = 0;
        for record in slices {
            executed_quantity += record.filled_quantity;
            if record.status == OrderStatus::Filled {
                slices_filled += 1;
            }
            if let Some(price) = record.avg_fill_price {
                priced_quantity += record.filled_quantity;
                notional += record.filled_quantity * price;
            }
        }
        let average_fill_price = if priced_quantity > Decimal::ZERO {
            Some((notional / priced_quantity).normalize())
        } else {
            None
        };
        let fill_rate = if parent_quantity > Decimal::ZERO {
            (executed_quantity / parent_quantity).normalize()
        } else {
            Decimal::ZERO
        };
        Self {
            executed_quantity: executed_quantity.normalize(),
            average_fill_price,
            slices_total,
            slices_submitted: slices.len() as u32,
            slices_filled,
            fill_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwapProgress {
    pub symbol: String,
    pub parent_quantity: Decimal,
    pub slices_total: u32,
    pub executed_slices: Vec<OrderId>,
    pub submitted_quantity: Decimal,
    pub summary: Option<TwapSummary>,
}

impl TwapProgress {
    pub fn new(plan: &TwapPlan) -> Self {
        Self {
            symbol: plan.parent.symbol().to_string(),
            parent_quantity: plan.parent.quantity(),
            slices_total: plan.slice_count,
            executed_slices: Vec::new(),
            submitted_quantity: Decimal::ZERO,
            summary: None,
        }
    }
}

fn with_twap(reporter: &StatusReporter, apply: impl FnOnce(&mut TwapProgress)) {
    reporter.update(|snapshot| {
        if let StrategyProgress::Twap(progress) = &mut snapshot.progress {
            apply(progress);
        }
    });
}

pub(crate) async fn run_twap(
    engine: Arc<ExecutionEngine>,
    plan: TwapPlan,
    cancel: CancellationToken,
    reporter: StatusReporter,
) {
    let audit = Arc::clone(engine.audit());
    let strategy_id = reporter.snapshot().id;
    audit.emit(
        EventType::TwapStarted,
        None,
        json!({
            "strategy": strategy_id,
            "parent": intent_details(&plan.parent),
            "slices": plan.slice_count,
            "interval_ms": plan.interval.as_millis() as u64,
        }),
    );

    let mut slices: Vec<OrderRecord> = Vec::with_capacity(plan.slice_count as usize);
    let mut canceled = false;

    for (index, quantity) in plan.slice_quantities.iter().copied().enumerate() {
        if cancel.is_cancelled() {
            canceled = true;
            break;
        }

        let placed = match plan.parent.with_quantity(quantity) {
            Ok(intent) => engine.place_order(intent).await,
            Err(err) => Err(err.into()),
        };
        match placed {
            Ok(record) => {
                audit.emit(
                    EventType::TwapSliceSubmitted,
                    Some(&record.exchange_order_id),
                    json!({
                        "strategy": strategy_id,
                        "slice": index + 1,
                        "of": plan.slice_count,
                        "quantity": quantity.to_string(),
                    }),
                );
                with_twap(&reporter, |progress| {
                    progress.executed_slices.push(record.exchange_order_id.clone());
                    progress.submitted_quantity += quantity;
                });
                slices.push(record);
            }
            Err(err) => {
                let open_orders: Vec<OrderId> = slices
                    .iter()
                    .filter_map(|slice| engine.order(&slice.exchange_order_id))
                    .filter(|record| !record.is_terminal())
                    .map(|record| record.exchange_order_id)
                    .collect();
                let fatal = StrategyFatalError {
                    reason: format!("slice {} of {} failed: {}", index + 1, plan.slice_count, err),
                    open_orders,
                };
                let summary = TwapSummary::from_slices(plan.parent.quantity(), plan.slice_count, &slices);
                audit.emit(
                    EventType::TwapFailed,
                    None,
                    json!({
                        "strategy": strategy_id,
                        "reason": fatal.reason,
                        "attempts": err.attempts(),
                        "open_orders": fatal.open_orders,
                        "summary": summary,
                    }),
                );
                reporter.update(|snapshot| {
                    snapshot.status = StrategyStatus::Failed;
                    snapshot.error = Some(fatal.to_string());
                    snapshot.open_orders = fatal.open_orders.clone();
                    if let StrategyProgress::Twap(progress) = &mut snapshot.progress {
                        progress.summary = Some(summary);
                    }
                });
                return;
            }
        }

        if index + 1 < plan.slice_quantities.len() {
            tokio::select! {
                _ = tokio::time::sleep(plan.interval) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    // Pick up fills that landed after submission.
    for slice in slices.iter_mut() {
        if slice.is_terminal() {
            continue;
        }
        match engine.refresh_order(&slice.exchange_order_id).await {
            Ok(record) => *slice = record,
            Err(err) => {
                tracing::warn!(target: "desk", order_id = %slice.exchange_order_id, error = %err, "final slice refresh failed");
            }
        }
    }

    let summary = TwapSummary::from_slices(plan.parent.quantity(), plan.slice_count, &slices);
    let open_orders: Vec<OrderId> = slices
        .iter()
        .filter(|slice| !slice.is_terminal())
        .map(|slice| slice.exchange_order_id.clone())
        .collect();
    let (status, event_type) = if canceled {
        (StrategyStatus::Canceled, EventType::TwapCanceled)
    } else {
        (StrategyStatus::Completed, EventType::TwapCompleted)
    };
    audit.emit(
        event_type,
        None,
        json!({ "strategy": strategy_id, "summary": summary, "open_orders": open_orders }),
    );
    reporter.update(|snapshot| {
        snapshot.status = status;
        snapshot.open_orders = open_orders;
        if let StrategyProgress::Twap(progress) = &mut snapshot.progress {
            progress.summary = Some(summary);
        }
    });
}

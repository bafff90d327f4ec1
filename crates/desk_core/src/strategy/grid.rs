//! Grid ladder: resting limit orders between two bounds, refilled on the
//! opposite side at the same price whenever a level trades.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::handle::{StatusReporter, StrategyProgress, StrategyStatus};
use crate::error::{DeskError, StrategyFatalError, ValidationError};
use crate::events::EventType;
use crate::execution::ExecutionEngine;
use crate::execution::precision::{is_multiple_of, price_to_tick};
use crate::gateway::RetryPolicy;
use crate::types::{OrderId, OrderIntent, OrderRecord, OrderStatus, Side};
use crate::venue::SymbolRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridSpacing {
    #[default]
    Arithmetic,
    Geometric,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridConfig {
    pub symbol: String,
    pub lower: Decimal,
    pub upper: Decimal,
    pub level_count: u32,
    pub quantity_per_level: Decimal,
    pub spacing: GridSpacing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LevelState {
    Empty,
    /// Sits on the reference price; never quoted.
    Idle,
    OrderPlaced,
    Stalled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridLevel {
    pub index: usize,
    pub price: Decimal,
    pub side: Option<Side>,
    pub active_order: Option<OrderId>,
    pub state: LevelState,
    pub fills: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridPlan {
    symbol: String,
    lower: Decimal,
    upper: Decimal,
    quantity_per_level: Decimal,
    spacing: GridSpacing,
    reference_price: Decimal,
    levels: Vec<GridLevel>,
}

impl GridPlan {
    /// Lays out the ladder around `reference_price`: below it BUY, above it SELL,
    /// exactly on it idle. Prices snap to the tick away from the reference.
    pub fn new(
        config: GridConfig,
        reference_price: Decimal,
        rules: &SymbolRules,
    ) -> Result<Self, ValidationError> {
        if config.symbol != rules.symbol {
            return Err(ValidationError::UnknownSymbol {
                symbol: config.symbol,
            });
        }
        if config.lower <= Decimal::ZERO {
            return Err(ValidationError::NonPositivePrice {
                field: "lower_bound",
                value: config.lower,
            });
        }
        if config.upper <= config.lower {
            return Err(ValidationError::InvalidGridBounds {
                lower: config.lower,
                upper: config.upper,
            });
        }
        if config.level_count < 2 {
            return Err(ValidationError::TooFewGridLevels {
                levels: config.level_count,
            });
        }
        if reference_price <= Decimal::ZERO {
            return Err(ValidationError::NonPositivePrice {
                field: "reference_price",
                value: reference_price,
            });
        }
        check_level_quantity(config.quantity_per_level, rules)?;

        let raw = raw_prices(&config)?;
        let mut levels: Vec<GridLevel> = Vec::with_capacity(raw.len());
        for (index, price) in raw.into_iter().enumerate() {
            let (side, price) = if price < reference_price {
                (Some(Side::Buy), price_to_tick(Side::Buy, price, rules.tick_size))
            } else if price > reference_price {
                (Some(Side::Sell), price_to_tick(Side::Sell, price, rules.tick_size))
            } else {
                (None, price_to_tick(Side::Buy, price, rules.tick_size))
            };
            if let Some(prev) = levels.last() {
                if price <= prev.price {
                    return Err(ValidationError::GridLevelCollision {
                        index: prev.index,
                        next: index,
                    });
                }
            }
            levels.push(GridLevel {
                index,
                price,
                side,
                active_order: None,
                state: if side.is_some() {
                    LevelState::Empty
                } else {
                    LevelState::Idle
                },
                fills: 0,
            });
        }

        if let Some(lowest) = levels.first() {
            let notional = lowest.price * config.quantity_per_level;
            if notional < rules.min_notional {
                return Err(ValidationError::BelowMinNotional {
                    notional,
                    min: rules.min_notional,
                });
            }
        }

        Ok(Self {
            symbol: config.symbol,
            lower: config.lower,
            upper: config.upper,
            quantity_per_level: config.quantity_per_level,
            spacing: config.spacing,
            reference_price,
            levels,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bounds(&self) -> (Decimal, Decimal) {
        (self.lower, self.upper)
    }

    pub fn quantity_per_level(&self) -> Decimal {
        self.quantity_per_level
    }

    pub fn spacing(&self) -> GridSpacing {
        self.spacing
    }

    pub fn reference_price(&self) -> Decimal {
        self.reference_price
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}

fn check_level_quantity(quantity: Decimal, rules: &SymbolRules) -> Result<(), ValidationError> {
    if quantity <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveQuantity { quantity });
    }
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
    Ok(())
}

fn raw_prices(config: &GridConfig) -> Result<Vec<Decimal>, ValidationError> {
    let last = config.level_count as usize - 1;
    let span = config.upper - config.lower;
    let gaps = Decimal::from(last as u64);
    let bad_bounds = || ValidationError::InvalidGridBounds {
        lower: config.lower,
        upper: config.upper,
    };

    let ratio = match config.spacing {
        GridSpacing::Arithmetic => None,
        GridSpacing::Geometric => {
            let lower = config.lower.to_f64().ok_or_else(bad_bounds)?;
            let upper = config.upper.to_f64().ok_or_else(bad_bounds)?;
            Some((lower, (upper / lower).powf(1.0 / last as f64)))
        }
    };

    let mut prices = Vec::with_capacity(last + 1);
    for i in 0..=last {
        let price = if i == 0 {
            config.lower
        } else if i == last {
            config.upper
        } else {
            match ratio {
                None => config.lower + span * Decimal::from(i as u64) / gaps,
                Some((lower, ratio)) => {
                    // Trim float noise before the tick snap.
                    Decimal::from_f64(lower * ratio.powi(i as i32))
                        .ok_or_else(bad_bounds)?
                        .round_dp(10)
                }
            }
        };
        prices.push(price);
    }
    Ok(prices)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridRuntime {
    pub poll_interval: Duration,
    /// Strategy-level retry for a level's order, on top of the gateway's own.
    pub retry: RetryPolicy,
}

impl Default for GridRuntime {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            retry: RetryPolicy::new(3, Duration::from_secs(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridProgress {
    pub symbol: String,
    pub reference_price: Decimal,
    pub levels: Vec<GridLevel>,
    pub fills_total: u64,
    pub stalled_levels: Vec<usize>,
}

impl GridProgress {
    pub fn new(plan: &GridPlan) -> Self {
        Self::from_levels(plan.symbol.clone(), plan.reference_price, plan.levels.clone())
    }

    fn from_levels(symbol: String, reference_price: Decimal, levels: Vec<GridLevel>) -> Self {
        let fills_total = levels.iter().map(|level| u64::from(level.fills)).sum();
        let stalled_levels = levels
            .iter()
            .filter(|level| level.state == LevelState::Stalled)
            .map(|level| level.index)
            .collect();
        Self {
            symbol,
            reference_price,
            levels,
            fills_total,
            stalled_levels,
        }
    }
}

struct LevelSlot {
    level: GridLevel,
    /// The level's previous order, once its fill has been acted on.
    last_filled: Option<OrderId>,
}

struct GridRunner {
    engine: Arc<ExecutionEngine>,
    strategy_id: u64,
    symbol: String,
    reference_price: Decimal,
    quantity: Decimal,
    retry: RetryPolicy,
    slots: Vec<Arc<Mutex<LevelSlot>>>,
}

pub(crate) async fn run_grid(
    engine: Arc<ExecutionEngine>,
    plan: GridPlan,
    runtime: GridRuntime,
    cancel: CancellationToken,
    reporter: StatusReporter,
    mut fills: mpsc::UnboundedReceiver<OrderId>,
) {
    let runner = GridRunner {
        strategy_id: reporter.snapshot().id,
        symbol: plan.symbol.clone(),
        reference_price: plan.reference_price,
        quantity: plan.quantity_per_level,
        retry: runtime.retry,
        slots: plan
            .levels
            .iter()
            .cloned()
            .map(|level| {
                Arc::new(Mutex::new(LevelSlot {
                    level,
                    last_filled: None,
                }))
            })
            .collect(),
        engine,
    };

    runner.engine.audit().emit(
        EventType::GridStarted,
        None,
        json!({
            "strategy": runner.strategy_id,
            "symbol": plan.symbol,
            "reference_price": plan.reference_price.to_string(),
            "spacing": plan.spacing,
            "levels": plan
                .levels
                .iter()
                .map(|level| json!({
                    "price": level.price.to_string(),
                    "side": level.side.map(Side::as_str),
                }))
                .collect::<Vec<_>>(),
        }),
    );

    if let Err(err) = runner.seed().await {
        runner.fail(&reporter, err).await;
        return;
    }
    runner.publish(&reporter).await;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                runner.teardown(&reporter).await;
                return;
            }
            Some(order_id) = fills.recv() => runner.on_notification(&order_id).await,
            _ = tokio::time::sleep(runtime.poll_interval) => runner.poll_all().await,
        };
        if let Err(err) = outcome {
            runner.fail(&reporter, err).await;
            return;
        }
        runner.publish(&reporter).await;
    }
}

impl GridRunner {
    async fn seed(&self) -> Result<(), DeskError> {
        let results = join_all(self.slots.iter().map(|slot| async move {
            let mut slot = slot.lock().await;
            if slot.level.state != LevelState::Empty {
                return Ok(());
            }
            let side = slot.level.side;
            match side {
                Some(side) => self.place_for_level(&mut slot, side).await,
                None => Ok(()),
            }
        }))
        .await;
        results.into_iter().collect()
    }

    /// Fill checks run concurrently across levels. A level whose previous
    /// operation is still in flight is skipped this round.
    async fn poll_all(&self) -> Result<(), DeskError> {
        let results = join_all(self.slots.iter().map(|slot| self.check_level(slot))).await;
        results.into_iter().collect()
    }

    async fn check_level(&self, slot: &Arc<Mutex<LevelSlot>>) -> Result<(), DeskError> {
        let Ok(mut slot) = slot.try_lock() else {
            return Ok(());
        };
        if slot.level.state != LevelState::OrderPlaced {
            return Ok(());
        }
        let Some(order_id) = slot.level.active_order.clone() else {
            return Ok(());
        };
        match self.engine.refresh_order(&order_id).await {
            Ok(record) => self.react(&mut slot, record).await,
            Err(err) if err.is_fatal_for_strategy() => Err(err),
            Err(err) => {
                tracing::warn!(target: "desk", level = slot.level.index, order_id = %order_id, error = %err, "grid fill check failed");
                Ok(())
            }
        }
    }

    /// Pushed fill notice. Duplicates are dropped by order id.
    async fn on_notification(&self, order_id: &str) -> Result<(), DeskError> {
        for slot in &self.slots {
            let mut slot = slot.lock().await;
            if slot.last_filled.as_deref() == Some(order_id) {
                tracing::debug!(target: "desk", level = slot.level.index, order_id, "duplicate fill notice ignored");
                return Ok(());
            }
            if slot.level.active_order.as_deref() != Some(order_id) {
                continue;
            }
            return match self.engine.refresh_order(order_id).await {
                Ok(record) => self.react(&mut slot, record).await,
                Err(err) if err.is_fatal_for_strategy() => Err(err),
                Err(err) => {
                    tracing::warn!(target: "desk", order_id, error = %err, "could not confirm fill notice, leaving it to polling");
                    Ok(())
                }
            };
        }
        tracing::debug!(target: "desk", order_id, "fill notice for an order outside the grid");
        Ok(())
    }

    async fn react(&self, slot: &mut LevelSlot, record: OrderRecord) -> Result<(), DeskError> {
        match record.status {
            OrderStatus::Filled => self.on_fill(slot, record).await,
            status if status.is_terminal() => {
                self.stall(slot, record.side(), 0, &format!("order {} ended {}", record.exchange_order_id, status.as_str()));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_fill(&self, slot: &mut LevelSlot, record: OrderRecord) -> Result<(), DeskError> {
        if slot.last_filled.as_ref() == Some(&record.exchange_order_id) {
            return Ok(());
        }
        slot.last_filled = Some(record.exchange_order_id.clone());
        let filled_side = record.side();
        slot.level.fills += 1;
        slot.level.active_order = None;
        slot.level.state = LevelState::Empty;
        self.engine.audit().emit(
            EventType::GridLevelFilled,
            Some(&record.exchange_order_id),
            json!({
                "strategy": self.strategy_id,
                "level": slot.level.index,
                "price": slot.level.price.to_string(),
                "side": filled_side.as_str(),
                "quantity": record.filled_quantity.to_string(),
            }),
        );
        self.place_for_level(slot, filled_side.opposite()).await
    }

    /// Places the level's order, retrying transient failures with backoff.
    /// Rejections and exhaustion stall only this level; fatal errors are
    /// returned to abort the grid.
    async fn place_for_level(&self, slot: &mut LevelSlot, side: Side) -> Result<(), DeskError> {
        let intent = match OrderIntent::limit(self.symbol.clone(), side, self.quantity, slot.level.price) {
            Ok(intent) => intent,
            Err(err) => {
                self.stall(slot, side, 0, &err.to_string());
                return Ok(());
            }
        };

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.engine.place_order(intent.clone()).await {
                Ok(record) => {
                    slot.level.side = Some(side);
                    slot.level.active_order = Some(record.exchange_order_id.clone());
                    slot.level.state = LevelState::OrderPlaced;
                    self.engine.audit().emit(
                        EventType::GridOrderPlaced,
                        Some(&record.exchange_order_id),
                        json!({
                            "strategy": self.strategy_id,
                            "level": slot.level.index,
                            "price": slot.level.price.to_string(),
                            "side": side.as_str(),
                        }),
                    );
                    return Ok(());
                }
                Err(err) if err.is_fatal_for_strategy() => return Err(err),
                Err(DeskError::Validation(err)) => {
                    self.stall(slot, side, attempts, &err.to_string());
                    return Ok(());
                }
                Err(err) if !err.is_transient() => {
                    self.stall(slot, side, attempts, &err.to_string());
                    return Ok(());
                }
                Err(err) => {
                    if !self.retry.has_attempts_left(attempts) {
                        self.stall(slot, side, attempts, &err.to_string());
                        return Ok(());
                    }
                    let delay = self.retry.delay_after(attempts);
                    tracing::warn!(
                        target: "desk",
                        level = slot.level.index,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "grid order failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn stall(&self, slot: &mut LevelSlot, side: Side, attempts: u32, error: &str) {
        slot.level.side = Some(side);
        slot.level.active_order = None;
        slot.level.state = LevelState::Stalled;
        self.engine.audit().emit(
            EventType::GridLevelStalled,
            None,
            json!({
                "strategy": self.strategy_id,
                "level": slot.level.index,
                "price": slot.level.price.to_string(),
                "side": side.as_str(),
                "attempts": attempts,
                "error": error,
            }),
        );
    }

    async fn levels(&self) -> Vec<GridLevel> {
        let mut levels = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            levels.push(slot.lock().await.level.clone());
        }
        levels
    }

    async fn publish(&self, reporter: &StatusReporter) {
        let progress = GridProgress::from_levels(self.symbol.clone(), self.reference_price, self.levels().await);
        reporter.update(|snapshot| {
            snapshot.open_orders = active_orders(&progress.levels);
            snapshot.progress = StrategyProgress::Grid(progress);
        });
    }

    /// Explicit stop: cancel every resting grid order and report each result.
    async fn teardown(&self, reporter: &StatusReporter) {
        let mut canceled = Vec::new();
        let mut failed = Vec::new();
        for slot in &self.slots {
            let mut slot = slot.lock().await;
            let Some(order_id) = slot.level.active_order.clone() else {
                continue;
            };
            match self.engine.cancel_order(&order_id).await {
                Ok(record) if record.status == OrderStatus::Filled => {
                    // Traded before the cancel landed; nothing left to pull.
                    slot.level.fills += 1;
                    slot.level.active_order = None;
                    slot.level.state = LevelState::Empty;
                    canceled.push(json!({ "order_id": order_id, "result": "already_filled" }));
                }
                Ok(_) => {
                    slot.level.active_order = None;
                    slot.level.state = LevelState::Empty;
                    canceled.push(json!({ "order_id": order_id, "result": "canceled" }));
                }
                Err(err) => {
                    tracing::warn!(target: "desk", order_id = %order_id, error = %err, "grid order cancel failed during stop");
                    failed.push(json!({ "order_id": order_id, "error": err.to_string() }));
                }
            }
        }
        self.engine.audit().emit(
            EventType::GridStopped,
            None,
            json!({ "strategy": self.strategy_id, "canceled": canceled, "failed": failed }),
        );
        self.publish(reporter).await;
        reporter.update(|snapshot| snapshot.status = StrategyStatus::Canceled);
    }

    /// Fatal path: resting orders are left where they are and reported.
    async fn fail(&self, reporter: &StatusReporter, err: DeskError) {
        let levels = self.levels().await;
        let fatal = StrategyFatalError {
            reason: err.to_string(),
            open_orders: active_orders(&levels),
        };
        self.engine.audit().emit(
            EventType::GridFailed,
            None,
            json!({
                "strategy": self.strategy_id,
                "reason": fatal.reason,
                "open_orders": fatal.open_orders,
            }),
        );
        self.publish(reporter).await;
        reporter.update(|snapshot| {
            snapshot.status = StrategyStatus::Failed;
            snapshot.error = Some(fatal.to_string());
            snapshot.open_orders = fatal.open_orders.clone();
        });
    }
}

fn active_orders(levels: &[GridLevel]) -> Vec<OrderId> {
    levels
        .iter()
        .filter_map(|level| level.active_order.clone())
        .collect()
}

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Value, json};

use super::lifecycle::{StatusTransition, apply_snapshot};
use super::oco::{OcoAction, OcoPair, OcoState, decide};
use super::precision::{check_notional, validate_intent};
use crate::clock::Clock;
use crate::error::{DeskError, NotFoundError, ValidationError};
use crate::events::{AuditLog, EventType};
use crate::gateway::GatewayAdapter;
use crate::types::{
    AssetBalance, HistoricalOrder, OrderId, OrderIntent, OrderRecord, OrderSnapshot, OrderStatus,
    OrderType,
};
use crate::venue::{SymbolRegistry, SymbolRules};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    pub max_order_notional: Decimal,
    /// Closed orders kept for lookup after they stop trading. Older ones are
    /// dropped so long-running strategies do not grow the order map.
    pub retained_closed_orders: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_order_notional: Decimal::from(10_000),
            retained_closed_orders: 256,
        }
    }
}

/// Outcome of `cancel_all`. Per-order failures are collected, not raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CancelAllReport {
    pub canceled: Vec<OrderId>,
    pub failed: Vec<(OrderId, String)>,
}

/// Validates and submits single orders and owns every `OrderRecord` transition.
pub struct ExecutionEngine {
    gateway: Arc<GatewayAdapter>,
    registry: Arc<SymbolRegistry>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    limits: EngineLimits,
    orders: Mutex<HashMap<OrderId, OrderRecord>>,
    closed: Mutex<VecDeque<OrderId>>,
    oco_pairs: Mutex<HashMap<OrderId, OcoPair>>,
}

impl ExecutionEngine {
    pub fn new(
        gateway: Arc<GatewayAdapter>,
        registry: Arc<SymbolRegistry>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        limits: EngineLimits,
    ) -> Self {
        Self {
            gateway,
            registry,
            audit,
            clock,
            limits,
            orders: Mutex::new(HashMap::new()),
            closed: Mutex::new(VecDeque::new()),
            oco_pairs: Mutex::new(HashMap::new()),
        }
    }

    pub fn gateway(&self) -> &Arc<GatewayAdapter> {
        &self.gateway
    }

    pub fn registry(&self) -> &Arc<SymbolRegistry> {
        &self.registry
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn limits(&self) -> EngineLimits {
        self.limits
    }

    /// Precision and notional checks. Only market orders touch the network here,
    /// for the reference price the notional check needs.
    pub async fn validate(&self, intent: &OrderIntent) -> Result<SymbolRules, DeskError> {
        let rules = self.registry.require(intent.symbol())?;
        validate_intent(intent, &rules)?;
        let price = match (intent.order_type(), intent.price()) {
            (OrderType::Market, _) | (_, None) => self.gateway.ticker_price(intent.symbol()).await?,
            (_, Some(price)) => price,
        };
        check_notional(intent.quantity() * price, &rules, self.limits.max_order_notional)?;
        Ok(rules)
    }

    pub async fn place_order(&self, intent: OrderIntent) -> Result<OrderRecord, DeskError> {
        if let Err(err) = self.validate(&intent).await {
            self.audit.emit(
                EventType::OrderRejected,
                None,
                json!({ "intent": intent_details(&intent), "reason": err.to_string() }),
            );
            return Err(err);
        }
        self.submit_validated(intent).await
    }

    async fn submit_validated(&self, intent: OrderIntent) -> Result<OrderRecord, DeskError> {
        match self.gateway.submit_order(&intent).await {
            Ok(record) => {
                self.track_submitted(&record);
                Ok(record)
            }
            Err(err) => {
                self.audit.emit(
                    EventType::OrderFailed,
                    None,
                    json!({
                        "intent": intent_details(&intent),
                        "attempts": err.attempts(),
                        "transient": err.is_transient(),
                        "error": err.to_string(),
                    }),
                );
                Err(err)
            }
        }
    }

    fn track_submitted(&self, record: &OrderRecord) {
        self.audit.emit(
            EventType::OrderSubmitted,
            Some(&record.exchange_order_id),
            json!({ "intent": intent_details(&record.intent), "status": record.status.as_str() }),
        );
        if record.is_terminal() {
            let transition = StatusTransition {
                order_id: record.exchange_order_id.clone(),
                from: OrderStatus::Pending,
                to: record.status,
                filled_quantity: record.filled_quantity,
                newly_filled: record.filled_quantity,
            };
            self.emit_transition(record, &transition);
        }
        self.orders()
            .insert(record.exchange_order_id.clone(), record.clone());
        if record.is_terminal() {
            self.retire(&record.exchange_order_id);
        }
    }

    /// Cancels a tracked order. A record that is already terminal is returned as is.
    pub async fn cancel_order(&self, order_id: &str) -> Result<OrderRecord, DeskError> {
        let record = self.require(order_id)?;
        if record.is_terminal() {
            tracing::debug!(target: "desk", order_id, status = record.status.as_str(), "cancel skipped, order already terminal");
            return Ok(record);
        }
        match self.gateway.cancel_order(record.symbol(), order_id).await {
            Ok(snapshot) => Ok(self.apply(&snapshot).unwrap_or(record)),
            Err(err) => {
                tracing::warn!(target: "desk", order_id, error = %err, "cancel failed");
                Err(err)
            }
        }
    }

    /// Polls the exchange for one tracked order and applies the result.
    pub async fn refresh_order(&self, order_id: &str) -> Result<OrderRecord, DeskError> {
        let record = self.require(order_id)?;
        let snapshot = self
            .gateway
            .order_status(record.symbol(), order_id)
            .await?;
        Ok(self.apply(&snapshot).unwrap_or(record))
    }

    /// Entry point for pushed acknowledgments, such as a user-data stream.
    /// Unknown order ids are ignored.
    pub fn apply_update(&self, snapshot: &OrderSnapshot) -> Option<OrderRecord> {
        self.apply(snapshot)
    }

    fn apply(&self, snapshot: &OrderSnapshot) -> Option<OrderRecord> {
        let now = self.clock.now_ms();
        let (record, transition) = {
            let mut orders = self.orders();
            let record = orders.get_mut(&snapshot.order_id)?;
            let transition = apply_snapshot(record, snapshot, now);
            (record.clone(), transition)
        };
        if let Some(transition) = transition {
            self.emit_transition(&record, &transition);
            if transition.became_terminal() {
                self.retire(&record.exchange_order_id);
            }
        }
        Some(record)
    }

    /// Queues a closed order for eviction and drops the oldest beyond the
    /// retention limit. Legs of an unsettled OCO pair wait until it settles.
    fn retire(&self, order_id: &str) {
        let pending_leg = self
            .oco_map()
            .values()
            .any(|pair| !pair.state.is_final() && (pair.first == order_id || pair.second == order_id));
        if pending_leg {
            return;
        }
        let evicted: Vec<OrderId> = {
            let mut closed = self.closed();
            if closed.iter().any(|id| id == order_id) {
                return;
            }
            closed.push_back(order_id.to_string());
            let excess = closed.len().saturating_sub(self.limits.retained_closed_orders);
            closed.drain(..excess).collect()
        };
        if evicted.is_empty() {
            return;
        }
        {
            let mut orders = self.orders();
            for id in &evicted {
                orders.remove(id);
            }
        }
        self.oco_map()
            .retain(|_, pair| !evicted.contains(&pair.first) && !evicted.contains(&pair.second));
        tracing::trace!(target: "desk", evicted = evicted.len(), "closed orders evicted");
    }

    /// Orders currently held in memory, open and recently closed.
    pub fn tracked_order_count(&self) -> usize {
        self.orders().len()
    }

    fn emit_transition(&self, record: &OrderRecord, transition: &StatusTransition) {
        let event_type = match transition.to {
            OrderStatus::Filled if transition.became_filled() => EventType::OrderFilled,
            OrderStatus::Canceled if transition.became_terminal() => EventType::OrderCanceled,
            OrderStatus::Rejected if transition.became_terminal() => EventType::OrderRejected,
            OrderStatus::Failed if transition.became_terminal() => EventType::OrderFailed,
            _ => EventType::OrderStatusChanged,
        };
        self.audit.emit(
            event_type,
            Some(&transition.order_id),
            json!({
                "symbol": record.symbol(),
                "side": record.side().as_str(),
                "from": transition.from.as_str(),
                "to": transition.to.as_str(),
                "filled_quantity": transition.filled_quantity.to_string(),
                "newly_filled": transition.newly_filled.to_string(),
                "avg_fill_price": record.avg_fill_price.map(|p| p.to_string()),
            }),
        );
    }

    pub fn order(&self, order_id: &str) -> Option<OrderRecord> {
        self.orders().get(order_id).cloned()
    }

    fn require(&self, order_id: &str) -> Result<OrderRecord, NotFoundError> {
        self.order(order_id).ok_or_else(|| NotFoundError {
            order_id: order_id.to_string(),
        })
    }

    /// Tracked non-terminal orders for a symbol, oldest first.
    pub fn open_orders(&self, symbol: &str) -> Vec<OrderRecord> {
        let mut open: Vec<OrderRecord> = self
            .orders()
            .values()
            .filter(|record| record.symbol() == symbol && !record.is_terminal())
            .cloned()
            .collect();
        open.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.exchange_order_id.cmp(&b.exchange_order_id))
        });
        open
    }

    /// Brings tracked records in line with the venue's open-order list. Tracked
    /// orders missing from the list are queried one by one.
    pub async fn reconcile_open_orders(&self, symbol: &str) -> Result<Vec<OrderRecord>, DeskError> {
        let remote = self.gateway.open_orders(symbol).await?;
        for snapshot in &remote {
            self.apply(snapshot);
        }
        for record in self.open_orders(symbol) {
            if !remote.iter().any(|s| s.order_id == record.exchange_order_id) {
                self.refresh_order(&record.exchange_order_id).await?;
            }
        }
        Ok(self.open_orders(symbol))
    }

    /// Cancels every order the venue lists as open for `symbol`, including
    /// orders this engine did not place. Stops early only on errors no other
    /// cancel could get past.
    pub async fn cancel_all(&self, symbol: &str) -> Result<CancelAllReport, DeskError> {
        let open = self.gateway.open_orders(symbol).await?;
        let mut report = CancelAllReport::default();
        for snapshot in &open {
            let order_id = snapshot.order_id.clone();
            let outcome = if self.apply(snapshot).is_some() {
                self.cancel_order(&order_id).await.map(|_| ())
            } else {
                self.gateway.cancel_order(symbol, &order_id).await.map(|_| ())
            };
            match outcome {
                Ok(()) => report.canceled.push(order_id),
                Err(err) if err.is_fatal_for_strategy() => return Err(err),
                Err(err) => {
                    tracing::warn!(target: "desk", order_id = %order_id, error = %err, "cancel-all skipped an order");
                    report.failed.push((order_id, err.to_string()));
                }
            }
        }
        self.audit.emit(
            EventType::OrdersCanceledAll,
            None,
            json!({ "symbol": symbol, "canceled": report.canceled, "failed": report.failed.len() }),
        );
        Ok(report)
    }

    pub async fn order_history(&self, symbol: &str, limit: u32) -> Result<Vec<HistoricalOrder>, DeskError> {
        self.registry.require(symbol)?;
        self.gateway.order_history(symbol, limit).await
    }

    pub async fn account_balances(&self) -> Result<Vec<AssetBalance>, DeskError> {
        self.gateway.account_balances().await
    }

    /// Places two legs that cancel each other. Uses the venue's OCO when it has
    /// one; otherwise submits both legs and enforces the pairing in `poll_oco`.
    pub async fn place_oco(
        &self,
        first: OrderIntent,
        second: OrderIntent,
    ) -> Result<(OrderRecord, OrderRecord), DeskError> {
        for intent in [&first, &second] {
            if intent.order_type() == OrderType::Market {
                return Err(ValidationError::UnsupportedOrderType {
                    order_type: intent.order_type(),
                }
                .into());
            }
            if intent.symbol() != first.symbol() {
                return Err(ValidationError::UnknownSymbol {
                    symbol: intent.symbol().to_string(),
                }
                .into());
            }
        }
        for intent in [&first, &second] {
            if let Err(err) = self.validate(intent).await {
                self.audit.emit(
                    EventType::OrderRejected,
                    None,
                    json!({ "intent": intent_details(intent), "reason": err.to_string(), "oco": true }),
                );
                return Err(err);
            }
        }

        let native = self.gateway.capabilities().native_oco;
        let (a, b) = if native {
            match self.gateway.submit_oco(&first, &second).await {
                Ok((a, b)) => {
                    self.track_submitted(&a);
                    self.track_submitted(&b);
                    (a, b)
                }
                Err(err) => {
                    self.audit.emit(
                        EventType::OrderFailed,
                        None,
                        json!({
                            "intent": intent_details(&first),
                            "sibling": intent_details(&second),
                            "attempts": err.attempts(),
                            "error": err.to_string(),
                        }),
                    );
                    return Err(err);
                }
            }
        } else {
            let a = self.submit_validated(first).await?;
            let b = match self.submit_validated(second).await {
                Ok(b) => b,
                Err(err) => {
                    // A lone first leg is not an OCO; take it back.
                    if let Err(cancel_err) = self.cancel_order(&a.exchange_order_id).await {
                        tracing::error!(
                            target: "desk",
                            order_id = %a.exchange_order_id,
                            error = %cancel_err,
                            "failed to cancel first OCO leg after second leg failed"
                        );
                    }
                    return Err(err);
                }
            };
            (a, b)
        };

        let pair = OcoPair::new(a.exchange_order_id.clone(), b.exchange_order_id.clone(), native);
        self.audit.emit(
            EventType::OcoPlaced,
            Some(pair.key()),
            json!({ "first": pair.first, "second": pair.second, "native": native }),
        );
        self.oco_map().insert(pair.first.clone(), pair);
        Ok((a, b))
    }

    pub fn oco(&self, key: &str) -> Option<OcoPair> {
        self.oco_map().get(key).cloned()
    }

    /// One resolution step for a pair. Returns the pair state after the step.
    pub async fn poll_oco(&self, key: &str) -> Result<OcoState, DeskError> {
        let pair = self.oco(key).ok_or_else(|| NotFoundError {
            order_id: key.to_string(),
        })?;
        if pair.state.is_final() {
            return Ok(pair.state);
        }

        let first = self.refresh_order(&pair.first).await?;
        let second = self.refresh_order(&pair.second).await?;
        let state = match decide(&first, &second) {
            OcoAction::Wait => OcoState::Pending,
            OcoAction::Settle(state) => state,
            OcoAction::CancelSibling { filled, sibling } => {
                if !pair.native {
                    if let Err(err) = self.cancel_order(&sibling).await {
                        tracing::warn!(target: "desk", order_id = %sibling, error = %err, "OCO sibling cancel failed, confirming by status");
                    }
                }
                let sibling_record = self.refresh_order(&sibling).await?;
                let filled_record = self.require(&filled)?;
                match decide(&filled_record, &sibling_record) {
                    OcoAction::Settle(state) => state,
                    _ => OcoState::Pending,
                }
            }
        };

        if state.is_final() {
            let event_details = serde_json::to_value(&state).unwrap_or(Value::Null);
            self.audit.emit(
                EventType::OcoResolved,
                Some(pair.key()),
                json!({ "first": pair.first, "second": pair.second, "outcome": event_details }),
            );
            if state == OcoState::BothFilled {
                tracing::error!(target: "desk", first = %pair.first, second = %pair.second, "both OCO legs filled");
            }
            if let Some(stored) = self.oco_map().get_mut(key) {
                stored.state = state.clone();
            }
            self.retire(&pair.first);
            self.retire(&pair.second);
        }
        Ok(state)
    }

    /// Polls a pair until it settles. Transient poll errors are logged and retried
    /// on the next tick.
    pub async fn watch_oco(&self, key: &str, poll_interval: Duration) -> Result<OcoState, DeskError> {
        loop {
            match self.poll_oco(key).await {
                Ok(state) if state.is_final() => return Ok(state),
                Ok(_) => {}
                Err(err) if err.is_transient() => {
                    tracing::warn!(target: "desk", key, error = %err, "OCO poll failed, will retry");
                }
                Err(err) => return Err(err),
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    fn orders(&self) -> MutexGuard<'_, HashMap<OrderId, OrderRecord>> {
        match self.orders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target: "desk", "order map lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn closed(&self) -> MutexGuard<'_, VecDeque<OrderId>> {
        match self.closed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn oco_map(&self) -> MutexGuard<'_, HashMap<OrderId, OcoPair>> {
        match self.oco_pairs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub(crate) fn intent_details(intent: &OrderIntent) -> Value {
    json!({
        "symbol": intent.symbol(),
        "side": intent.side().as_str(),
        "type": intent.order_type().as_str(),
        "quantity": intent.quantity().to_string(),
        "price": intent.price().map(|p| p.to_string()),
        "stop_price": intent.stop_price().map(|p| p.to_string()),
        "time_in_force": intent.time_in_force().as_str(),
    })
}

//! Scriptable in-process exchange used by the test suites and for dry runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::time::Instant;

use super::{ApiError, ExchangeApi, VenueCapabilities};
use crate::clock::Clock;
use crate::error::ExchangeErrorKind;
use crate::types::{AssetBalance, HistoricalOrder, OrderIntent, OrderSnapshot, OrderStatus, OrderType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    ServerTime,
    Submit,
    SubmitOco,
    Cancel,
    Status,
    StatusByClientId,
    OpenOrders,
    History,
    Balances,
    Ticker,
}

#[derive(Debug, Clone)]
pub struct MockCall {
    pub op: MockOp,
    pub at: Instant,
    pub timestamp_ms: Option<u64>,
    pub order_id: Option<String>,
}

#[derive(Debug, Clone)]
struct MockOrder {
    intent: OrderIntent,
    snapshot: OrderSnapshot,
    created_at_ms: u64,
}

#[derive(Debug, Default)]
struct MockState {
    orders: HashMap<String, MockOrder>,
    order_seq: u64,
    by_client_id: HashMap<String, String>,
    failures: HashMap<MockOp, VecDeque<Option<ApiError>>>,
    lost_responses: HashMap<MockOp, VecDeque<ApiError>>,
    balances: Vec<AssetBalance>,
    oco_links: HashMap<String, String>,
    tickers: HashMap<String, Decimal>,
    calls: Vec<MockCall>,
}

pub struct MockExchange {
    clock: Arc<dyn Clock>,
    server_offset_ms: AtomicI64,
    recv_window_ms: Option<u64>,
    native_oco: bool,
    state: Mutex<MockState>,
}

impl MockExchange {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            server_offset_ms: AtomicI64::new(0),
            recv_window_ms: None,
            native_oco: false,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_native_oco(mut self) -> Self {
        self.native_oco = true;
        self
    }

    /// Rejects signed requests whose timestamp is further than `window_ms`
    /// from the server clock, the way the venue enforces `recvWindow`.
    pub fn with_recv_window(mut self, window_ms: u64) -> Self {
        self.recv_window_ms = Some(window_ms);
        self
    }

    pub fn set_server_offset_ms(&self, offset_ms: i64) {
        self.server_offset_ms.store(offset_ms, Ordering::SeqCst);
    }

    pub fn set_ticker(&self, symbol: &str, price: Decimal) {
        self.lock().tickers.insert(symbol.to_string(), price);
    }

    pub fn fail_next(&self, op: MockOp, error: ApiError) {
        self.lock().failures.entry(op).or_default().push_back(Some(error));
    }

    /// Lets the next scripted call of `op` through; pairs with `fail_next` to
    /// fail a later call.
    pub fn pass_next(&self, op: MockOp) {
        self.lock().failures.entry(op).or_default().push_back(None);
    }

    /// Carries out the next call of `op` but answers it with `error`, the way a
    /// request that reached the venue looks when its response is lost.
    pub fn lose_next_response(&self, op: MockOp, error: ApiError) {
        self.lock().lost_responses.entry(op).or_default().push_back(error);
    }

    pub fn set_balance(&self, asset: &str, wallet_balance: Decimal, available_balance: Decimal) {
        let mut state = self.lock();
        state.balances.retain(|balance| balance.asset != asset);
        state.balances.push(AssetBalance {
            asset: asset.to_string(),
            wallet_balance,
            available_balance,
        });
    }

    pub fn fail_times(&self, op: MockOp, times: usize, error: ApiError) {
        let mut state = self.lock();
        let queue = state.failures.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(Some(error.clone()));
        }
    }

    pub fn fill_order(&self, order_id: &str) -> bool {
        let now = self.server_now();
        let mut state = self.lock();
        let Some(order) = state.orders.get_mut(order_id) else {
            return false;
        };
        if order.snapshot.status.is_terminal() {
            return false;
        }
        order.snapshot.status = OrderStatus::Filled;
        order.snapshot.filled_quantity = order.intent.quantity();
        order.snapshot.avg_fill_price = order.intent.price();
        order.snapshot.update_ts_ms = now;

        if let Some(sibling) = state.oco_links.get(order_id).cloned() {
            if let Some(sibling) = state.orders.get_mut(&sibling) {
                if !sibling.snapshot.status.is_terminal() {
                    sibling.snapshot.status = OrderStatus::Canceled;
                    sibling.snapshot.update_ts_ms = now;
                }
            }
        }
        true
    }

    pub fn partially_fill(&self, order_id: &str, quantity: Decimal) -> bool {
        let now = self.server_now();
        let mut state = self.lock();
        let Some(order) = state.orders.get_mut(order_id) else {
            return false;
        };
        if order.snapshot.status.is_terminal() {
            return false;
        }
        order.snapshot.status = OrderStatus::PartiallyFilled;
        order.snapshot.filled_quantity = quantity.min(order.intent.quantity());
        order.snapshot.avg_fill_price = order.intent.price();
        order.snapshot.update_ts_ms = now;
        true
    }

    /// Closes a resting order on the venue side, as a triggered stop the
    /// matching engine refuses.
    pub fn reject_order(&self, order_id: &str) -> bool {
        let now = self.server_now();
        let mut state = self.lock();
        match state.orders.get_mut(order_id) {
            Some(order) if !order.snapshot.status.is_terminal() => {
                order.snapshot.status = OrderStatus::Rejected;
                order.snapshot.update_ts_ms = now;
                true
            }
            _ => false,
        }
    }

    pub fn order(&self, order_id: &str) -> Option<OrderSnapshot> {
        self.lock()
            .orders
            .get(order_id)
            .map(|order| order.snapshot.clone())
    }

    pub fn intent_of(&self, order_id: &str) -> Option<OrderIntent> {
        self.lock()
            .orders
            .get(order_id)
            .map(|order| order.intent.clone())
    }

    /// Non-terminal orders in submission order.
    pub fn open_order_ids(&self) -> Vec<String> {
        let state = self.lock();
        let mut ids: Vec<(u64, String)> = state
            .orders
            .iter()
            .filter(|(_, order)| !order.snapshot.status.is_terminal())
            .map(|(id, _)| (order_number(id), id.clone()))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Every accepted order, in submission order.
    pub fn submitted(&self) -> Vec<(String, OrderIntent)> {
        let state = self.lock();
        let mut orders: Vec<(u64, String, OrderIntent)> = state
            .orders
            .iter()
            .map(|(id, order)| (order_number(id), id.clone(), order.intent.clone()))
            .collect();
        orders.sort_by_key(|(n, _, _)| *n);
        orders.into_iter().map(|(_, id, intent)| (id, intent)).collect()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn calls_of(&self, op: MockOp) -> Vec<MockCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.op == op)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, op: MockOp) -> usize {
        self.calls_of(op).len()
    }

    fn server_now(&self) -> u64 {
        let adjusted = self.clock.now_ms() as i64 + self.server_offset_ms.load(Ordering::SeqCst);
        if adjusted < 0 { 0 } else { adjusted as u64 }
    }

    /// Logs the call, then pops a scripted failure or checks the timestamp.
    fn enter(
        &self,
        state: &mut MockState,
        op: MockOp,
        timestamp_ms: Option<u64>,
        order_id: Option<&str>,
    ) -> Result<(), ApiError> {
        state.calls.push(MockCall {
            op,
            at: Instant::now(),
            timestamp_ms,
            order_id: order_id.map(str::to_string),
        });
        if let Some(Some(err)) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if let (Some(window), Some(ts)) = (self.recv_window_ms, timestamp_ms) {
            if ts.abs_diff(self.server_now()) > window {
                return Err(ApiError::from_status(400, "timestamp outside of recvWindow")
                    .with_kind(ExchangeErrorKind::TimestampSkew));
            }
        }
        Ok(())
    }

    fn take_lost_response(&self, state: &mut MockState, op: MockOp) -> Result<(), ApiError> {
        match state.lost_responses.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Client order ids are unique per account; a reused one is refused.
    fn accept(
        &self,
        state: &mut MockState,
        intent: &OrderIntent,
        client_order_id: Option<&str>,
    ) -> Result<OrderSnapshot, ApiError> {
        if let Some(cid) = client_order_id {
            if state.by_client_id.contains_key(cid) {
                return Err(ApiError::from_status(400, format!("duplicate client order id {cid}"))
                    .with_kind(ExchangeErrorKind::DuplicateClientOrderId));
            }
        }

        state.order_seq += 1;
        let order_id = format!("m-{}", state.order_seq);
        let now = self.server_now();
        let snapshot = if intent.order_type() == OrderType::Market {
            let fill_price = state.tickers.get(intent.symbol()).copied();
            OrderSnapshot {
                order_id: order_id.clone(),
                status: OrderStatus::Filled,
                filled_quantity: intent.quantity(),
                avg_fill_price: fill_price,
                update_ts_ms: now,
            }
        } else {
            OrderSnapshot {
                order_id: order_id.clone(),
                status: OrderStatus::Open,
                filled_quantity: Decimal::ZERO,
                avg_fill_price: None,
                update_ts_ms: now,
            }
        };
        if let Some(cid) = client_order_id {
            state.by_client_id.insert(cid.to_string(), order_id.clone());
        }
        state.orders.insert(
            order_id,
            MockOrder {
                intent: intent.clone(),
                snapshot: snapshot.clone(),
                created_at_ms: now,
            },
        );
        Ok(snapshot)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn order_number(order_id: &str) -> u64 {
    order_id
        .strip_prefix("m-")
        .and_then(|n| n.parse().ok())
        .unwrap_or(u64::MAX)
}

fn unknown_order(order_id: &str) -> ApiError {
    ApiError::from_status(400, format!("unknown order {order_id}"))
        .with_kind(ExchangeErrorKind::NotFound)
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn server_time(&self) -> Result<u64, ApiError> {
        let mut state = self.lock();
        self.enter(&mut state, MockOp::ServerTime, None, None)?;
        Ok(self.server_now())
    }

    async fn submit_order(
        &self,
        intent: &OrderIntent,
        client_order_id: &str,
        timestamp_ms: u64,
    ) -> Result<OrderSnapshot, ApiError> {
        let mut state = self.lock();
        self.enter(&mut state, MockOp::Submit, Some(timestamp_ms), None)?;
        let snapshot = self.accept(&mut state, intent, Some(client_order_id))?;
        self.take_lost_response(&mut state, MockOp::Submit)?;
        Ok(snapshot)
    }

    async fn cancel_order(
        &self,
        _symbol: &str,
        order_id: &str,
        timestamp_ms: u64,
    ) -> Result<OrderSnapshot, ApiError> {
        let now = self.server_now();
        let mut state = self.lock();
        self.enter(&mut state, MockOp::Cancel, Some(timestamp_ms), Some(order_id))?;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| unknown_order(order_id))?;
        if order.snapshot.status.is_terminal() {
            return Err(ApiError::from_status(
                400,
                format!("order {order_id} is already {}", order.snapshot.status.as_str()),
            ));
        }
        order.snapshot.status = OrderStatus::Canceled;
        order.snapshot.update_ts_ms = now;
        Ok(order.snapshot.clone())
    }

    async fn order_status(
        &self,
        _symbol: &str,
        order_id: &str,
        timestamp_ms: u64,
    ) -> Result<OrderSnapshot, ApiError> {
        let mut state = self.lock();
        self.enter(&mut state, MockOp::Status, Some(timestamp_ms), Some(order_id))?;
        state
            .orders
            .get(order_id)
            .map(|order| order.snapshot.clone())
            .ok_or_else(|| unknown_order(order_id))
    }

    async fn order_by_client_id(
        &self,
        _symbol: &str,
        client_order_id: &str,
        timestamp_ms: u64,
    ) -> Result<OrderSnapshot, ApiError> {
        let mut state = self.lock();
        self.enter(&mut state, MockOp::StatusByClientId, Some(timestamp_ms), Some(client_order_id))?;
        state
            .by_client_id
            .get(client_order_id)
            .and_then(|order_id| state.orders.get(order_id))
            .map(|order| order.snapshot.clone())
            .ok_or_else(|| unknown_order(client_order_id))
    }

    async fn open_orders(&self, symbol: &str, timestamp_ms: u64) -> Result<Vec<OrderSnapshot>, ApiError> {
        let mut state = self.lock();
        self.enter(&mut state, MockOp::OpenOrders, Some(timestamp_ms), None)?;
        let mut open: Vec<OrderSnapshot> = state
            .orders
            .values()
            .filter(|order| order.intent.symbol() == symbol && !order.snapshot.status.is_terminal())
            .map(|order| order.snapshot.clone())
            .collect();
        open.sort_by_key(|snapshot| order_number(&snapshot.order_id));
        Ok(open)
    }

    async fn order_history(
        &self,
        symbol: &str,
        limit: u32,
        timestamp_ms: u64,
    ) -> Result<Vec<HistoricalOrder>, ApiError> {
        let mut state = self.lock();
        self.enter(&mut state, MockOp::History, Some(timestamp_ms), None)?;
        let mut history: Vec<HistoricalOrder> = state
            .orders
            .values()
            .filter(|order| order.intent.symbol() == symbol)
            .map(|order| HistoricalOrder {
                snapshot: order.snapshot.clone(),
                symbol: order.intent.symbol().to_string(),
                side: order.intent.side(),
                venue_type: order.intent.order_type().as_str().to_string(),
                quantity: order.intent.quantity(),
                price: order.intent.price(),
                created_at_ms: order.created_at_ms,
            })
            .collect();
        history.sort_by_key(|order| order_number(&order.snapshot.order_id));
        let skip = history.len().saturating_sub(limit as usize);
        Ok(history.split_off(skip))
    }

    async fn account_balances(&self, timestamp_ms: u64) -> Result<Vec<AssetBalance>, ApiError> {
        let mut state = self.lock();
        self.enter(&mut state, MockOp::Balances, Some(timestamp_ms), None)?;
        Ok(state.balances.clone())
    }

    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, ApiError> {
        let mut state = self.lock();
        self.enter(&mut state, MockOp::Ticker, None, None)?;
        state
            .tickers
            .get(symbol)
            .copied()
            .ok_or_else(|| ApiError::from_status(400, format!("invalid symbol {symbol}")))
    }

    fn capabilities(&self) -> VenueCapabilities {
        VenueCapabilities {
            native_oco: self.native_oco,
        }
    }

    async fn submit_oco(
        &self,
        first: &OrderIntent,
        second: &OrderIntent,
        timestamp_ms: u64,
    ) -> Result<(OrderSnapshot, OrderSnapshot), ApiError> {
        if !self.native_oco {
            return Err(ApiError::new(
                ExchangeErrorKind::Unsupported,
                "venue has no native OCO support",
            ));
        }
        let mut state = self.lock();
        self.enter(&mut state, MockOp::SubmitOco, Some(timestamp_ms), None)?;
        let a = self.accept(&mut state, first, None)?;
        let b = self.accept(&mut state, second, None)?;
        state.oco_links.insert(a.order_id.clone(), b.order_id.clone());
        state.oco_links.insert(b.order_id.clone(), a.order_id.clone());
        Ok((a, b))
    }
}

impl std::fmt::Debug for MockExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockExchange")
            .field("native_oco", &self.native_oco)
            .field("recv_window_ms", &self.recv_window_ms)
            .finish()
    }
}

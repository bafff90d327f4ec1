use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::json;

use super::backoff::RetryPolicy;
use super::clock_sync::{ClockSample, ClockSync};
use super::rate_limit::RateLimiter;
use super::{ApiError, ExchangeApi, VenueCapabilities};
use crate::clock::Clock;
use crate::error::{DeskError, ExchangeError, ExchangeErrorKind, NotFoundError};
use crate::events::{AuditLog, EventType};
use crate::types::{AssetBalance, HistoricalOrder, OrderIntent, OrderRecord, OrderSnapshot};

static GATEWAY_RETRY_TOTAL: AtomicU64 = AtomicU64::new(0);
static GATEWAY_GIVE_UP_TOTAL: AtomicU64 = AtomicU64::new(0);

pub fn gateway_retry_total() -> u64 {
    GATEWAY_RETRY_TOTAL.load(Ordering::Relaxed)
}

pub fn gateway_give_up_total() -> u64 {
    GATEWAY_GIVE_UP_TOTAL.load(Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    pub rate_limit_per_minute: u32,
    pub retry: RetryPolicy,
    pub clock_drift_tolerance_ms: u64,
    pub clock_resync_interval: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 1_200,
            retry: RetryPolicy::default(),
            clock_drift_tolerance_ms: 1_000,
            clock_resync_interval: Duration::from_secs(300),
        }
    }
}

/// The only path from the desk to the exchange.
///
/// Every call is clock-stamped, passes the shared rate limiter and is retried
/// with exponential backoff while the failure is transient. Non-transient
/// failures come back after the first attempt.
pub struct GatewayAdapter {
    api: Arc<dyn ExchangeApi>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<AuditLog>>,
    sync: ClockSync,
    limiter: RateLimiter,
    retry: RetryPolicy,
    client_seq: AtomicU64,
}

impl GatewayAdapter {
    pub fn new(
        api: Arc<dyn ExchangeApi>,
        clock: Arc<dyn Clock>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            api,
            clock,
            audit: None,
            sync: ClockSync::new(
                settings.clock_drift_tolerance_ms,
                settings.clock_resync_interval.as_millis() as u64,
            ),
            limiter: RateLimiter::per_minute(settings.rate_limit_per_minute),
            retry: settings.retry,
            client_seq: AtomicU64::new(0),
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn capabilities(&self) -> VenueCapabilities {
        self.api.capabilities()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn clock_offset_ms(&self) -> Option<i64> {
        self.sync.offset_ms()
    }

    pub fn local_now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// One server-time round trip. Keeps the previous offset on failure.
    pub async fn sync_clock(&self) -> Result<ClockSample, DeskError> {
        self.sync_once().await.map_err(|err| {
            let transient = err.is_transient();
            exchange_error(err, 1, transient).into()
        })
    }

    pub async fn server_time(&self) -> Result<u64, DeskError> {
        self.call("server_time", None, |_| self.api.server_time()).await
    }

    /// Submits under one client order id for every attempt. When a retry finds
    /// that id already taken, the earlier attempt reached the venue and the
    /// order it created is returned instead of a second one.
    pub async fn submit_order(&self, intent: &OrderIntent) -> Result<OrderRecord, DeskError> {
        let client_order_id = self.next_client_order_id();
        let submitted = self
            .call("submit_order", None, |ts| {
                self.api.submit_order(intent, &client_order_id, ts)
            })
            .await;
        let snapshot = match submitted {
            Ok(snapshot) => snapshot,
            Err(DeskError::Exchange(err))
                if err.kind == ExchangeErrorKind::DuplicateClientOrderId =>
            {
                tracing::info!(
                    target: "desk",
                    client_order_id = %client_order_id,
                    attempts = err.attempts,
                    "client order id already accepted, resolving the existing order"
                );
                self.order_by_client_id(intent.symbol(), &client_order_id).await?
            }
            Err(err) => return Err(err),
        };
        Ok(self.record_from(intent.clone(), snapshot))
    }

    pub async fn order_by_client_id(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<OrderSnapshot, DeskError> {
        self.call("order_by_client_id", Some(client_order_id), |ts| {
            self.api.order_by_client_id(symbol, client_order_id, ts)
        })
        .await
    }

    pub async fn submit_oco(
        &self,
        first: &OrderIntent,
        second: &OrderIntent,
    ) -> Result<(OrderRecord, OrderRecord), DeskError> {
        let (a, b) = self
            .call("submit_oco", None, |ts| self.api.submit_oco(first, second, ts))
            .await?;
        Ok((
            self.record_from(first.clone(), a),
            self.record_from(second.clone(), b),
        ))
    }

    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderSnapshot, DeskError> {
        self.call("cancel_order", Some(order_id), |ts| {
            self.api.cancel_order(symbol, order_id, ts)
        })
        .await
    }

    pub async fn order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderSnapshot, DeskError> {
        self.call("order_status", Some(order_id), |ts| {
            self.api.order_status(symbol, order_id, ts)
        })
        .await
    }

    pub async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderSnapshot>, DeskError> {
        self.call("open_orders", None, |ts| self.api.open_orders(symbol, ts)).await
    }

    pub async fn order_history(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<HistoricalOrder>, DeskError> {
        self.call("order_history", None, |ts| {
            self.api.order_history(symbol, limit, ts)
        })
        .await
    }

    pub async fn account_balances(&self) -> Result<Vec<AssetBalance>, DeskError> {
        self.call("account_balances", None, |ts| self.api.account_balances(ts)).await
    }

    pub async fn ticker_price(&self, symbol: &str) -> Result<Decimal, DeskError> {
        self.call("ticker_price", None, |_| self.api.ticker_price(symbol)).await
    }

    async fn call<T, F, Fut>(
        &self,
        op: &'static str,
        order_id: Option<&str>,
        mut request: F,
    ) -> Result<T, DeskError>
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let outcome = match self.stamp().await {
                Ok(timestamp_ms) => {
                    self.limiter.acquire().await;
                    request(timestamp_ms).await
                }
                Err(err) => Err(err),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.kind == ExchangeErrorKind::TimestampSkew {
                self.sync.invalidate();
            }
            if err.kind == ExchangeErrorKind::NotFound {
                if let Some(order_id) = order_id {
                    return Err(NotFoundError {
                        order_id: order_id.to_string(),
                    }
                    .into());
                }
            }
            if !err.is_transient() {
                tracing::warn!(
                    target: "desk",
                    op,
                    attempts,
                    error = %err,
                    "exchange call rejected"
                );
                return Err(exchange_error(err, attempts, false).into());
            }
            if !self.retry.has_attempts_left(attempts) {
                GATEWAY_GIVE_UP_TOTAL.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    target: "desk",
                    op,
                    attempts,
                    error = %err,
                    "exchange call failed, retries exhausted"
                );
                return Err(exchange_error(err, attempts, true).into());
            }

            let delay = self.retry.delay_after(attempts);
            GATEWAY_RETRY_TOTAL.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                target: "desk",
                op,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient exchange error, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Exchange-aligned timestamp for the next request, syncing first if due.
    async fn stamp(&self) -> Result<u64, ApiError> {
        if self.sync.needs_sync(self.clock.now_ms()) {
            if let Err(err) = self.sync_once().await {
                if self.sync.offset_ms().is_none() {
                    return Err(err);
                }
                tracing::warn!(
                    target: "desk",
                    error = %err,
                    "clock resync failed, keeping previous offset"
                );
            }
        }
        Ok(self.sync.exchange_now(self.clock.now_ms()))
    }

    async fn sync_once(&self) -> Result<ClockSample, ApiError> {
        self.limiter.acquire().await;
        let sent_at = self.clock.now_ms();
        let server_ms = self.api.server_time().await?;
        let received_at = self.clock.now_ms();
        let sample = self.sync.record_sample(server_ms, sent_at, received_at);
        if let Some(audit) = &self.audit {
            audit.emit(
                EventType::ClockResynced,
                None,
                json!({
                    "offset_ms": sample.offset_ms,
                    "previous_offset_ms": sample.previous_offset_ms,
                    "round_trip_ms": sample.round_trip_ms,
                    "drift_exceeded": sample.drift_exceeded,
                }),
            );
        }
        Ok(sample)
    }

    fn next_client_order_id(&self) -> String {
        let seq = self.client_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("desk-{}-{}", self.clock.now_ms(), seq)
    }

    fn record_from(&self, intent: OrderIntent, snapshot: OrderSnapshot) -> OrderRecord {
        let now = self.clock.now_ms();
        OrderRecord {
            exchange_order_id: snapshot.order_id,
            intent,
            status: snapshot.status,
            filled_quantity: snapshot.filled_quantity,
            avg_fill_price: snapshot.avg_fill_price,
            created_at_ms: now,
            last_updated_at_ms: now,
        }
    }
}

fn exchange_error(err: ApiError, attempts: u32, transient: bool) -> ExchangeError {
    ExchangeError {
        kind: err.kind,
        transient,
        status: err.status,
        attempts,
        message: err.message,
    }
}

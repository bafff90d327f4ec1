//! Exchange gateway seam.
//!
//! `ExchangeApi` is the opaque RPC boundary to the venue: one request, one
//! response or one typed `ApiError`. `GatewayAdapter` wraps it with clock-skew
//! correction, the global rate limiter and bounded retry.

pub mod adapter;
pub mod backoff;
pub mod clock_sync;
pub mod mock;
pub mod rate_limit;

use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::ExchangeErrorKind;
use crate::types::{AssetBalance, HistoricalOrder, OrderIntent, OrderSnapshot};

pub use adapter::{GatewayAdapter, GatewaySettings};
pub use backoff::RetryPolicy;
pub use clock_sync::{ClockSample, ClockSync};
pub use mock::{MockCall, MockExchange, MockOp};
pub use rate_limit::RateLimiter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ExchangeErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ExchangeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ExchangeErrorKind::from_http_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn with_kind(mut self, kind: ExchangeErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (http {}): {}", self.kind.as_str(), status, self.message),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VenueCapabilities {
    pub native_oco: bool,
}

/// Signed requests take the exchange-aligned timestamp computed by the adapter.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn server_time(&self) -> Result<u64, ApiError>;

    async fn submit_order(
        &self,
        intent: &OrderIntent,
        client_order_id: &str,
        timestamp_ms: u64,
    ) -> Result<OrderSnapshot, ApiError>;

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: &str,
        timestamp_ms: u64,
    ) -> Result<OrderSnapshot, ApiError>;

    async fn order_status(
        &self,
        symbol: &str,
        order_id: &str,
        timestamp_ms: u64,
    ) -> Result<OrderSnapshot, ApiError>;

    /// Looks an order up by the client id it was submitted under.
    async fn order_by_client_id(
        &self,
        symbol: &str,
        client_order_id: &str,
        timestamp_ms: u64,
    ) -> Result<OrderSnapshot, ApiError>;

    async fn open_orders(
        &self,
        symbol: &str,
        timestamp_ms: u64,
    ) -> Result<Vec<OrderSnapshot>, ApiError>;

    /// Most recent orders for a symbol, open or closed, oldest first.
    async fn order_history(
        &self,
        symbol: &str,
        limit: u32,
        timestamp_ms: u64,
    ) -> Result<Vec<HistoricalOrder>, ApiError>;

    async fn account_balances(&self, timestamp_ms: u64) -> Result<Vec<AssetBalance>, ApiError>;

    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, ApiError>;

    fn capabilities(&self) -> VenueCapabilities {
        VenueCapabilities::default()
    }

    async fn submit_oco(
        &self,
        _first: &OrderIntent,
        _second: &OrderIntent,
        _timestamp_ms: u64,
    ) -> Result<(OrderSnapshot, OrderSnapshot), ApiError> {
        Err(ApiError::new(
            ExchangeErrorKind::Unsupported,
            "venue has no native OCO support",
        ))
    }
}

//! Error taxonomy shared by the gateway, the execution engine and the strategies.
//!
//! Validation problems are never retried. Exchange errors carry a `transient`
//! flag that the gateway adapter has already acted on: a transient error seen by
//! a caller means the bounded retry budget is spent.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{OrderId, OrderType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("quantity must be positive (got {quantity})")]
    NonPositiveQuantity { quantity: Decimal },
    #[error("{order_type:?} order requires a limit price")]
    MissingPrice { order_type: OrderType },
    #[error("stop-limit order requires a stop price")]
    MissingStopPrice,
    #[error("{field} must be positive (got {value})")]
    NonPositivePrice { field: &'static str, value: Decimal },
    #[error("unknown symbol {symbol}")]
    UnknownSymbol { symbol: String },
    #[error("symbol rules for {symbol} are invalid")]
    InvalidSymbolRules { symbol: String },
    #[error("{field} {value} is not a multiple of tick size {tick}")]
    PriceOffTick {
        field: &'static str,
        value: Decimal,
        tick: Decimal,
    },
    #[error("quantity {quantity} is not a multiple of step size {step}")]
    QuantityOffStep { quantity: Decimal, step: Decimal },
    #[error("quantity {quantity} is below the minimum {min}")]
    BelowMinQuantity { quantity: Decimal, min: Decimal },
    #[error("order notional {notional} exceeds the configured cap {cap}")]
    NotionalAboveCap { notional: Decimal, cap: Decimal },
    #[error("order notional {notional} is below the exchange minimum {min}")]
    BelowMinNotional { notional: Decimal, min: Decimal },
    #[error("slice count must be positive")]
    ZeroSliceCount,
    #[error("duration must be positive")]
    ZeroDuration,
    #[error("quantity {quantity} split into {slices} slices rounds to zero")]
    SliceRoundsToZero { quantity: Decimal, slices: u32 },
    #[error("grid bounds are invalid: lower {lower}, upper {upper}")]
    InvalidGridBounds { lower: Decimal, upper: Decimal },
    #[error("grid needs at least two levels (got {levels})")]
    TooFewGridLevels { levels: u32 },
    #[error("grid levels {index} and {next} collapse onto the same tick")]
    GridLevelCollision { index: usize, next: usize },
    #[error("{order_type:?} cannot be used here")]
    UnsupportedOrderType { order_type: OrderType },
    #[error("strategy {handle} is still running")]
    StrategyAlreadyRunning { handle: u64 },
    #[error("no strategy with handle {handle}")]
    UnknownStrategy { handle: u64 },
    #[error("desk is shut down")]
    DeskShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeErrorKind {
    RateLimited,
    ServerError,
    Timeout,
    Network,
    TimestampSkew,
    Rejected,
    Unauthorized,
    NotFound,
    /// The venue already holds an order under this client order id.
    DuplicateClientOrderId,
    Unsupported,
}

impl ExchangeErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ExchangeErrorKind::RateLimited
                | ExchangeErrorKind::ServerError
                | ExchangeErrorKind::Timeout
                | ExchangeErrorKind::Network
                | ExchangeErrorKind::TimestampSkew
        )
    }

    /// Classification of a raw HTTP status. Exchange-specific body codes
    /// (timestamp skew, unknown order) are refined by the venue adapter.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            429 | 418 => ExchangeErrorKind::RateLimited,
            408 => ExchangeErrorKind::Timeout,
            401 | 403 => ExchangeErrorKind::Unauthorized,
            404 => ExchangeErrorKind::NotFound,
            500..=599 => ExchangeErrorKind::ServerError,
            _ => ExchangeErrorKind::Rejected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeErrorKind::RateLimited => "rate_limited",
            ExchangeErrorKind::ServerError => "server_error",
            ExchangeErrorKind::Timeout => "timeout",
            ExchangeErrorKind::Network => "network",
            ExchangeErrorKind::TimestampSkew => "timestamp_skew",
            ExchangeErrorKind::Rejected => "rejected",
            ExchangeErrorKind::Unauthorized => "unauthorized",
            ExchangeErrorKind::NotFound => "not_found",
            ExchangeErrorKind::DuplicateClientOrderId => "duplicate_client_order_id",
            ExchangeErrorKind::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("exchange error ({}, transient={transient}) after {attempts} attempt(s): {message}", .kind.as_str())]
pub struct ExchangeError {
    pub kind: ExchangeErrorKind,
    pub transient: bool,
    pub status: Option<u16>,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("order {order_id} not found")]
pub struct NotFoundError {
    pub order_id: OrderId,
}

/// Unrecoverable mid-strategy condition. Child orders that were still open are
/// listed, never canceled on the caller's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("strategy aborted: {reason} ({} open order(s) left in place)", .open_orders.len())]
pub struct StrategyFatalError {
    pub reason: String,
    pub open_orders: Vec<OrderId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeskError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    StrategyFatal(#[from] StrategyFatalError),
}

impl DeskError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeskError::Exchange(err) if err.transient)
    }

    /// Errors that no amount of retrying at strategy level can fix.
    pub fn is_fatal_for_strategy(&self) -> bool {
        match self {
            DeskError::Exchange(err) => err.kind == ExchangeErrorKind::Unauthorized,
            DeskError::StrategyFatal(_) => true,
            DeskError::Validation(_) | DeskError::NotFound(_) => false,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            DeskError::Exchange(err) => err.attempts,
            _ => 0,
        }
    }
}

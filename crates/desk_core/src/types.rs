use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Exchange-assigned order identifier.
pub type OrderId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Single-order types. An OCO is a pair of these, see `execution::oco`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    StopLimit,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopLimit => "STOP_LIMIT",
        }
    }

    pub fn requires_price(self) -> bool {
        matches!(self, OrderType::Limit | OrderType::StopLimit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    #[default]
    Gtc,
    Ioc,
    Fok,
}

impl TimeInForce {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        }
    }
}

/// A validated request to trade. Fields are private so an intent cannot change
/// after the structural checks ran; symbol rules are checked by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    symbol: String,
    side: Side,
    order_type: OrderType,
    quantity: Decimal,
    price: Option<Decimal>,
    stop_price: Option<Decimal>,
    time_in_force: TimeInForce,
}

impl OrderIntent {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
        stop_price: Option<Decimal>,
        time_in_force: TimeInForce,
    ) -> Result<Self, ValidationError> {
        let intent = Self {
            symbol: symbol.into(),
            side,
            order_type,
            quantity,
            price,
            stop_price,
            time_in_force,
        };
        intent.check_structure()?;
        Ok(intent)
    }

    pub fn market(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
    ) -> Result<Self, ValidationError> {
        Self::new(
            symbol,
            side,
            OrderType::Market,
            quantity,
            None,
            None,
            TimeInForce::Gtc,
        )
    }

    pub fn limit(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Self, ValidationError> {
        Self::new(
            symbol,
            side,
            OrderType::Limit,
            quantity,
            Some(price),
            None,
            TimeInForce::Gtc,
        )
    }

    pub fn stop_limit(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        stop_price: Decimal,
        limit_price: Decimal,
    ) -> Result<Self, ValidationError> {
        Self::new(
            symbol,
            side,
            OrderType::StopLimit,
            quantity,
            Some(limit_price),
            Some(stop_price),
            TimeInForce::Gtc,
        )
    }

    pub fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = time_in_force;
        self
    }

    /// Same order with a different size; used for TWAP slices.
    pub(crate) fn with_quantity(&self, quantity: Decimal) -> Result<Self, ValidationError> {
        let mut child = self.clone();
        child.quantity = quantity;
        child.check_structure()?;
        Ok(child)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn price(&self) -> Option<Decimal> {
        self.price
    }

    pub fn stop_price(&self) -> Option<Decimal> {
        self.stop_price
    }

    pub fn time_in_force(&self) -> TimeInForce {
        self.time_in_force
    }

    fn check_structure(&self) -> Result<(), ValidationError> {
        if self.quantity <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveQuantity {
                quantity: self.quantity,
            });
        }
        if self.order_type.requires_price() && self.price.is_none() {
            return Err(ValidationError::MissingPrice {
                order_type: self.order_type,
            });
        }
        if self.order_type == OrderType::StopLimit && self.stop_price.is_none() {
            return Err(ValidationError::MissingStopPrice);
        }
        if let Some(price) = self.price {
            if price <= Decimal::ZERO {
                return Err(ValidationError::NonPositivePrice {
                    field: "price",
                    value: price,
                });
            }
        }
        if let Some(stop) = self.stop_price {
            if stop <= Decimal::ZERO {
                return Err(ValidationError::NonPositivePrice {
                    field: "stop_price",
                    value: stop,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Open => "OPEN",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Failed => "FAILED",
        }
    }
}

/// Exchange view of one order as last reported by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub update_ts_ms: u64,
}

/// One row of the venue's order history. `venue_type` is the venue's own type
/// name, which covers types this desk never submits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalOrder {
    pub snapshot: OrderSnapshot,
    pub symbol: String,
    pub side: Side,
    pub venue_type: String,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub wallet_balance: Decimal,
    pub available_balance: Decimal,
}

/// Local record of a submitted order. State transitions go through
/// `execution::lifecycle`, owned by the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub exchange_order_id: OrderId,
    pub intent: OrderIntent,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub created_at_ms: u64,
    pub last_updated_at_ms: u64,
}

impl OrderRecord {
    pub fn symbol(&self) -> &str {
        self.intent.symbol()
    }

    pub fn side(&self) -> Side {
        self.intent.side()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

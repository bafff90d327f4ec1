//! Wire shapes of the futures REST responses and their domain conversions.

use desk_core::{
    ApiError, AssetBalance, ExchangeErrorKind, HistoricalOrder, OrderSnapshot, OrderStatus, Side,
};
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTimeResponse {
    pub server_time: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickerPriceResponse {
    pub symbol: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: u64,
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
    #[serde(default)]
    pub executed_qty: Option<Decimal>,
    #[serde(default)]
    pub avg_price: Option<Decimal>,
    #[serde(default)]
    pub update_time: Option<u64>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default, rename = "type")]
    pub order_type: Option<String>,
    #[serde(default)]
    pub orig_qty: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub time: Option<u64>,
}

impl OrderResponse {
    pub fn into_domain(self, fallback_ts_ms: u64) -> Result<OrderSnapshot, ApiError> {
        let status = parse_order_status(&self.status)?;
        let filled_quantity = self.executed_qty.unwrap_or(Decimal::ZERO);
        // The venue reports "0" until something fills.
        let avg_fill_price = self.avg_price.filter(|price| !price.is_zero());
        Ok(OrderSnapshot {
            order_id: self.order_id.to_string(),
            status,
            filled_quantity,
            avg_fill_price,
            update_ts_ms: self.update_time.unwrap_or(fallback_ts_ms),
        })
    }

    /// Row of `GET /fapi/v1/allOrders`, which always carries side, type and size.
    pub fn into_history(self, fallback_ts_ms: u64) -> Result<HistoricalOrder, ApiError> {
        let side = match self.side.as_deref() {
            Some("BUY") => Side::Buy,
            Some("SELL") => Side::Sell,
            other => {
                return Err(ApiError::new(
                    ExchangeErrorKind::ServerError,
                    format!("order {} has unrecognized side {other:?}", self.order_id),
                ));
            }
        };
        let symbol = self.symbol.clone();
        let venue_type = self.order_type.clone().unwrap_or_default();
        let quantity = self.orig_qty.unwrap_or(Decimal::ZERO);
        let price = self.price.filter(|price| !price.is_zero());
        let created_at_ms = self.time.or(self.update_time).unwrap_or(fallback_ts_ms);
        Ok(HistoricalOrder {
            snapshot: self.into_domain(fallback_ts_ms)?,
            symbol,
            side,
            venue_type,
            quantity,
            price,
            created_at_ms,
        })
    }
}

/// `GET /fapi/v2/account`; only the per-asset balances are read.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub assets: Vec<AccountAsset>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAsset {
    pub asset: String,
    pub wallet_balance: Decimal,
    pub available_balance: Decimal,
}

impl AccountResponse {
    pub fn into_domain(self) -> Vec<AssetBalance> {
        self.assets
            .into_iter()
            .map(|asset| AssetBalance {
                asset: asset.asset,
                wallet_balance: asset.wallet_balance,
                available_balance: asset.available_balance,
            })
            .collect()
    }
}

/// Error body: `{"code": -2011, "msg": "Unknown order sent."}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub code: i64,
    pub msg: String,
}

pub fn parse_order_status(raw: &str) -> Result<OrderStatus, ApiError> {
    match raw {
        "NEW" => Ok(OrderStatus::Open),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELED" | "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderStatus::Canceled),
        "REJECTED" => Ok(OrderStatus::Rejected),
        other => Err(ApiError::new(
            ExchangeErrorKind::ServerError,
            format!("unrecognized order status: {other}"),
        )),
    }
}

/// Maps an HTTP failure to the gateway's error kinds. The body code refines the
/// status where the venue reuses 400 for conditions the adapter must tell apart.
pub fn classify_error(status: u16, body: &str) -> ApiError {
    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();
    let message = match &parsed {
        Some(err) => format!("code {}: {}", err.code, err.msg),
        None => body.chars().take(256).collect(),
    };
    let error = ApiError::from_status(status, message);
    match parsed.map(|err| err.code) {
        Some(-1021) => error.with_kind(ExchangeErrorKind::TimestampSkew),
        Some(-1003) => error.with_kind(ExchangeErrorKind::RateLimited),
        Some(-1001) => error.with_kind(ExchangeErrorKind::ServerError),
        Some(-1007) => error.with_kind(ExchangeErrorKind::Timeout),
        Some(-1022) | Some(-2014) | Some(-2015) => error.with_kind(ExchangeErrorKind::Unauthorized),
        Some(-2011) | Some(-2013) => error.with_kind(ExchangeErrorKind::NotFound),
        Some(-4116) => error.with_kind(ExchangeErrorKind::DuplicateClientOrderId),
        _ => error,
    }
}

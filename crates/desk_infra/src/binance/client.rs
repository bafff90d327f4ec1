use async_trait::async_trait;
use desk_core::{
    ApiError, AssetBalance, ExchangeApi, ExchangeErrorKind, HistoricalOrder, OrderIntent,
    OrderSnapshot, OrderType, SymbolRegistry,
};
use reqwest::{Client, Method, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

use super::dto::{
    AccountResponse, OrderResponse, ServerTimeResponse, TickerPriceResponse, classify_error,
};
use super::exchange_info::ExchangeInfoResponse;
use super::signing::Query;
use crate::config::{Credentials, DeskConfig};

const API_KEY_HEADER: &str = "X-MBX-APIKEY";
const ORDER_HISTORY_MAX: u32 = 1_000;

/// USDⓈ-M futures REST client. One request per call; retry, rate limiting and
/// clock alignment belong to the gateway adapter that wraps it.
pub struct BinanceFutures {
    http: Client,
    base_url: String,
    credentials: Credentials,
    recv_window_ms: u64,
}

impl BinanceFutures {
    pub fn new(config: &DeskConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .tcp_nodelay(true)
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            credentials: config.credentials.clone(),
            recv_window_ms: config.recv_window_ms,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn exchange_info(&self) -> Result<ExchangeInfoResponse, ApiError> {
        self.public_get("/fapi/v1/exchangeInfo", Query::new()).await
    }

    /// Loads rules for every trading symbol into `registry`; returns how many were stored.
    pub async fn load_symbol_rules(&self, registry: &SymbolRegistry) -> Result<usize, ApiError> {
        let info = self.exchange_info().await?;
        let mut loaded = 0;
        for rules in info.symbol_rules() {
            let symbol = rules.symbol.clone();
            match registry.insert(rules) {
                Ok(()) => loaded += 1,
                Err(err) => {
                    tracing::warn!(target: "desk", %symbol, error = %err, "symbol rules rejected");
                }
            }
        }
        tracing::info!(target: "desk", loaded, "symbol rules loaded");
        Ok(loaded)
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &'static str,
        query: Query,
    ) -> Result<T, ApiError> {
        let mut url = format!("{}{}", self.base_url, path);
        let encoded = query.encode();
        if !encoded.is_empty() {
            url.push('?');
            url.push_str(&encoded);
        }
        self.send(path, self.http.get(url)).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &'static str,
        query: Query,
        timestamp_ms: u64,
    ) -> Result<T, ApiError> {
        let signed = query.signed(
            self.credentials.api_secret(),
            self.recv_window_ms,
            timestamp_ms,
        );
        let url = format!("{}{}?{}", self.base_url, path, signed);
        let request = self
            .http
            .request(method, url)
            .header(API_KEY_HEADER, self.credentials.api_key());
        self.send(path, request).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        path: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            let err = classify_error(status.as_u16(), &body);
            tracing::debug!(target: "desk", path, status = status.as_u16(), error = %err, "venue request failed");
            return Err(err);
        }
        serde_json::from_str(&body).map_err(|err| {
            ApiError::new(
                ExchangeErrorKind::ServerError,
                format!("malformed response from {path}: {err}"),
            )
        })
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    let kind = if err.is_timeout() {
        ExchangeErrorKind::Timeout
    } else if err.is_decode() {
        ExchangeErrorKind::ServerError
    } else {
        ExchangeErrorKind::Network
    };
    ApiError::new(kind, err.to_string())
}

fn order_type_param(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
        OrderType::StopLimit => "STOP",
    }
}

/// Query for `POST /fapi/v1/order`, before timestamp and signature.
pub fn order_query(intent: &OrderIntent, client_order_id: &str) -> Query {
    let query = Query::new()
        .push("symbol", intent.symbol())
        .push("side", intent.side().as_str())
        .push("type", order_type_param(intent.order_type()))
        .push_decimal("quantity", intent.quantity())
        .push_opt_decimal("price", intent.price())
        .push_opt_decimal("stopPrice", intent.stop_price());
    let query = if intent.order_type() == OrderType::Market {
        query
    } else {
        query.push("timeInForce", intent.time_in_force().as_str())
    };
    query
        .push("newClientOrderId", client_order_id)
        .push("newOrderRespType", "RESULT")
}

#[async_trait]
impl ExchangeApi for BinanceFutures {
    async fn server_time(&self) -> Result<u64, ApiError> {
        let response: ServerTimeResponse = self.public_get("/fapi/v1/time", Query::new()).await?;
        Ok(response.server_time)
    }

    async fn submit_order(
        &self,
        intent: &OrderIntent,
        client_order_id: &str,
        timestamp_ms: u64,
    ) -> Result<OrderSnapshot, ApiError> {
        let query = order_query(intent, client_order_id);
        let response: OrderResponse = self
            .signed(Method::POST, "/fapi/v1/order", query, timestamp_ms)
            .await?;
        response.into_domain(timestamp_ms)
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: &str,
        timestamp_ms: u64,
    ) -> Result<OrderSnapshot, ApiError> {
        let query = Query::new().push("symbol", symbol).push("orderId", order_id);
        let response: OrderResponse = self
            .signed(Method::DELETE, "/fapi/v1/order", query, timestamp_ms)
            .await?;
        response.into_domain(timestamp_ms)
    }

    async fn order_status(
        &self,
        symbol: &str,
        order_id: &str,
        timestamp_ms: u64,
    ) -> Result<OrderSnapshot, ApiError> {
        let query = Query::new().push("symbol", symbol).push("orderId", order_id);
        let response: OrderResponse = self
            .signed(Method::GET, "/fapi/v1/order", query, timestamp_ms)
            .await?;
        response.into_domain(timestamp_ms)
    }

    async fn order_by_client_id(
        &self,
        symbol: &str,
        client_order_id: &str,
        timestamp_ms: u64,
    ) -> Result<OrderSnapshot, ApiError> {
        let query = Query::new()
            .push("symbol", symbol)
            .push("origClientOrderId", client_order_id);
        let response: OrderResponse = self
            .signed(Method::GET, "/fapi/v1/order", query, timestamp_ms)
            .await?;
        response.into_domain(timestamp_ms)
    }

    async fn open_orders(
        &self,
        symbol: &str,
        timestamp_ms: u64,
    ) -> Result<Vec<OrderSnapshot>, ApiError> {
        let query = Query::new().push("symbol", symbol);
        let responses: Vec<OrderResponse> = self
            .signed(Method::GET, "/fapi/v1/openOrders", query, timestamp_ms)
            .await?;
        responses
            .into_iter()
            .map(|response| response.into_domain(timestamp_ms))
            .collect()
    }

    async fn order_history(
        &self,
        symbol: &str,
        limit: u32,
        timestamp_ms: u64,
    ) -> Result<Vec<HistoricalOrder>, ApiError> {
        let query = Query::new()
            .push("symbol", symbol)
            .push("limit", limit.clamp(1, ORDER_HISTORY_MAX));
        let responses: Vec<OrderResponse> = self
            .signed(Method::GET, "/fapi/v1/allOrders", query, timestamp_ms)
            .await?;
        responses
            .into_iter()
            .map(|response| response.into_history(timestamp_ms))
            .collect()
    }

    async fn account_balances(&self, timestamp_ms: u64) -> Result<Vec<AssetBalance>, ApiError> {
        let response: AccountResponse = self
            .signed(Method::GET, "/fapi/v2/account", Query::new(), timestamp_ms)
            .await?;
        Ok(response.into_domain())
    }

    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, ApiError> {
        let query = Query::new().push("symbol", symbol);
        let response: TickerPriceResponse = self.public_get("/fapi/v1/ticker/price", query).await?;
        Ok(response.price)
    }
}

//! Binance USDⓈ-M futures venue adapter.
//!
//! `BinanceFutures` implements `desk_core::ExchangeApi` over the REST API.
//! Signed endpoints carry `recvWindow`, the adapter-supplied timestamp and an
//! HMAC-SHA256 signature; the API key travels in the `X-MBX-APIKEY` header.

mod client;
pub mod dto;
pub mod exchange_info;
pub mod signing;

pub use client::{BinanceFutures, order_query};
pub use dto::{
    AccountAsset, AccountResponse, ErrorResponse, OrderResponse, classify_error, parse_order_status,
};
pub use exchange_info::{ExchangeInfoResponse, SymbolFilter, SymbolInfo};
pub use signing::{Query, sign};

//! HMAC-SHA256 request signing for USDⓈ-M futures endpoints.

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` keyed by the API secret.
pub fn sign(secret: &str, payload: &str) -> String {
    // HMAC accepts keys of any length, so construction cannot fail here.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Ordered `key=value&...` query. Values here are symbols, enum names, ids and
/// decimals, none of which need percent-encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pairs: Vec<(&'static str, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, key: &'static str, value: impl ToString) -> Self {
        self.pairs.push((key, value.to_string()));
        self
    }

    pub fn push_decimal(self, key: &'static str, value: Decimal) -> Self {
        self.push(key, value.normalize())
    }

    pub fn push_opt_decimal(self, key: &'static str, value: Option<Decimal>) -> Self {
        match value {
            Some(value) => self.push_decimal(key, value),
            None => self,
        }
    }

    pub fn encode(&self) -> String {
        self.pairs
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Appends `recvWindow` and `timestamp`, then the signature over everything before it.
    pub fn signed(self, secret: &str, recv_window_ms: u64, timestamp_ms: u64) -> String {
        let payload = self
            .push("recvWindow", recv_window_ms)
            .push("timestamp", timestamp_ms)
            .encode();
        let signature = sign(secret, &payload);
        format!("{payload}&signature={signature}")
    }
}

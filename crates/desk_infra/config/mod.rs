//! Desk configuration with a centralized defaults table.
//!
//! Callers fill a `DeskConfigInput` of optionals; `apply_defaults` resolves it
//! into a `DeskConfig`. Credentials have no default and fail closed.

use std::fmt;
use std::time::Duration;

use desk_core::{EngineLimits, GatewaySettings, RetryPolicy, StrategySettings};
use rust_decimal::Decimal;
use thiserror::Error;

pub const BASE_URL_DEFAULT: &str = "https://testnet.binancefuture.com";
pub const MAX_ORDER_NOTIONAL_DEFAULT: u64 = 10_000;
pub const RATE_LIMIT_PER_MINUTE_DEFAULT: u32 = 1_200;
pub const RECV_WINDOW_MS_DEFAULT: u64 = 5_000;
pub const MAX_ATTEMPTS_DEFAULT: u32 = 5;
pub const BACKOFF_BASE_MS_DEFAULT: u64 = 200;
pub const CLOCK_DRIFT_TOLERANCE_MS_DEFAULT: u64 = 1_000;
pub const CLOCK_RESYNC_INTERVAL_S_DEFAULT: u64 = 300;
pub const GRID_POLL_INTERVAL_MS_DEFAULT: u64 = 2_000;
pub const REQUEST_TIMEOUT_MS_DEFAULT: u64 = 10_000;
pub const JOURNAL_MAX_BYTES_DEFAULT: u64 = 5 * 1024 * 1024;
pub const JOURNAL_MAX_FILES_DEFAULT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required config value: {key} (no default)")]
    MissingRequired { key: &'static str },
    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// API key pair. `Debug` never prints the values.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeskConfigInput {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub base_url: Option<String>,
    pub max_order_notional: Option<Decimal>,
    pub rate_limit_per_minute: Option<u32>,
    pub recv_window_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub clock_drift_tolerance_ms: Option<u64>,
    pub clock_resync_interval_s: Option<u64>,
    pub grid_poll_interval_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub journal_max_bytes: Option<u64>,
    pub journal_max_files: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeskConfig {
    pub credentials: Credentials,
    pub base_url: String,
    pub max_order_notional: Decimal,
    pub rate_limit_per_minute: u32,
    pub recv_window_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub clock_drift_tolerance_ms: u64,
    pub clock_resync_interval_s: u64,
    pub grid_poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub journal_max_bytes: u64,
    pub journal_max_files: usize,
}

pub fn apply_defaults(input: DeskConfigInput) -> Result<DeskConfig, ConfigError> {
    let api_key = require_non_empty("api_key", input.api_key)?;
    let api_secret = require_non_empty("api_secret", input.api_secret)?;

    let max_order_notional = input
        .max_order_notional
        .unwrap_or_else(|| Decimal::from(MAX_ORDER_NOTIONAL_DEFAULT));
    if max_order_notional <= Decimal::ZERO {
        return Err(ConfigError::Invalid {
            key: "max_order_notional",
            reason: "must be positive".to_string(),
        });
    }

    let rate_limit_per_minute = input
        .rate_limit_per_minute
        .unwrap_or(RATE_LIMIT_PER_MINUTE_DEFAULT);
    require_positive("rate_limit_per_minute", u64::from(rate_limit_per_minute))?;

    let max_attempts = input.max_attempts.unwrap_or(MAX_ATTEMPTS_DEFAULT);
    require_positive("max_attempts", u64::from(max_attempts))?;

    let grid_poll_interval_ms = input
        .grid_poll_interval_ms
        .unwrap_or(GRID_POLL_INTERVAL_MS_DEFAULT);
    require_positive("grid_poll_interval_ms", grid_poll_interval_ms)?;

    let journal_max_files = input.journal_max_files.unwrap_or(JOURNAL_MAX_FILES_DEFAULT);
    require_positive("journal_max_files", journal_max_files as u64)?;

    Ok(DeskConfig {
        credentials: Credentials::new(api_key, api_secret),
        base_url: input
            .base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| BASE_URL_DEFAULT.to_string()),
        max_order_notional,
        rate_limit_per_minute,
        recv_window_ms: input.recv_window_ms.unwrap_or(RECV_WINDOW_MS_DEFAULT),
        max_attempts,
        backoff_base_ms: input.backoff_base_ms.unwrap_or(BACKOFF_BASE_MS_DEFAULT),
        clock_drift_tolerance_ms: input
            .clock_drift_tolerance_ms
            .unwrap_or(CLOCK_DRIFT_TOLERANCE_MS_DEFAULT),
        clock_resync_interval_s: input
            .clock_resync_interval_s
            .unwrap_or(CLOCK_RESYNC_INTERVAL_S_DEFAULT),
        grid_poll_interval_ms,
        request_timeout_ms: input
            .request_timeout_ms
            .unwrap_or(REQUEST_TIMEOUT_MS_DEFAULT),
        journal_max_bytes: input.journal_max_bytes.unwrap_or(JOURNAL_MAX_BYTES_DEFAULT),
        journal_max_files,
    })
}

fn require_non_empty(key: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingRequired { key }),
    }
}

fn require_positive(key: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be >= 1".to_string(),
        });
    }
    Ok(())
}

impl DeskConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.backoff_base_ms),
        )
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            rate_limit_per_minute: self.rate_limit_per_minute,
            retry: self.retry_policy(),
            clock_drift_tolerance_ms: self.clock_drift_tolerance_ms,
            clock_resync_interval: Duration::from_secs(self.clock_resync_interval_s),
        }
    }

    pub fn engine_limits(&self) -> EngineLimits {
        EngineLimits {
            max_order_notional: self.max_order_notional,
            ..EngineLimits::default()
        }
    }

    pub fn strategy_settings(&self) -> StrategySettings {
        let poll = Duration::from_millis(self.grid_poll_interval_ms);
        StrategySettings {
            grid_poll_interval: poll,
            oco_poll_interval: poll,
            ..StrategySettings::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

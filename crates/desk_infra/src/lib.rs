//! Infrastructure adapters for the trading desk: venue client, config, journal.

#[path = "../config/mod.rs"]
pub mod config;
pub mod binance;
pub mod bootstrap;
pub mod journal;
pub mod telemetry;

pub use binance::BinanceFutures;
pub use bootstrap::{BootstrapError, Desk, assemble, connect};
pub use config::{ConfigError, Credentials, DeskConfig, DeskConfigInput, apply_defaults};
pub use journal::{Journal, JournalConfig, JournalError};
pub use telemetry::init_tracing;

//! Wires a `TradingDesk` from resolved configuration.

use std::path::Path;
use std::sync::Arc;

use desk_core::{
    ApiError, AuditLog, Clock, ExchangeApi, ExecutionEngine, GatewayAdapter, SymbolRegistry,
    SystemClock, TradingDesk,
};
use thiserror::Error;

use crate::binance::BinanceFutures;
use crate::config::DeskConfig;
use crate::journal::{Journal, JournalConfig, JournalError};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("http client setup failed: {0}")]
    Client(#[from] reqwest::Error),
    #[error("venue unavailable: {0}")]
    Venue(#[from] ApiError),
    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// A desk plus the journal its audit log writes to, if any.
pub struct Desk {
    pub desk: TradingDesk,
    pub journal: Option<Arc<Journal>>,
}

/// Builds every layer around an already constructed venue client.
pub fn assemble(
    api: Arc<dyn ExchangeApi>,
    registry: Arc<SymbolRegistry>,
    clock: Arc<dyn Clock>,
    config: &DeskConfig,
    journal: Option<Arc<Journal>>,
) -> TradingDesk {
    let mut audit = AuditLog::new(clock.clone());
    if let Some(journal) = journal {
        audit = audit.with_sink(journal);
    }
    let audit = Arc::new(audit);
    let gateway = Arc::new(
        GatewayAdapter::new(api, clock.clone(), config.gateway_settings()).with_audit(audit.clone()),
    );
    let engine = Arc::new(ExecutionEngine::new(
        gateway,
        registry,
        audit,
        clock,
        config.engine_limits(),
    ));
    TradingDesk::new(engine, config.strategy_settings())
}

/// Connects to the futures REST API, loads symbol rules and opens the journal.
pub async fn connect(
    config: &DeskConfig,
    journal_path: Option<&Path>,
) -> Result<Desk, BootstrapError> {
    let client = BinanceFutures::new(config)?;
    let registry = Arc::new(SymbolRegistry::new());
    client.load_symbol_rules(&registry).await?;

    let journal = match journal_path {
        Some(path) => Some(Arc::new(Journal::open_with_config(
            path,
            JournalConfig::from_desk(config),
        )?)),
        None => None,
    };

    tracing::info!(target: "desk", base_url = client.base_url(), symbols = registry.len(), "desk connected");
    let desk = assemble(
        Arc::new(client),
        registry,
        Arc::new(SystemClock),
        config,
        journal.clone(),
    );
    Ok(Desk { desk, journal })
}

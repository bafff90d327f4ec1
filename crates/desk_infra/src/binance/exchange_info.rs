//! Symbol trading filters from `GET /fapi/v1/exchangeInfo`.

use desk_core::SymbolRules;
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoResponse {
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SymbolFilter {
    #[serde(rename_all = "camelCase")]
    PriceFilter { tick_size: Decimal },
    #[serde(rename_all = "camelCase")]
    LotSize { step_size: Decimal, min_qty: Decimal },
    /// Futures call the field `notional`, spot calls it `minNotional`.
    MinNotional {
        #[serde(alias = "minNotional")]
        notional: Decimal,
    },
    #[serde(other)]
    Other,
}

impl SymbolInfo {
    /// `None` when a required filter is missing or a value is not usable.
    pub fn rules(&self) -> Option<SymbolRules> {
        let mut tick_size = None;
        let mut lot = None;
        let mut min_notional = None;
        for filter in &self.filters {
            match filter {
                SymbolFilter::PriceFilter { tick_size: tick } => {
                    tick_size.get_or_insert(*tick);
                }
                SymbolFilter::LotSize { step_size, min_qty } => {
                    lot.get_or_insert((*step_size, *min_qty));
                }
                SymbolFilter::MinNotional { notional } => {
                    min_notional.get_or_insert(*notional);
                }
                SymbolFilter::Other => {}
            }
        }

        let (step_size, min_qty) = lot?;
        let rules = SymbolRules {
            symbol: self.symbol.clone(),
            tick_size: tick_size?,
            step_size,
            min_qty,
            min_notional: min_notional.unwrap_or(Decimal::ZERO),
        };
        rules.validate().ok().map(|()| rules)
    }

    pub fn is_trading(&self) -> bool {
        self.status.as_deref().is_none_or(|status| status == "TRADING")
    }
}

impl ExchangeInfoResponse {
    /// Rules for every trading symbol with complete filters; others are logged and skipped.
    pub fn symbol_rules(&self) -> Vec<SymbolRules> {
        let mut out = Vec::with_capacity(self.symbols.len());
        for info in self.symbols.iter().filter(|info| info.is_trading()) {
            match info.rules() {
                Some(rules) => out.push(rules),
                None => {
                    tracing::warn!(target: "desk", symbol = %info.symbol, "incomplete symbol filters, skipping");
                }
            }
        }
        out
    }
}

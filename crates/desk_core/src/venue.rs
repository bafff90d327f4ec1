use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Trading filters the exchange declares for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRules {
    pub symbol: String,
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
}

impl SymbolRules {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.symbol.trim().is_empty()
            || self.tick_size <= Decimal::ZERO
            || self.step_size <= Decimal::ZERO
            || self.min_qty < Decimal::ZERO
            || self.min_notional < Decimal::ZERO
        {
            return Err(ValidationError::InvalidSymbolRules {
                symbol: self.symbol.clone(),
            });
        }
        Ok(())
    }
}

/// Known symbols. Refreshed by the venue adapter, read by the engine and plans.
#[derive(Debug, Default)]
pub struct SymbolRegistry {
    entries: RwLock<HashMap<String, SymbolRules>>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: impl IntoIterator<Item = SymbolRules>) -> Result<Self, ValidationError> {
        let registry = Self::new();
        for entry in rules {
            registry.insert(entry)?;
        }
        Ok(registry)
    }

    pub fn insert(&self, rules: SymbolRules) -> Result<(), ValidationError> {
        rules.validate()?;
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target: "desk", "symbol registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        entries.insert(rules.symbol.clone(), rules);
        Ok(())
    }

    pub fn get(&self, symbol: &str) -> Option<SymbolRules> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(symbol).cloned()
    }

    pub fn require(&self, symbol: &str) -> Result<SymbolRules, ValidationError> {
        self.get(symbol).ok_or_else(|| ValidationError::UnknownSymbol {
            symbol: symbol.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

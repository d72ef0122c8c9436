//! Symbol pair definitions.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Two securities traded against each other through a hedge ratio.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairDefinition {
    /// Leg held long when the spread is bought.
    pub symbol_a: String,
    /// Leg held short when the spread is bought.
    pub symbol_b: String,
    /// Units of `symbol_b` per unit of `symbol_a`.
    pub hedge_ratio: Decimal,
}

impl PairDefinition {
    /// Create a new pair definition.
    pub fn new(symbol_a: impl Into<String>, symbol_b: impl Into<String>, hedge_ratio: Decimal) -> Self {
        Self {
            symbol_a: symbol_a.into(),
            symbol_b: symbol_b.into(),
            hedge_ratio,
        }
    }

    /// Stable identity used to merge results and key persisted rows.
    pub fn key(&self) -> String {
        format!("{}/{}", self.symbol_a, self.symbol_b)
    }

    /// Spread value: `price_a - hedge_ratio * price_b`.
    pub fn spread(&self, price_a: Decimal, price_b: Decimal) -> Decimal {
        price_a - self.hedge_ratio * price_b
    }

    /// Gross capital needed to hold one unit of the spread.
    pub fn unit_cost(&self, price_a: Decimal, price_b: Decimal) -> Decimal {
        price_a.abs() + self.hedge_ratio.abs() * price_b.abs()
    }

    /// Check the pair invariants, returning a reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol_a.trim().is_empty() || self.symbol_b.trim().is_empty() {
            return Err("pair symbols must not be empty".to_string());
        }
        if self.symbol_a.eq_ignore_ascii_case(&self.symbol_b) {
            return Err(format!(
                "pair legs must differ, got {} twice",
                self.symbol_a
            ));
        }
        Ok(())
    }
}

impl fmt::Display for PairDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (h={})", self.symbol_a, self.symbol_b, self.hedge_ratio)
    }
}

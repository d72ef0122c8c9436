//! Backtest run configuration.

use chrono::{DateTime, Utc};
use pairs_core::types::{Interval, PairDefinition, AMOUNT_SCALE};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::ConfigurationError;
use crate::strategy::{StrategyKind, StrategyRegistry};

/// A pairs backtest as submitted by the caller. Immutable for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairsBacktestConfiguration {
    pub strategy_name: String,
    /// Raw parameters; resolved into a typed strategy by [`Self::validate`].
    #[serde(default)]
    pub strategy_parameters: serde_json::Value,
    pub pairs_to_test: Vec<PairDefinition>,
    pub interval: Interval,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: Decimal,
    /// Worker-pool size. Defaults to a quarter of the available cores.
    #[serde(default)]
    pub max_parallelism: Option<usize>,
}

/// A configuration that passed validation, with its strategy resolved.
#[derive(Debug, Clone)]
pub struct ValidatedConfiguration {
    pub config: PairsBacktestConfiguration,
    pub strategy: StrategyKind,
    pub max_parallelism: usize,
}

impl ValidatedConfiguration {
    /// Starting balance of each pair unit. Capital is split evenly.
    pub fn capital_per_pair(&self) -> Decimal {
        let pairs = self.config.pairs_to_test.len().max(1);
        (self.config.initial_capital / Decimal::from(pairs))
            .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero)
    }
}

/// Quarter of the available cores, never below one.
pub fn default_parallelism() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores / 4).max(1)
}

impl PairsBacktestConfiguration {
    /// Load a configuration file (TOML, JSON, or YAML by extension) with
    /// `PAIRS_`-prefixed environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(::config::Environment::with_prefix("PAIRS").try_parsing(true))
            .build()
            .map_err(|e| ConfigurationError::Load(format!("{}: {}", path.display(), e)))?;

        settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::Load(format!("{}: {}", path.display(), e)))
    }

    /// Check every run invariant and resolve the strategy.
    pub fn validate(&self) -> Result<ValidatedConfiguration, ConfigurationError> {
        if self.pairs_to_test.is_empty() {
            return Err(ConfigurationError::EmptyPairs);
        }
        if self.start_date >= self.end_date {
            return Err(ConfigurationError::InvalidDateRange {
                start: self.start_date,
                end: self.end_date,
            });
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(ConfigurationError::InvalidCapital(
                self.initial_capital.to_string(),
            ));
        }

        let max_parallelism = match self.max_parallelism {
            Some(0) => return Err(ConfigurationError::InvalidParallelism(0)),
            Some(n) => n,
            None => default_parallelism(),
        };

        let mut seen = HashSet::new();
        for pair in &self.pairs_to_test {
            pair.validate().map_err(ConfigurationError::InvalidPair)?;
            if !seen.insert(pair.key()) {
                return Err(ConfigurationError::DuplicatePair(pair.key()));
            }
        }

        let strategy =
            StrategyRegistry::resolve(&self.strategy_name, self.strategy_parameters.clone())?;

        Ok(ValidatedConfiguration {
            config: self.clone(),
            strategy,
            max_parallelism,
        })
    }

    /// Every distinct symbol referenced by the configured pairs.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .pairs_to_test
            .iter()
            .flat_map(|p| [p.symbol_a.clone(), p.symbol_b.clone()])
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }
}

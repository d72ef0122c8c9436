//! Strategy registry and typed strategy parameters.
//!
//! Strategies are a closed set. A strategy name resolves to a variant whose
//! parameters are deserialized and validated up front, so a bad parameter map
//! fails the run before any pair unit starts.

use pairs_core::types::PairDefinition;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::sizing::SizingConfig;

/// Canonical name of the pairs mean-reversion strategy.
pub const PAIRS_MEAN_REVERSION: &str = "pairs_mean_reversion";

/// Typed parameters of the pairs mean-reversion strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PairsStrategyConfig {
    /// Rolling window length for spread mean and deviation.
    #[serde(alias = "lookbackPeriod")]
    pub lookback_period: usize,
    /// Absolute z-score at or above which a position opens.
    #[serde(alias = "entryZ")]
    pub entry_z: f64,
    /// Absolute z-score at or below which a position closes.
    #[serde(alias = "exitZ")]
    pub exit_z: f64,
    #[serde(default)]
    pub sizing: SizingConfig,
}

impl Default for PairsStrategyConfig {
    fn default() -> Self {
        Self {
            lookback_period: 20,
            entry_z: 2.0,
            exit_z: 0.5,
            sizing: SizingConfig::default(),
        }
    }
}

impl PairsStrategyConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.lookback_period <= 1 {
            return Err(ConfigurationError::InvalidParameters(format!(
                "lookback_period must be greater than 1, got {}",
                self.lookback_period
            )));
        }
        if !self.entry_z.is_finite() || !self.exit_z.is_finite() {
            return Err(ConfigurationError::InvalidParameters(
                "entry_z and exit_z must be finite".to_string(),
            ));
        }
        if self.exit_z < 0.0 {
            return Err(ConfigurationError::InvalidParameters(format!(
                "exit_z must not be negative, got {}",
                self.exit_z
            )));
        }
        if self.exit_z >= self.entry_z {
            return Err(ConfigurationError::InvalidParameters(format!(
                "exit_z ({}) must be below entry_z ({})",
                self.exit_z, self.entry_z
            )));
        }
        self.sizing
            .validate()
            .map_err(ConfigurationError::InvalidParameters)
    }

    /// Parameters for one pair under this strategy.
    pub fn for_pair(&self, pair: &PairDefinition) -> PairStrategyParameters {
        PairStrategyParameters {
            lookback_period: self.lookback_period,
            entry_z: self.entry_z,
            exit_z: self.exit_z,
            symbol_a: pair.symbol_a.clone(),
            symbol_b: pair.symbol_b.clone(),
            hedge_ratio: pair.hedge_ratio,
        }
    }
}

/// Signal-model parameters bound to a single pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairStrategyParameters {
    pub lookback_period: usize,
    pub entry_z: f64,
    pub exit_z: f64,
    pub symbol_a: String,
    pub symbol_b: String,
    pub hedge_ratio: Decimal,
}

impl PairStrategyParameters {
    pub fn pair(&self) -> PairDefinition {
        PairDefinition::new(self.symbol_a.clone(), self.symbol_b.clone(), self.hedge_ratio)
    }
}

/// Every strategy the engine can run.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyKind {
    PairsMeanReversion(PairsStrategyConfig),
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::PairsMeanReversion(_) => PAIRS_MEAN_REVERSION,
        }
    }

    pub fn sizing(&self) -> &SizingConfig {
        match self {
            StrategyKind::PairsMeanReversion(config) => &config.sizing,
        }
    }
}

type StrategyConstructor = fn(serde_json::Value) -> Result<StrategyKind, ConfigurationError>;

/// Name-to-constructor table, fixed at build time.
pub struct StrategyRegistry;

impl StrategyRegistry {
    const ENTRIES: &'static [(&'static str, StrategyConstructor)] = &[
        (PAIRS_MEAN_REVERSION, build_pairs_mean_reversion),
        ("pairs_trading", build_pairs_mean_reversion),
        ("PairsTrading", build_pairs_mean_reversion),
    ];

    /// Resolve a strategy name and raw parameters into a validated strategy.
    pub fn resolve(name: &str, parameters: serde_json::Value) -> Result<StrategyKind, ConfigurationError> {
        let constructor = Self::ENTRIES
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, constructor)| *constructor)
            .ok_or_else(|| ConfigurationError::UnknownStrategy(name.to_string()))?;

        constructor(parameters)
    }

    /// Names the registry accepts.
    pub fn names() -> impl Iterator<Item = &'static str> {
        Self::ENTRIES.iter().map(|(name, _)| *name)
    }
}

fn build_pairs_mean_reversion(parameters: serde_json::Value) -> Result<StrategyKind, ConfigurationError> {
    let parameters = match parameters {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other,
    };

    let defaults = serde_json::to_value(PairsStrategyConfig::default())
        .map_err(|e| ConfigurationError::InvalidParameters(e.to_string()))?;
    let merged = merge_defaults(defaults, parameters)?;

    let config: PairsStrategyConfig = serde_json::from_value(merged)
        .map_err(|e| ConfigurationError::InvalidParameters(e.to_string()))?;
    config.validate()?;

    Ok(StrategyKind::PairsMeanReversion(config))
}

/// Overlay user parameters onto the serialized defaults, normalizing
/// camelCase keys so they replace their snake_case defaults.
fn merge_defaults(
    defaults: serde_json::Value,
    overrides: serde_json::Value,
) -> Result<serde_json::Value, ConfigurationError> {
    let serde_json::Value::Object(mut merged) = defaults else {
        return Err(ConfigurationError::InvalidParameters(
            "strategy defaults must be an object".to_string(),
        ));
    };
    let serde_json::Value::Object(overrides) = overrides else {
        return Err(ConfigurationError::InvalidParameters(
            "strategy parameters must be an object".to_string(),
        ));
    };

    for (key, value) in overrides {
        let key = match key.as_str() {
            "lookbackPeriod" => "lookback_period".to_string(),
            "entryZ" => "entry_z".to_string(),
            "exitZ" => "exit_z".to_string(),
            _ => key,
        };
        merged.insert(key, value);
    }

    Ok(serde_json::Value::Object(merged))
}

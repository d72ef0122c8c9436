//! Kelly-criterion position sizing.
//!
//! The sizer reports the raw Kelly fraction. It does not clamp: a negative
//! fraction is a valid "do not trade" answer and callers decide what to do
//! with it. Only [`compute_trade_size`] floors at zero, because a position
//! can never be sized below nothing.

use pairs_core::types::{KellyMetrics, AMOUNT_SCALE};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Full and half Kelly fractions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KellyFraction {
    pub fraction: f64,
    pub half_fraction: f64,
}

impl KellyFraction {
    pub const ZERO: KellyFraction = KellyFraction {
        fraction: 0.0,
        half_fraction: 0.0,
    };

    fn new(fraction: f64) -> Self {
        Self {
            fraction,
            half_fraction: fraction / 2.0,
        }
    }
}

/// Payoff ratio `average_win / |average_loss|`.
///
/// `None` when there is no loss to divide by.
pub fn payoff_ratio(average_win: f64, average_loss: f64) -> Option<f64> {
    if average_loss == 0.0 || !average_loss.is_finite() || !average_win.is_finite() {
        return None;
    }
    Some(average_win / average_loss.abs())
}

/// Kelly fraction `f = p - (1 - p) / R`.
///
/// Edge cases:
/// - `average_loss == 0` (no losing trades yet): `R` is undefined and `f = p`.
/// - `average_win == 0` with losses (no winners): `R = 0`, and `f = -(1 - p)`
///   stands in for the divergent formula. It is never positive.
pub fn compute_kelly_fraction(win_rate: f64, average_win: f64, average_loss: f64) -> KellyFraction {
    if !win_rate.is_finite() {
        return KellyFraction::ZERO;
    }

    let fraction = match payoff_ratio(average_win, average_loss) {
        None => win_rate,
        Some(ratio) if ratio <= 0.0 => -(1.0 - win_rate),
        Some(ratio) => win_rate - (1.0 - win_rate) / ratio,
    };

    KellyFraction::new(fraction)
}

/// Kelly fraction for a set of trade statistics; zero when there are no trades.
pub fn kelly_from_metrics(metrics: &KellyMetrics) -> KellyFraction {
    if metrics.total_trades == 0 {
        return KellyFraction::ZERO;
    }
    compute_kelly_fraction(metrics.win_rate, metrics.average_win, metrics.average_loss)
}

/// Spread units to buy with `fraction` of `capital_available` at `unit_price`.
///
/// Negative, non-finite, or zero fractions size to zero. Fractions above one
/// are not leveraged beyond the available capital. The quantity is truncated
/// to [`AMOUNT_SCALE`] places.
pub fn compute_trade_size(capital_available: Decimal, fraction: f64, unit_price: Decimal) -> Decimal {
    if !fraction.is_finite() || fraction <= 0.0 {
        return Decimal::ZERO;
    }
    if capital_available <= Decimal::ZERO || unit_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let fraction = Decimal::from_f64(fraction.min(1.0)).unwrap_or(Decimal::ZERO);
    ((capital_available * fraction) / unit_price)
        .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero)
}

/// Caller-side sizing policy used by the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Fraction used until enough trades have closed to trust Kelly.
    pub warmup_fraction: f64,
    /// Closed trades required before switching to Kelly sizing.
    pub min_trades_for_kelly: usize,
    /// Size with half Kelly instead of full Kelly.
    pub use_half_kelly: bool,
    /// Upper bound on the allocated fraction.
    pub max_fraction: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            warmup_fraction: 0.10,
            min_trades_for_kelly: 5,
            use_half_kelly: true,
            max_fraction: 1.0,
        }
    }
}

impl SizingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.warmup_fraction) {
            return Err(format!(
                "warmup_fraction must be within [0, 1], got {}",
                self.warmup_fraction
            ));
        }
        if !(self.max_fraction > 0.0 && self.max_fraction <= 1.0) {
            return Err(format!(
                "max_fraction must be within (0, 1], got {}",
                self.max_fraction
            ));
        }
        Ok(())
    }
}

/// Turns trailing trade statistics into an allocation fraction.
#[derive(Debug, Clone, Default)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Fraction of available capital for the next trade, given statistics of
    /// the trades closed so far. May be negative.
    pub fn allocation_fraction(&self, trailing: &KellyMetrics) -> f64 {
        if trailing.total_trades < self.config.min_trades_for_kelly {
            return self.config.warmup_fraction;
        }

        let kelly = kelly_from_metrics(trailing);
        let fraction = if self.config.use_half_kelly {
            kelly.half_fraction
        } else {
            kelly.fraction
        };
        fraction.min(self.config.max_fraction)
    }

    /// Spread units for the next trade.
    pub fn size(&self, capital_available: Decimal, trailing: &KellyMetrics, unit_price: Decimal) -> (f64, Decimal) {
        let fraction = self.allocation_fraction(trailing);
        (fraction, compute_trade_size(capital_available, fraction, unit_price))
    }
}

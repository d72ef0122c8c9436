//! Trade signals and closed spread trades.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pair::PairDefinition;

/// Decimal places kept for quantities, committed capital, and P&L. Matches
/// the scale of the persisted amount columns.
pub const AMOUNT_SCALE: u32 = 8;

/// Side of a spread position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadDirection {
    /// Long A, short `hedge_ratio` of B. Taken when the spread is below its mean.
    Long,
    /// Short A, long `hedge_ratio` of B. Taken when the spread is above its mean.
    Short,
}

impl SpreadDirection {
    /// Direction implied by a z-score: above the mean we sell the spread.
    pub fn from_z_score(z: f64) -> Self {
        if z > 0.0 {
            SpreadDirection::Short
        } else {
            SpreadDirection::Long
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> Decimal {
        match self {
            SpreadDirection::Long => Decimal::ONE,
            SpreadDirection::Short => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpreadDirection::Long => "long",
            SpreadDirection::Short => "short",
        }
    }
}

/// Decision taken at one point of a pair's series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDecision {
    Enter,
    Exit,
    /// Entry condition met while a position was already open.
    Hold,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Spread reverted inside the exit band.
    Signal,
    /// Forced close at the last bar of the series.
    EndOfSeries,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Signal => "signal",
            ExitReason::EndOfSeries => "end_of_series",
        }
    }
}

/// A decision point emitted by the signal generator.
///
/// The generator leaves `quantity` and `profit_or_loss` at zero; the simulator
/// fills them in for the signals it executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub trade_id: Uuid,
    /// Pair key, e.g. `KO/PEP`.
    pub security_id: String,
    /// Leg A symbol.
    pub symbol: String,
    pub decision: TradeDecision,
    /// Direction of the position this signal opens, closes, or would have opened.
    pub direction: SpreadDirection,
    /// Spread value at the signal bar.
    pub price: Decimal,
    /// Gross capital per spread unit at the signal bar.
    pub unit_cost: Decimal,
    pub z_score: f64,
    pub quantity: Decimal,
    pub profit_or_loss: Decimal,
    pub strategy: String,
    pub timestamp: DateTime<Utc>,
    /// Set on exits only.
    pub exit_reason: Option<ExitReason>,
}

/// A simulated spread trade, closed and immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSummary {
    pub id: Uuid,
    pub pair: PairDefinition,
    pub direction: SpreadDirection,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    /// Spread at entry.
    pub entry_price: Decimal,
    /// Spread at exit.
    pub exit_price: Decimal,
    pub entry_z: f64,
    pub exit_z: f64,
    /// Spread units held.
    pub quantity: Decimal,
    /// Fraction of available capital allocated at entry.
    pub size_fraction: f64,
    /// Capital debited from the pair's balance at entry.
    pub capital_committed: Decimal,
    pub realized_pnl: Decimal,
    /// Per-unit return on gross capital, independent of size.
    pub return_pct: f64,
    pub exit_reason: ExitReason,
}

impl TradeSummary {
    pub fn is_winner(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }

    pub fn is_loser(&self) -> bool {
        self.realized_pnl < Decimal::ZERO
    }

    pub fn holding_period(&self) -> Duration {
        self.exit_time.signed_duration_since(self.entry_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_z_score() {
        assert_eq!(SpreadDirection::from_z_score(2.1), SpreadDirection::Short);
        assert_eq!(SpreadDirection::from_z_score(-2.1), SpreadDirection::Long);
        assert_eq!(SpreadDirection::Short.sign(), Decimal::NEGATIVE_ONE);
    }

    #[test]
    fn test_decision_serde_names() {
        let json = serde_json::to_string(&TradeDecision::Enter).unwrap();
        assert_eq!(json, "\"enter\"");
        let reason: ExitReason = serde_json::from_str("\"end_of_series\"").unwrap();
        assert_eq!(reason, ExitReason::EndOfSeries);
    }
}

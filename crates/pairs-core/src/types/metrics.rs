//! Kelly-criterion trade statistics.

use serde::{Deserialize, Serialize};

/// Win/loss statistics and the Kelly fraction derived from them.
///
/// All fields are zero when computed from an empty trade set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KellyMetrics {
    /// Unclamped Kelly fraction; negative means "do not trade".
    pub kelly_fraction: f64,
    pub kelly_half_fraction: f64,
    pub win_rate: f64,
    /// `average_win / |average_loss|`, zero when undefined.
    pub payoff_ratio: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub average_win: f64,
    /// Non-positive by convention.
    pub average_loss: f64,
}

impl KellyMetrics {
    pub fn is_empty(&self) -> bool {
        self.total_trades == 0
    }

    /// Trades that neither won nor lost.
    pub fn scratch_trades(&self) -> usize {
        self.total_trades
            .saturating_sub(self.winning_trades + self.losing_trades)
    }
}

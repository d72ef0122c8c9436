//! Per-pair and per-run backtest results.

use chrono::{DateTime, Utc};
use pairs_core::types::{KellyMetrics, PairDefinition, TradeSignal, TradeSummary};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::PairError;
use crate::performance::{EquityPoint, RunTotals, TradeStatistics};

/// Lifecycle state of a backtest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Every pair produced a result.
    Completed,
    /// Finished with at least one failed pair.
    Partial,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "partial" => Ok(RunStatus::Partial),
            "cancelled" => Ok(RunStatus::Cancelled),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// Output of one successful pair unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairResult {
    pub pair: PairDefinition,
    pub trades: Vec<TradeSummary>,
    pub signals: Vec<TradeSignal>,
    pub metrics: KellyMetrics,
    pub statistics: TradeStatistics,
    pub starting_capital: Decimal,
    pub final_capital: Decimal,
}

impl PairResult {
    pub fn total_pnl(&self) -> Decimal {
        self.trades.iter().map(|t| t.realized_pnl).sum()
    }
}

/// A pair unit that did not produce a result.
#[derive(Debug, Clone, PartialEq)]
pub struct PairFailure {
    pub pair: PairDefinition,
    pub error: PairError,
}

impl PairFailure {
    pub fn reason(&self) -> String {
        self.error.to_string()
    }
}

/// Aggregate of one run, handed to persistence once.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub run_id: Uuid,
    pub strategy_name: String,
    pub status: RunStatus,
    pub initial_capital: Decimal,
    /// In configuration order.
    pub pair_results: Vec<PairResult>,
    /// In configuration order.
    pub failed_pairs: Vec<PairFailure>,
    pub totals: RunTotals,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl BacktestResult {
    pub fn total_return(&self) -> f64 {
        self.totals.total_return
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.totals.equity_curve
    }

    pub fn trades(&self) -> impl Iterator<Item = &TradeSummary> {
        self.pair_results.iter().flat_map(|r| r.trades.iter())
    }

    pub fn is_partial(&self) -> bool {
        !self.failed_pairs.is_empty()
    }
}

/// Per-pair line of a persisted run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSummary {
    pub pair_key: String,
    pub trades: usize,
    pub total_pnl: Decimal,
    pub final_capital: Decimal,
    pub metrics: KellyMetrics,
}

/// Failed pair as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPairRecord {
    pub pair_key: String,
    pub reason: String,
}

/// Flattened run metrics, the shape stored by the persistence boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub strategy_name: String,
    pub status: RunStatus,
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub total_pnl: Decimal,
    pub total_return: f64,
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    pub metrics: KellyMetrics,
    pub statistics: TradeStatistics,
    pub pairs: Vec<PairSummary>,
    pub failed_pairs: Vec<FailedPairRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub completed_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn from_result(result: &BacktestResult, initial_capital: Decimal) -> Self {
        Self {
            run_id: result.run_id,
            strategy_name: result.strategy_name.clone(),
            status: result.status,
            initial_capital,
            final_equity: result.totals.final_equity,
            total_pnl: result.totals.total_pnl,
            total_return: result.totals.total_return,
            max_drawdown: result.totals.max_drawdown,
            max_drawdown_pct: result.totals.max_drawdown_pct,
            metrics: result.totals.metrics.clone(),
            statistics: result.totals.statistics.clone(),
            pairs: result
                .pair_results
                .iter()
                .map(|r| PairSummary {
                    pair_key: r.pair.key(),
                    trades: r.trades.len(),
                    total_pnl: r.total_pnl(),
                    final_capital: r.final_capital,
                    metrics: r.metrics.clone(),
                })
                .collect(),
            failed_pairs: result
                .failed_pairs
                .iter()
                .map(|f| FailedPairRecord {
                    pair_key: f.pair.key(),
                    reason: f.reason(),
                })
                .collect(),
            equity_curve: result.totals.equity_curve.clone(),
            completed_at: result.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_round_trip() {
        for status in [
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Partial,
            RunStatus::Cancelled,
            RunStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("done".parse::<RunStatus>().is_err());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }
}

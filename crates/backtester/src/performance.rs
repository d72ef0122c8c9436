//! Trade-set reductions: Kelly metrics, trade statistics, and run totals.
//!
//! Everything here is a pure function of its input. Sums are taken in
//! `Decimal` where the input is monetary so the result does not depend on
//! the order trades arrive in.

use chrono::{DateTime, Utc};
use pairs_core::types::{KellyMetrics, TradeSummary};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::sizing::{compute_kelly_fraction, payoff_ratio};

/// Trade statistics beyond the Kelly inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStatistics {
    pub total_pnl: Decimal,
    pub gross_profit: Decimal,
    /// Non-positive.
    pub gross_loss: Decimal,
    /// `gross_profit / |gross_loss|`; infinite when there are gains and no losses.
    pub profit_factor: f64,
    /// Average realized P&L per trade.
    pub expectancy: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub average_holding_hours: f64,
    pub best_trade_pnl: Decimal,
    pub worst_trade_pnl: Decimal,
    pub average_return_pct: f64,
}

/// One point of the run equity curve, taken at a trade exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub pair_key: String,
    pub cumulative_pnl: Decimal,
    pub equity: Decimal,
    /// Distance below the running peak, non-negative.
    pub drawdown: Decimal,
    pub drawdown_pct: f64,
}

/// Run-wide totals derived from every closed trade of every pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub total_pnl: Decimal,
    /// `total_pnl / initial_capital`.
    pub total_return: f64,
    pub final_equity: Decimal,
    pub equity_curve: Vec<EquityPoint>,
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    pub metrics: KellyMetrics,
    pub statistics: TradeStatistics,
}

pub struct PerformanceAggregator;

impl PerformanceAggregator {
    /// Kelly metrics over realized P&L. Zeroed for an empty trade set.
    ///
    /// P&L above zero is a win, below zero a loss. Scratch trades count
    /// toward the total only.
    pub fn aggregate(trades: &[TradeSummary]) -> KellyMetrics {
        if trades.is_empty() {
            return KellyMetrics::default();
        }

        let mut wins = Decimal::ZERO;
        let mut losses = Decimal::ZERO;
        let mut winning = 0usize;
        let mut losing = 0usize;

        for trade in trades {
            if trade.is_winner() {
                wins += trade.realized_pnl;
                winning += 1;
            } else if trade.is_loser() {
                losses += trade.realized_pnl;
                losing += 1;
            }
        }

        let average_win = average_decimal(wins, winning);
        let average_loss = average_decimal(losses, losing);
        kelly_metrics(trades.len(), winning, losing, average_win, average_loss)
    }

    /// Kelly metrics over per-unit returns.
    ///
    /// Used for sizing, where the evidence should not depend on how large
    /// earlier positions happened to be.
    pub fn aggregate_returns(returns: &[f64]) -> KellyMetrics {
        if returns.is_empty() {
            return KellyMetrics::default();
        }

        let (mut wins, mut losses) = (0.0, 0.0);
        let (mut winning, mut losing) = (0usize, 0usize);
        for r in returns.iter().copied().filter(|r| r.is_finite()) {
            if r > 0.0 {
                wins += r;
                winning += 1;
            } else if r < 0.0 {
                losses += r;
                losing += 1;
            }
        }

        let average_win = if winning > 0 { wins / winning as f64 } else { 0.0 };
        let average_loss = if losing > 0 { losses / losing as f64 } else { 0.0 };
        kelly_metrics(returns.len(), winning, losing, average_win, average_loss)
    }

    /// Supplementary statistics. Streaks follow the order of `trades`.
    pub fn statistics(trades: &[TradeSummary]) -> TradeStatistics {
        if trades.is_empty() {
            return TradeStatistics::default();
        }

        let gross_profit: Decimal = trades
            .iter()
            .filter(|t| t.is_winner())
            .map(|t| t.realized_pnl)
            .sum();
        let gross_loss: Decimal = trades
            .iter()
            .filter(|t| t.is_loser())
            .map(|t| t.realized_pnl)
            .sum();
        let total_pnl = gross_profit + gross_loss;

        let profit_factor = if gross_loss < Decimal::ZERO {
            (gross_profit / gross_loss.abs()).to_f64().unwrap_or(0.0)
        } else if gross_profit > Decimal::ZERO {
            f64::INFINITY
        } else {
            0.0
        };

        let (max_consecutive_wins, max_consecutive_losses) = consecutive_streaks(trades);

        let total_hours: i64 = trades.iter().map(|t| t.holding_period().num_hours()).sum();
        let count = trades.len();

        TradeStatistics {
            total_pnl,
            gross_profit,
            gross_loss,
            profit_factor,
            expectancy: average_decimal(total_pnl, count),
            max_consecutive_wins,
            max_consecutive_losses,
            average_holding_hours: total_hours as f64 / count as f64,
            best_trade_pnl: trades.iter().map(|t| t.realized_pnl).max().unwrap_or_default(),
            worst_trade_pnl: trades.iter().map(|t| t.realized_pnl).min().unwrap_or_default(),
            average_return_pct: trades.iter().map(|t| t.return_pct).sum::<f64>() / count as f64,
        }
    }

    /// Run totals over the trades of every pair.
    ///
    /// Trades are put in a canonical order (exit time, pair, entry time)
    /// first, so the result is the same whichever order pairs finished in.
    pub fn aggregate_run<'a>(
        initial_capital: Decimal,
        trades: impl IntoIterator<Item = &'a TradeSummary>,
    ) -> RunTotals {
        let mut ordered: Vec<TradeSummary> = trades.into_iter().cloned().collect();
        sort_canonical(&mut ordered);

        let equity_curve = equity_curve(initial_capital, &ordered);
        let total_pnl: Decimal = ordered.iter().map(|t| t.realized_pnl).sum();

        let (max_drawdown, max_drawdown_pct) = equity_curve
            .iter()
            .fold((Decimal::ZERO, 0.0_f64), |(dd, pct), point| {
                (dd.max(point.drawdown), pct.max(point.drawdown_pct))
            });

        let total_return = if initial_capital > Decimal::ZERO {
            (total_pnl / initial_capital).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        RunTotals {
            total_pnl,
            total_return,
            final_equity: initial_capital + total_pnl,
            max_drawdown,
            max_drawdown_pct,
            metrics: Self::aggregate(&ordered),
            statistics: Self::statistics(&ordered),
            equity_curve,
        }
    }
}

/// Order trades by exit time, then pair key, then entry time.
pub fn sort_canonical(trades: &mut [TradeSummary]) {
    trades.sort_by(|a, b| {
        a.exit_time
            .cmp(&b.exit_time)
            .then_with(|| a.pair.key().cmp(&b.pair.key()))
            .then_with(|| a.entry_time.cmp(&b.entry_time))
    });
}

fn equity_curve(initial_capital: Decimal, ordered: &[TradeSummary]) -> Vec<EquityPoint> {
    let mut cumulative = Decimal::ZERO;
    let mut peak = initial_capital;

    ordered
        .iter()
        .map(|trade| {
            cumulative += trade.realized_pnl;
            let equity = initial_capital + cumulative;
            peak = peak.max(equity);

            let drawdown = peak - equity;
            let drawdown_pct = if peak > Decimal::ZERO {
                (drawdown / peak).to_f64().unwrap_or(0.0)
            } else {
                0.0
            };

            EquityPoint {
                timestamp: trade.exit_time,
                pair_key: trade.pair.key(),
                cumulative_pnl: cumulative,
                equity,
                drawdown,
                drawdown_pct,
            }
        })
        .collect()
}

fn kelly_metrics(
    total: usize,
    winning: usize,
    losing: usize,
    average_win: f64,
    average_loss: f64,
) -> KellyMetrics {
    let win_rate = winning as f64 / total as f64;
    let kelly = compute_kelly_fraction(win_rate, average_win, average_loss);

    KellyMetrics {
        kelly_fraction: kelly.fraction,
        kelly_half_fraction: kelly.half_fraction,
        win_rate,
        payoff_ratio: payoff_ratio(average_win, average_loss).unwrap_or(0.0),
        total_trades: total,
        winning_trades: winning,
        losing_trades: losing,
        average_win,
        average_loss,
    }
}

fn average_decimal(sum: Decimal, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    (sum / Decimal::from(count)).to_f64().unwrap_or(0.0)
}

fn consecutive_streaks(trades: &[TradeSummary]) -> (usize, usize) {
    let mut max_wins = 0;
    let mut max_losses = 0;
    let mut current_wins = 0;
    let mut current_losses = 0;

    for trade in trades {
        if trade.is_winner() {
            current_wins += 1;
            current_losses = 0;
            max_wins = max_wins.max(current_wins);
        } else if trade.is_loser() {
            current_losses += 1;
            current_wins = 0;
            max_losses = max_losses.max(current_losses);
        }
    }

    (max_wins, max_losses)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pairs_core::types::{ExitReason, PairDefinition, SpreadDirection};
    use uuid::Uuid;

    pub(crate) fn closed_trade(pair: &PairDefinition, day: i64, hours: i64, pnl: i64) -> TradeSummary {
        let entry_time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day);
        TradeSummary {
            id: Uuid::new_v4(),
            pair: pair.clone(),
            direction: SpreadDirection::Long,
            entry_time,
            exit_time: entry_time + Duration::hours(hours),
            entry_price: Decimal::new(10, 0),
            exit_price: Decimal::new(10, 0) + Decimal::new(pnl, 0),
            entry_z: -2.0,
            exit_z: 0.0,
            quantity: Decimal::ONE,
            size_fraction: 0.1,
            capital_committed: Decimal::new(200, 0),
            realized_pnl: Decimal::new(pnl, 0),
            return_pct: pnl as f64 / 200.0,
            exit_reason: ExitReason::Signal,
        }
    }

    fn ko_pep() -> PairDefinition {
        PairDefinition::new("KO", "PEP", Decimal::ONE)
    }

    #[test]
    fn test_empty_trades_are_all_zero() {
        assert_eq!(PerformanceAggregator::aggregate(&[]), KellyMetrics::default());
        assert_eq!(PerformanceAggregator::aggregate_returns(&[]), KellyMetrics::default());
        assert_eq!(PerformanceAggregator::statistics(&[]), TradeStatistics::default());

        let totals = PerformanceAggregator::aggregate_run(Decimal::new(1000, 0), std::iter::empty());
        assert_eq!(totals.final_equity, Decimal::new(1000, 0));
        assert!(totals.equity_curve.is_empty());
        assert_eq!(totals.max_drawdown, Decimal::ZERO);
    }

    #[test]
    fn test_aggregate_reference_metrics() {
        let pair = ko_pep();
        // 3 wins of 100, 2 losses of -50: p = 0.6, R = 2, f = 0.4
        let trades: Vec<_> = [100, -50, 100, -50, 100]
            .iter()
            .enumerate()
            .map(|(i, pnl)| closed_trade(&pair, i as i64, 24, *pnl))
            .collect();

        let metrics = PerformanceAggregator::aggregate(&trades);
        assert_eq!(metrics.total_trades, 5);
        assert_eq!(metrics.winning_trades, 3);
        assert_eq!(metrics.losing_trades, 2);
        assert!((metrics.win_rate - 0.6).abs() < 1e-12);
        assert!((metrics.payoff_ratio - 2.0).abs() < 1e-12);
        assert!((metrics.kelly_fraction - 0.4).abs() < 1e-12);
        assert!((metrics.kelly_half_fraction - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let pair = ko_pep();
        let trades: Vec<_> = [30, -10, 0, 45, -20]
            .iter()
            .enumerate()
            .map(|(i, pnl)| closed_trade(&pair, i as i64, 6, *pnl))
            .collect();

        assert_eq!(
            PerformanceAggregator::aggregate(&trades),
            PerformanceAggregator::aggregate(&trades)
        );
        assert_eq!(
            PerformanceAggregator::aggregate_run(Decimal::new(1000, 0), &trades),
            PerformanceAggregator::aggregate_run(Decimal::new(1000, 0), &trades)
        );
    }

    #[test]
    fn test_scratch_trades_count_in_total_only() {
        let pair = ko_pep();
        let trades = vec![closed_trade(&pair, 0, 1, 0), closed_trade(&pair, 1, 1, 10)];
        let metrics = PerformanceAggregator::aggregate(&trades);

        assert_eq!(metrics.total_trades, 2);
        assert_eq!(metrics.winning_trades, 1);
        assert_eq!(metrics.scratch_trades(), 1);
        assert!((metrics.win_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_statistics() {
        let pair = ko_pep();
        let trades: Vec<_> = [10, 20, -5, -5, -5, 30]
            .iter()
            .enumerate()
            .map(|(i, pnl)| closed_trade(&pair, i as i64, 12, *pnl))
            .collect();

        let stats = PerformanceAggregator::statistics(&trades);
        assert_eq!(stats.total_pnl, Decimal::new(45, 0));
        assert_eq!(stats.gross_profit, Decimal::new(60, 0));
        assert_eq!(stats.gross_loss, Decimal::new(-15, 0));
        assert!((stats.profit_factor - 4.0).abs() < 1e-12);
        assert!((stats.expectancy - 7.5).abs() < 1e-12);
        assert_eq!(stats.max_consecutive_wins, 2);
        assert_eq!(stats.max_consecutive_losses, 3);
        assert!((stats.average_holding_hours - 12.0).abs() < 1e-12);
        assert_eq!(stats.best_trade_pnl, Decimal::new(30, 0));
        assert_eq!(stats.worst_trade_pnl, Decimal::new(-5, 0));
    }

    #[test]
    fn test_run_drawdown_and_order_independence() {
        let ko = ko_pep();
        let xom = PairDefinition::new("XOM", "CVX", Decimal::ONE);
        let trades = vec![
            closed_trade(&ko, 0, 24, 100),
            closed_trade(&xom, 1, 24, -150),
            closed_trade(&ko, 2, 24, -50),
            closed_trade(&xom, 3, 24, 300),
        ];
        let mut reversed = trades.clone();
        reversed.reverse();

        let totals = PerformanceAggregator::aggregate_run(Decimal::new(1000, 0), &trades);
        assert_eq!(totals, PerformanceAggregator::aggregate_run(Decimal::new(1000, 0), &reversed));

        // Equity: 1100, 950, 900, 1200. Peak 1100, trough 900.
        assert_eq!(totals.total_pnl, Decimal::new(200, 0));
        assert_eq!(totals.final_equity, Decimal::new(1200, 0));
        assert_eq!(totals.max_drawdown, Decimal::new(200, 0));
        assert!((totals.max_drawdown_pct - 200.0 / 1100.0).abs() < 1e-12);
        assert!((totals.total_return - 0.2).abs() < 1e-12);
        assert_eq!(totals.equity_curve.len(), 4);
        assert_eq!(totals.equity_curve[1].pair_key, "XOM/CVX");
        assert_eq!(totals.equity_curve[3].drawdown, Decimal::ZERO);
    }
}

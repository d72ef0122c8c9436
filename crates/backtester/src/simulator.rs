//! Trade simulator for a single pair.
//!
//! Walks a signal sequence once, opening and closing one spread position at
//! a time against a running capital balance. Committed capital is debited at
//! entry and credited back with the realized P&L at exit.

use chrono::{DateTime, Utc};
use pairs_core::types::{
    ExitReason, PairDefinition, TradeDecision, TradeSignal, TradeSummary, AMOUNT_SCALE,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::performance::PerformanceAggregator;
use crate::sizing::PositionSizer;

/// Everything one simulation pass produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    /// Closed trades in entry order.
    pub trades: Vec<TradeSummary>,
    /// Enter and exit signals that were acted on, with quantity and P&L filled in.
    pub executed_signals: Vec<TradeSignal>,
    pub final_capital: Decimal,
}

/// Simulates the signals of one pair. Holds no state between calls.
#[derive(Debug, Clone)]
pub struct TradeSimulator {
    pair: PairDefinition,
}

impl TradeSimulator {
    pub fn new(pair: PairDefinition) -> Self {
        Self { pair }
    }

    /// Run a signal sequence through the Flat/Open state machine.
    ///
    /// Signals must be in timestamp order; out-of-order signals are skipped.
    /// A position left open when the sequence ends is closed at the last
    /// signal seen.
    pub fn simulate<I>(&self, signals: I, initial_capital: Decimal, sizer: &PositionSizer) -> SimulationOutcome
    where
        I: IntoIterator<Item = TradeSignal>,
    {
        let mut state = SimulationState::new(initial_capital);

        for signal in signals {
            if state.last_timestamp.is_some_and(|last| signal.timestamp < last) {
                warn!(
                    pair = %self.pair,
                    timestamp = %signal.timestamp,
                    "Skipping out-of-order signal"
                );
                continue;
            }
            state.last_timestamp = Some(signal.timestamp);
            state.last_signal = Some(signal.clone());

            match signal.decision {
                TradeDecision::Enter => state.open_position(signal, sizer),
                TradeDecision::Exit => {
                    let reason = signal.exit_reason.unwrap_or(ExitReason::Signal);
                    state.close_position(&self.pair, signal, reason);
                }
                TradeDecision::Hold => {}
            }
        }

        if state.open.is_some() {
            if let Some(last) = state.last_signal.clone() {
                state.close_position(&self.pair, last, ExitReason::EndOfSeries);
            }
        }

        state.into_outcome()
    }
}

struct OpenPosition {
    entry: TradeSignal,
    quantity: Decimal,
    fraction: f64,
    committed: Decimal,
}

struct SimulationState {
    balance: Decimal,
    open: Option<OpenPosition>,
    trades: Vec<TradeSummary>,
    executed_signals: Vec<TradeSignal>,
    /// Per-unit returns of the trades closed so far.
    trailing_returns: Vec<f64>,
    last_timestamp: Option<DateTime<Utc>>,
    last_signal: Option<TradeSignal>,
}

impl SimulationState {
    fn new(initial_capital: Decimal) -> Self {
        Self {
            balance: initial_capital,
            open: None,
            trades: Vec::new(),
            executed_signals: Vec::new(),
            trailing_returns: Vec::new(),
            last_timestamp: None,
            last_signal: None,
        }
    }

    fn open_position(&mut self, signal: TradeSignal, sizer: &PositionSizer) {
        if self.open.is_some() {
            debug!(pair = %signal.security_id, "Ignoring entry while a position is open");
            return;
        }

        // Sizing only sees trades that closed before this entry.
        let trailing = PerformanceAggregator::aggregate_returns(&self.trailing_returns);
        let (fraction, quantity) = sizer.size(self.balance, &trailing, signal.unit_cost);
        let committed = (quantity * signal.unit_cost)
            .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero)
            .min(self.balance.max(Decimal::ZERO));
        self.balance -= committed;

        debug!(
            pair = %signal.security_id,
            direction = signal.direction.as_str(),
            spread = %signal.price,
            z = signal.z_score,
            fraction,
            quantity = %quantity,
            "Opened spread position"
        );

        let mut executed = signal.clone();
        executed.quantity = quantity;
        self.executed_signals.push(executed);

        self.open = Some(OpenPosition {
            entry: signal,
            quantity,
            fraction,
            committed,
        });
    }

    fn close_position(&mut self, pair: &PairDefinition, signal: TradeSignal, reason: ExitReason) {
        let Some(position) = self.open.take() else {
            debug!(pair = %signal.security_id, "Ignoring exit while flat");
            return;
        };

        let entry = position.entry;
        let move_per_unit = (signal.price - entry.price) * entry.direction.sign();
        let realized_pnl = (move_per_unit * position.quantity).round_dp(AMOUNT_SCALE);
        let return_pct = if entry.unit_cost > Decimal::ZERO {
            (move_per_unit / entry.unit_cost).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        self.balance += position.committed + realized_pnl;
        self.trailing_returns.push(return_pct);

        debug!(
            pair = %signal.security_id,
            pnl = %realized_pnl,
            reason = reason.as_str(),
            "Closed spread position"
        );

        // The exit always belongs to the open position.
        let id = entry.trade_id;

        let mut executed = signal.clone();
        executed.decision = TradeDecision::Exit;
        executed.trade_id = id;
        executed.direction = entry.direction;
        executed.quantity = position.quantity;
        executed.profit_or_loss = realized_pnl;
        executed.exit_reason = Some(reason);
        self.executed_signals.push(executed);

        self.trades.push(TradeSummary {
            id,
            pair: pair.clone(),
            direction: entry.direction,
            entry_time: entry.timestamp,
            exit_time: signal.timestamp,
            entry_price: entry.price,
            exit_price: signal.price,
            entry_z: entry.z_score,
            exit_z: signal.z_score,
            quantity: position.quantity,
            size_fraction: position.fraction,
            capital_committed: position.committed,
            realized_pnl,
            return_pct,
            exit_reason: reason,
        });
    }

    fn into_outcome(self) -> SimulationOutcome {
        SimulationOutcome {
            trades: self.trades,
            executed_signals: self.executed_signals,
            final_capital: self.balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sizing::SizingConfig;
    use chrono::{Duration, TimeZone};
    use pairs_core::types::SpreadDirection;
    use uuid::Uuid;

    fn pair() -> PairDefinition {
        PairDefinition::new("KO", "PEP", Decimal::ONE)
    }

    fn signal(
        decision: TradeDecision,
        direction: SpreadDirection,
        day: i64,
        spread: i64,
        trade_id: Uuid,
    ) -> TradeSignal {
        TradeSignal {
            trade_id,
            security_id: "KO/PEP".to_string(),
            symbol: "KO".to_string(),
            decision,
            direction,
            price: Decimal::new(spread, 0),
            unit_cost: Decimal::new(100, 0),
            z_score: 0.0,
            quantity: Decimal::ZERO,
            profit_or_loss: Decimal::ZERO,
            strategy: "pairs_mean_reversion".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day),
            exit_reason: None,
        }
    }

    /// Enter/exit round trips, each moving the spread by `moves[i]` in the
    /// position's favour.
    fn round_trips(moves: &[i64]) -> Vec<TradeSignal> {
        moves
            .iter()
            .enumerate()
            .flat_map(|(i, m)| {
                let id = Uuid::new_v4();
                let day = i as i64 * 2;
                [
                    signal(TradeDecision::Enter, SpreadDirection::Long, day, 10, id),
                    signal(TradeDecision::Exit, SpreadDirection::Long, day + 1, 10 + m, id),
                ]
            })
            .collect()
    }

    #[test]
    fn test_single_round_trip() {
        let id = Uuid::new_v4();
        let signals = vec![
            signal(TradeDecision::Enter, SpreadDirection::Short, 0, 20, id),
            signal(TradeDecision::Exit, SpreadDirection::Short, 3, 12, id),
        ];
        let outcome = TradeSimulator::new(pair()).simulate(
            signals,
            Decimal::new(10_000, 0),
            &PositionSizer::default(),
        );

        // Warmup 10%: 1_000 / 100 = 10 units, short spread 20 -> 12 earns 8 each.
        assert_eq!(outcome.trades.len(), 1);
        let trade = &outcome.trades[0];
        assert_eq!(trade.id, id);
        assert_eq!(trade.quantity, Decimal::new(10, 0));
        assert_eq!(trade.realized_pnl, Decimal::new(80, 0));
        assert_eq!(trade.capital_committed, Decimal::new(1000, 0));
        assert!((trade.return_pct - 0.08).abs() < 1e-12);
        assert_eq!(trade.exit_reason, ExitReason::Signal);
        assert_eq!(trade.pair, pair());
        assert_eq!(outcome.final_capital, Decimal::new(10_080, 0));

        assert_eq!(outcome.executed_signals.len(), 2);
        assert_eq!(outcome.executed_signals[1].profit_or_loss, Decimal::new(80, 0));
    }

    #[test]
    fn test_positions_never_overlap_and_all_close() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let signals = vec![
            signal(TradeDecision::Enter, SpreadDirection::Long, 0, 5, first),
            signal(TradeDecision::Hold, SpreadDirection::Long, 1, 4, Uuid::new_v4()),
            signal(TradeDecision::Enter, SpreadDirection::Short, 2, 3, second),
            signal(TradeDecision::Exit, SpreadDirection::Long, 3, 8, first),
            signal(TradeDecision::Exit, SpreadDirection::Long, 4, 9, first),
            signal(TradeDecision::Enter, SpreadDirection::Short, 5, 15, second),
            signal(TradeDecision::Hold, SpreadDirection::Short, 6, 17, Uuid::new_v4()),
        ];
        let outcome = TradeSimulator::new(pair()).simulate(
            signals,
            Decimal::new(10_000, 0),
            &PositionSizer::default(),
        );

        assert_eq!(outcome.trades.len(), 2);
        for pair in outcome.trades.windows(2) {
            assert!(pair[0].exit_time <= pair[1].entry_time);
        }

        let last = outcome.trades.last().unwrap();
        assert_eq!(last.exit_reason, ExitReason::EndOfSeries);
        assert_eq!(last.exit_price, Decimal::new(17, 0));
        assert_eq!(last.direction, SpreadDirection::Short);

        // Every dollar committed came back.
        let pnl: Decimal = outcome.trades.iter().map(|t| t.realized_pnl).sum();
        assert_eq!(outcome.final_capital, Decimal::new(10_000, 0) + pnl);
    }

    #[test]
    fn test_sizing_uses_only_past_trades() {
        let sizer = PositionSizer::new(SizingConfig {
            min_trades_for_kelly: 2,
            ..Default::default()
        });
        let signals = round_trips(&[5, -2, 4, 6, -3, 8]);
        let capital = Decimal::new(50_000, 0);

        let full = TradeSimulator::new(pair()).simulate(signals.clone(), capital, &sizer);
        assert_eq!(full.trades.len(), 6);

        // Truncating the future must not change any trade already closed.
        for closed in 1..=6 {
            let prefix = TradeSimulator::new(pair()).simulate(
                signals[..closed * 2].to_vec(),
                capital,
                &sizer,
            );
            assert_eq!(prefix.trades[..], full.trades[..closed]);
        }

        // Trades before the Kelly threshold use the warmup fraction.
        assert!((full.trades[0].size_fraction - 0.10).abs() < 1e-12);
        assert!((full.trades[1].size_fraction - 0.10).abs() < 1e-12);
        assert!((full.trades[2].size_fraction - 0.10).abs() > 1e-6);
    }

    #[test]
    fn test_negative_kelly_sizes_to_zero() {
        let sizer = PositionSizer::new(SizingConfig {
            min_trades_for_kelly: 2,
            ..Default::default()
        });
        let signals = round_trips(&[-5, -5, 7]);
        let outcome = TradeSimulator::new(pair()).simulate(signals, Decimal::new(10_000, 0), &sizer);

        assert_eq!(outcome.trades.len(), 3);
        let third = &outcome.trades[2];
        assert!(third.size_fraction < 0.0);
        assert_eq!(third.quantity, Decimal::ZERO);
        assert_eq!(third.realized_pnl, Decimal::ZERO);
        assert!(third.return_pct > 0.0);
    }

    #[test]
    fn test_amounts_keep_stored_scale() {
        let id = Uuid::new_v4();
        let mut enter = signal(TradeDecision::Enter, SpreadDirection::Long, 0, 10, id);
        enter.price = Decimal::new(1_012_345_678_901, 11);
        enter.unit_cost = Decimal::new(30_123_456_789_123, 11);
        let mut exit = signal(TradeDecision::Exit, SpreadDirection::Long, 1, 11, id);
        exit.price = Decimal::new(1_198_765_432_109, 11);

        let capital = Decimal::new(9_999_999, 3);
        let outcome = TradeSimulator::new(pair()).simulate(vec![enter, exit], capital, &PositionSizer::default());

        let trade = &outcome.trades[0];
        assert!(trade.quantity > Decimal::ZERO);
        assert!(trade.quantity.scale() <= AMOUNT_SCALE);
        assert!(trade.capital_committed.scale() <= AMOUNT_SCALE);
        assert!(trade.realized_pnl.scale() <= AMOUNT_SCALE);
        assert!(trade.capital_committed <= capital);
        assert_eq!(outcome.final_capital, capital + trade.realized_pnl);
    }

    #[test]
    fn test_empty_sequence() {
        let outcome = TradeSimulator::new(pair()).simulate(
            Vec::new(),
            Decimal::new(500, 0),
            &PositionSizer::default(),
        );
        assert!(outcome.trades.is_empty());
        assert_eq!(outcome.final_capital, Decimal::new(500, 0));
    }
}

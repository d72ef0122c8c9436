//! Spread signal generation for a single pair.
//!
//! The generator walks two aligned price windows, computes the spread
//! `price_a - hedge_ratio * price_b`, and z-scores it against a trailing
//! window that ends at (and includes) the current bar. Entry and exit use
//! separate bands so a spread hovering near one threshold cannot flap.

use pairs_core::types::{
    ExitReason, PairDefinition, PriceBar, PriceSeriesWindow, SpreadDirection, TradeDecision,
    TradeSignal,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::{Data, Distribution};
use uuid::Uuid;

use crate::error::AlignmentError;
use crate::strategy::PairStrategyParameters;

/// Relative tolerance under which a rolling deviation counts as zero.
const FLAT_SPREAD_TOLERANCE: f64 = 1e-9;

/// Verify two windows share identical timestamps, bar for bar.
pub fn check_alignment(
    series_a: &PriceSeriesWindow,
    series_b: &PriceSeriesWindow,
) -> Result<(), AlignmentError> {
    if series_a.len() != series_b.len() {
        return Err(AlignmentError::LengthMismatch {
            symbol_a: series_a.symbol.clone(),
            symbol_b: series_b.symbol.clone(),
            len_a: series_a.len(),
            len_b: series_b.len(),
        });
    }

    let mismatch = series_a
        .bars()
        .iter()
        .zip(series_b.bars())
        .enumerate()
        .find(|(_, (a, b))| a.timestamp != b.timestamp);

    match mismatch {
        Some((index, (a, b))) => Err(AlignmentError::TimestampMismatch {
            index,
            timestamp_a: a.timestamp,
            timestamp_b: b.timestamp,
        }),
        None => Ok(()),
    }
}

/// Z-score of the last value of `window` against the whole window.
///
/// `None` when the window is too short or its deviation is effectively zero.
pub fn rolling_z_score(window: &[f64]) -> Option<f64> {
    let current = *window.last()?;
    if window.len() < 2 {
        return None;
    }

    let data = Data::new(window.to_vec());
    let mean = data.mean()?;
    let std_dev = data.std_dev()?;

    if !std_dev.is_finite() || std_dev <= FLAT_SPREAD_TOLERANCE * mean.abs().max(1.0) {
        return None;
    }

    Some((current - mean) / std_dev)
}

/// Entry and exit thresholds on the absolute z-score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HysteresisBand {
    pub entry_z: f64,
    pub exit_z: f64,
}

impl HysteresisBand {
    pub fn new(entry_z: f64, exit_z: f64) -> Self {
        Self { entry_z, exit_z }
    }

    /// Decision for a z-score given the currently open position, if any.
    ///
    /// Returns the decision and the direction it applies to: the new
    /// position for `Enter`, the open one for `Exit`, and the suppressed
    /// one for `Hold`.
    pub fn evaluate(
        &self,
        open: Option<SpreadDirection>,
        z: f64,
    ) -> Option<(TradeDecision, SpreadDirection)> {
        match open {
            None if z.abs() >= self.entry_z => {
                Some((TradeDecision::Enter, SpreadDirection::from_z_score(z)))
            }
            None => None,
            Some(direction) if z.abs() <= self.exit_z => Some((TradeDecision::Exit, direction)),
            Some(_) if z.abs() >= self.entry_z => {
                Some((TradeDecision::Hold, SpreadDirection::from_z_score(z)))
            }
            Some(_) => None,
        }
    }
}

/// Position state carried across bars while generating signals.
#[derive(Debug, Clone)]
pub struct SignalState {
    band: HysteresisBand,
    open: Option<(Uuid, SpreadDirection)>,
}

/// Outcome of one step of [`SignalState`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateTransition {
    pub trade_id: Uuid,
    pub decision: TradeDecision,
    pub direction: SpreadDirection,
}

impl SignalState {
    pub fn new(band: HysteresisBand) -> Self {
        Self { band, open: None }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Feed the next z-score.
    pub fn step(&mut self, z: f64) -> Option<StateTransition> {
        let open_direction = self.open.map(|(_, direction)| direction);
        let (decision, direction) = self.band.evaluate(open_direction, z)?;

        let trade_id = match (decision, self.open) {
            (TradeDecision::Enter, _) => {
                let id = Uuid::new_v4();
                self.open = Some((id, direction));
                id
            }
            (TradeDecision::Exit, Some((id, _))) => {
                self.open = None;
                id
            }
            _ => Uuid::new_v4(),
        };

        Some(StateTransition {
            trade_id,
            decision,
            direction,
        })
    }

    /// Close whatever is still open at the end of the series.
    pub fn finish(&mut self) -> Option<StateTransition> {
        self.open.take().map(|(trade_id, direction)| StateTransition {
            trade_id,
            decision: TradeDecision::Exit,
            direction,
        })
    }
}

/// Lazy sequence of signals for one pair, in timestamp order.
///
/// Every position it opens is closed: either by an exit signal or by a
/// forced exit at the last bar.
pub struct SpreadSignals<'a> {
    bars_a: &'a [PriceBar],
    bars_b: &'a [PriceBar],
    pair: PairDefinition,
    pair_key: String,
    strategy: String,
    lookback: usize,
    spreads: Vec<f64>,
    state: SignalState,
    index: usize,
    finished: bool,
}

/// Build the signal sequence for one pair.
///
/// Fails when the two windows are not aligned.
pub fn generate_signals<'a>(
    series_a: &'a PriceSeriesWindow,
    series_b: &'a PriceSeriesWindow,
    params: &PairStrategyParameters,
    strategy: &str,
) -> Result<SpreadSignals<'a>, AlignmentError> {
    check_alignment(series_a, series_b)?;

    let pair = params.pair();
    let spreads = series_a
        .bars()
        .iter()
        .zip(series_b.bars())
        .map(|(a, b)| pair.spread(a.close, b.close).to_f64().unwrap_or(f64::NAN))
        .collect();

    Ok(SpreadSignals {
        bars_a: series_a.bars(),
        bars_b: series_b.bars(),
        pair_key: pair.key(),
        pair,
        strategy: strategy.to_string(),
        lookback: params.lookback_period,
        spreads,
        state: SignalState::new(HysteresisBand::new(params.entry_z, params.exit_z)),
        index: 0,
        finished: false,
    })
}

impl SpreadSignals<'_> {
    fn z_score_at(&self, index: usize) -> Option<f64> {
        if index < self.lookback {
            return None;
        }
        let window = &self.spreads[index + 1 - self.lookback..=index];
        if window.iter().any(|s| !s.is_finite()) {
            return None;
        }
        rolling_z_score(window)
    }

    fn signal_at(
        &self,
        index: usize,
        z_score: f64,
        transition: StateTransition,
        exit_reason: Option<ExitReason>,
    ) -> TradeSignal {
        let bar_a = &self.bars_a[index];
        let bar_b = &self.bars_b[index];

        TradeSignal {
            trade_id: transition.trade_id,
            security_id: self.pair_key.clone(),
            symbol: self.pair.symbol_a.clone(),
            decision: transition.decision,
            direction: transition.direction,
            price: self.pair.spread(bar_a.close, bar_b.close),
            unit_cost: self.pair.unit_cost(bar_a.close, bar_b.close),
            z_score,
            quantity: Decimal::ZERO,
            profit_or_loss: Decimal::ZERO,
            strategy: self.strategy.clone(),
            timestamp: bar_a.timestamp,
            exit_reason,
        }
    }
}

impl Iterator for SpreadSignals<'_> {
    type Item = TradeSignal;

    fn next(&mut self) -> Option<TradeSignal> {
        while self.index < self.spreads.len() {
            let index = self.index;
            self.index += 1;

            let Some(z) = self.z_score_at(index) else {
                continue;
            };
            if let Some(transition) = self.state.step(z) {
                let reason = (transition.decision == TradeDecision::Exit).then_some(ExitReason::Signal);
                return Some(self.signal_at(index, z, transition, reason));
            }
        }

        if self.finished {
            return None;
        }
        self.finished = true;

        let last = self.spreads.len().checked_sub(1)?;
        let transition = self.state.finish()?;
        let z = self.z_score_at(last).unwrap_or(0.0);
        Some(self.signal_at(last, z, transition, Some(ExitReason::EndOfSeries)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use pairs_core::types::Interval;

    pub(crate) fn window(symbol: &str, closes: &[f64]) -> PriceSeriesWindow {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                PriceBar::flat(
                    start + Duration::days(i as i64),
                    Decimal::from_f64_retain(*close).unwrap(),
                )
            })
            .collect();
        PriceSeriesWindow::new(symbol, Interval::Day1, bars)
    }

    pub(crate) fn params(lookback: usize) -> PairStrategyParameters {
        PairStrategyParameters {
            lookback_period: lookback,
            entry_z: 1.5,
            exit_z: 0.25,
            symbol_a: "AAA".to_string(),
            symbol_b: "BBB".to_string(),
            hedge_ratio: Decimal::ONE,
        }
    }

    #[test]
    fn test_constant_spread_never_enters() {
        // Both legs move together, so the spread is always 10.
        let a: Vec<f64> = (0..60).map(|i| 110.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let b: Vec<f64> = a.iter().map(|p| p - 10.0).collect();
        let series_a = window("AAA", &a);
        let series_b = window("BBB", &b);

        let signals: Vec<_> = generate_signals(&series_a, &series_b, &params(5), "test")
            .unwrap()
            .collect();
        assert!(signals.iter().all(|s| s.decision != TradeDecision::Enter));
        assert!(signals.is_empty());
    }

    #[test]
    fn test_hysteresis_z_sequence() {
        let mut state = SignalState::new(HysteresisBand::new(2.0, 0.5));
        let zs = [0.0, 2.1, 1.0, 0.4, 2.2];

        let decisions: Vec<(usize, TradeDecision)> = zs
            .iter()
            .enumerate()
            .filter_map(|(i, z)| state.step(*z).map(|t| (i, t.decision)))
            .collect();
        assert_eq!(
            decisions,
            vec![
                (1, TradeDecision::Enter),
                (3, TradeDecision::Exit),
                (4, TradeDecision::Enter),
            ]
        );

        let forced = state.finish().unwrap();
        assert_eq!(forced.decision, TradeDecision::Exit);
        assert!(!state.is_open());
    }

    #[test]
    fn test_exit_reuses_entry_trade_id() {
        let mut state = SignalState::new(HysteresisBand::new(2.0, 0.5));
        let enter = state.step(-2.5).unwrap();
        assert_eq!(enter.direction, SpreadDirection::Long);

        let hold = state.step(3.0).unwrap();
        assert_eq!(hold.decision, TradeDecision::Hold);
        assert_ne!(hold.trade_id, enter.trade_id);

        let exit = state.step(0.1).unwrap();
        assert_eq!(exit.trade_id, enter.trade_id);
        assert_eq!(exit.direction, SpreadDirection::Long);
    }

    #[test]
    fn test_band_ignores_middle_zone() {
        let band = HysteresisBand::new(2.0, 0.5);
        assert_eq!(band.evaluate(None, 1.0), None);
        assert_eq!(band.evaluate(Some(SpreadDirection::Short), 1.0), None);
        assert_eq!(
            band.evaluate(None, 2.0),
            Some((TradeDecision::Enter, SpreadDirection::Short))
        );
        assert_eq!(
            band.evaluate(Some(SpreadDirection::Short), 0.5),
            Some((TradeDecision::Exit, SpreadDirection::Short))
        );
    }

    #[test]
    fn test_insufficient_history_yields_nothing() {
        let series_a = window("AAA", &[100.0, 101.0, 99.0, 130.0]);
        let series_b = window("BBB", &[100.0, 100.0, 100.0, 100.0]);

        let signals: Vec<_> = generate_signals(&series_a, &series_b, &params(4), "test")
            .unwrap()
            .collect();
        assert!(signals.is_empty());
    }

    #[test]
    fn test_spike_opens_short_position() {
        let a = [100.0, 101.0, 99.0, 100.0, 101.0, 99.0, 120.0, 100.5, 100.0];
        let b = [100.0; 9];
        let series_a = window("AAA", &a);
        let series_b = window("BBB", &b);

        let signals: Vec<_> = generate_signals(&series_a, &series_b, &params(5), "pairs")
            .unwrap()
            .collect();

        assert_eq!(signals[0].decision, TradeDecision::Enter);
        assert_eq!(signals[0].direction, SpreadDirection::Short);
        assert_eq!(signals[0].timestamp, series_a.timestamp(6).unwrap());
        assert_eq!(signals[0].price, Decimal::new(20, 0));
        assert_eq!(signals[0].unit_cost, Decimal::new(220, 0));
        assert_eq!(signals[0].security_id, "AAA/BBB");

        let last = signals.last().unwrap();
        assert_eq!(last.decision, TradeDecision::Exit);
        assert_eq!(last.trade_id, signals[0].trade_id);
        for pair in signals.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn test_open_position_forced_closed_at_last_bar() {
        let a = [100.0, 101.0, 99.0, 100.0, 101.0, 99.0, 120.0, 125.0];
        let b = [100.0; 8];
        let series_a = window("AAA", &a);
        let series_b = window("BBB", &b);

        let signals: Vec<_> = generate_signals(&series_a, &series_b, &params(5), "pairs")
            .unwrap()
            .collect();

        let last = signals.last().unwrap();
        assert_eq!(last.decision, TradeDecision::Exit);
        assert_eq!(last.exit_reason, Some(ExitReason::EndOfSeries));
        assert_eq!(last.timestamp, series_a.timestamp(7).unwrap());
        assert_eq!(last.price, Decimal::new(25, 0));
    }

    #[test]
    fn test_misaligned_series_rejected() {
        let series_a = window("AAA", &[1.0, 2.0, 3.0]);
        let series_b = window("BBB", &[1.0, 2.0]);
        assert!(matches!(
            generate_signals(&series_a, &series_b, &params(2), "pairs").err(),
            Some(AlignmentError::LengthMismatch { len_a: 3, len_b: 2, .. })
        ));

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let shifted = PriceSeriesWindow::new(
            "BBB",
            Interval::Day1,
            (0..3)
                .map(|i| PriceBar::flat(start + Duration::hours(i * 25), Decimal::ONE))
                .collect(),
        );
        assert!(matches!(
            check_alignment(&series_a, &shifted),
            Err(AlignmentError::TimestampMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_rolling_z_score() {
        assert_eq!(rolling_z_score(&[5.0]), None);
        assert_eq!(rolling_z_score(&[5.0, 5.0, 5.0]), None);
        // mean 2, sample std 1
        let z = rolling_z_score(&[1.0, 2.0, 3.0]).unwrap();
        assert!((z - 1.0).abs() < 1e-12);
    }
}

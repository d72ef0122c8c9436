//! Integration tests for component interactions.
//!
//! These tests verify that the major components work together correctly.

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use backtester::{
    BacktestOrchestrator, BacktestRepository, BacktestService, InMemoryBacktestRepository,
    InMemoryPriceSource, PairsBacktestConfiguration, PerformanceAggregator, RunStatus,
    TracingStatusSink,
};
use pairs_core::types::{ExitReason, Interval, PairDefinition, PriceBar, TradeDecision};

/// Mean-reverting series: `base + amplitude * sin(2*pi*t/period)` plus a
/// deterministic wobble so the rolling deviation never collapses.
fn wave(days: usize, base: f64, amplitude: f64, period: f64, phase: f64) -> Vec<PriceBar> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..days)
        .map(|i| {
            let t = i as f64;
            let value = base
                + amplitude * (2.0 * std::f64::consts::PI * t / period + phase).sin()
                + 0.3 * ((i * 7919) % 13) as f64 / 13.0;
            let close = Decimal::try_from(value).unwrap().round_dp(4);
            PriceBar::flat(start + Duration::days(i as i64), close)
        })
        .collect()
}

fn price_source() -> InMemoryPriceSource {
    InMemoryPriceSource::new()
        .with_series("GLD", Interval::Day1, wave(150, 180.0, 6.0, 23.0, 0.0))
        .with_series("IAU", Interval::Day1, wave(150, 180.0, 1.0, 37.0, 1.0))
        .with_series("EWA", Interval::Day1, wave(150, 24.0, 1.5, 17.0, 0.5))
        .with_series("EWC", Interval::Day1, wave(150, 33.0, 0.4, 29.0, 2.0))
}

fn configuration() -> PairsBacktestConfiguration {
    PairsBacktestConfiguration {
        strategy_name: "pairs_trading".to_string(),
        strategy_parameters: serde_json::json!({
            "lookbackPeriod": 10,
            "entryZ": 1.2,
            "exitZ": 0.3
        }),
        pairs_to_test: vec![
            PairDefinition::new("GLD", "IAU", Decimal::ONE),
            PairDefinition::new("EWA", "EWC", Decimal::new(7, 1)),
        ],
        interval: Interval::Day1,
        start_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        end_date: Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap(),
        initial_capital: Decimal::new(50_000, 0),
        max_parallelism: Some(2),
    }
}

/// Full run through the service: every trade closed, metrics stored once,
/// and stored trades reproduce the run totals.
#[tokio::test]
async fn test_service_run_end_to_end() {
    let repository = Arc::new(InMemoryBacktestRepository::new());
    let service = BacktestService::new(
        BacktestOrchestrator::new(Arc::new(price_source())),
        repository.clone(),
        Arc::new(TracingStatusSink),
    );

    let run_id = Uuid::new_v4();
    let result = service
        .run_backtest_async(&configuration(), run_id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.pair_results.len(), 2);
    assert!(result.failed_pairs.is_empty());
    assert!(result.trades().count() > 0);

    for pair in &result.pair_results {
        assert_eq!(pair.starting_capital, Decimal::new(25_000, 0));
        assert_eq!(pair.final_capital, pair.starting_capital + pair.total_pnl());

        // Every entry has a matching exit.
        let entries = pair.signals.iter().filter(|s| s.decision == TradeDecision::Enter).count();
        let exits = pair.signals.iter().filter(|s| s.decision == TradeDecision::Exit).count();
        assert_eq!(entries, exits);
        assert_eq!(entries, pair.trades.len());

        // Trades never overlap.
        for window in pair.trades.windows(2) {
            assert!(window[0].exit_time <= window[1].entry_time);
        }
    }

    // Forced closes only happen on the last bar.
    let last_bar = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(149);
    for trade in result.trades().filter(|t| t.exit_reason == ExitReason::EndOfSeries) {
        assert_eq!(trade.exit_time, last_bar);
    }

    assert_eq!(repository.metric_writes(), 1);
    assert_eq!(repository.run_status(run_id), Some(RunStatus::Completed));

    let stored = repository.load_backtest_trades(run_id).await.unwrap();
    let reloaded = PerformanceAggregator::aggregate_run(result.initial_capital, &stored);
    assert_eq!(reloaded, result.totals);
    assert_eq!(
        result.totals.final_equity,
        result.initial_capital + result.totals.total_pnl
    );
}

/// The same configuration gives identical totals regardless of parallelism.
#[tokio::test]
async fn test_parallelism_does_not_change_results() {
    let orchestrator = BacktestOrchestrator::new(Arc::new(price_source()));

    let mut serial = configuration();
    serial.max_parallelism = Some(1);
    let mut parallel = configuration();
    parallel.max_parallelism = Some(4);

    let a = orchestrator
        .run(&serial, Uuid::new_v4(), CancellationToken::new())
        .await
        .unwrap();
    let b = orchestrator
        .run(&parallel, Uuid::new_v4(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(a.totals, b.totals);
    for (x, y) in a.pair_results.iter().zip(&b.pair_results) {
        assert_eq!(x.pair, y.pair);
        assert_eq!(x.metrics, y.metrics);
        assert_eq!(x.final_capital, y.final_capital);
    }
}

/// A pair with a missing leg is reported without stopping the others.
#[tokio::test]
async fn test_missing_leg_yields_partial_run() {
    let repository = Arc::new(InMemoryBacktestRepository::new());
    let service = BacktestService::new(
        BacktestOrchestrator::new(Arc::new(price_source())),
        repository.clone(),
        Arc::new(TracingStatusSink),
    );

    let mut config = configuration();
    config
        .pairs_to_test
        .insert(0, PairDefinition::new("SLV", "GLD", Decimal::new(5, 2)));

    let run_id = Uuid::new_v4();
    let result = service
        .run_backtest_async(&config, run_id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Partial);
    assert_eq!(result.failed_pairs.len(), 1);
    assert_eq!(result.failed_pairs[0].pair.key(), "SLV/GLD");
    assert_eq!(result.pair_results.len(), 2);
    assert_eq!(repository.run_status(run_id), Some(RunStatus::Partial));
}

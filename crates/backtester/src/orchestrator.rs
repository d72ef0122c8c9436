//! Fan-out of one backtest run across its pairs.
//!
//! Each pair is an independent unit: fetch both legs, generate signals,
//! simulate, aggregate. Units run on a bounded pool (a semaphore sized by
//! `max_parallelism`) and are merged by configuration index, so the result
//! does not depend on which unit finished first.

use chrono::Utc;
use futures_util::FutureExt;
use pairs_core::types::{PairDefinition, PriceSeriesWindow};
use rust_decimal::Decimal;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{PairsBacktestConfiguration, ValidatedConfiguration};
use crate::data_store::{PriceDataSource, WindowCache};
use crate::error::{BacktestError, PairError};
use crate::performance::PerformanceAggregator;
use crate::result::{BacktestResult, PairFailure, PairResult, RunStatus};
use crate::signals::generate_signals;
use crate::simulator::TradeSimulator;
use crate::sizing::PositionSizer;
use crate::status::{notify, StatusSink, StatusUpdate};
use crate::strategy::StrategyKind;

type UnitOutcome = Result<PairResult, PairError>;

/// Runs backtests over a price source.
#[derive(Clone)]
pub struct BacktestOrchestrator {
    prices: Arc<dyn PriceDataSource>,
    status: Option<Arc<dyn StatusSink>>,
}

impl BacktestOrchestrator {
    pub fn new(prices: Arc<dyn PriceDataSource>) -> Self {
        Self {
            prices,
            status: None,
        }
    }

    /// Report per-pair progress to `sink`.
    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status = Some(sink);
        self
    }

    /// Run every configured pair and merge the results.
    ///
    /// Pair failures end up in `failed_pairs`. Configuration errors are
    /// reported before any unit starts. When `cancel` fires, in-flight units
    /// are abandoned and the run reports [`BacktestError::Cancelled`].
    pub async fn run(
        &self,
        config: &PairsBacktestConfiguration,
        run_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<BacktestResult, BacktestError> {
        let validated = config.validate()?;
        let started_at = Utc::now();
        let pair_count = config.pairs_to_test.len();

        info!(
            run_id = %run_id,
            strategy = validated.strategy.name(),
            pairs = pair_count,
            max_parallelism = validated.max_parallelism,
            interval = %config.interval,
            "Starting backtest run"
        );

        let cache = Arc::new(WindowCache::new(
            Arc::clone(&self.prices),
            config.interval,
            config.start_date,
            config.end_date,
        ));
        let semaphore = Arc::new(Semaphore::new(validated.max_parallelism));
        let validated = Arc::new(validated);
        let capital = validated.capital_per_pair();

        let mut units = JoinSet::new();
        for (index, pair) in config.pairs_to_test.iter().cloned().enumerate() {
            let cache = Arc::clone(&cache);
            let semaphore = Arc::clone(&semaphore);
            let validated = Arc::clone(&validated);
            let cancel = cancel.clone();
            let status = self.status.clone();

            units.spawn(async move {
                let unit = run_unit(pair.clone(), cache, semaphore, validated, capital, run_id, status);
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(PairError::Cancelled),
                    outcome = AssertUnwindSafe(unit).catch_unwind() => {
                        outcome.unwrap_or_else(|panic| Err(PairError::Panicked(panic_message(panic))))
                    }
                };
                (index, pair, outcome)
            });
        }

        let mut outcomes: Vec<Option<(PairDefinition, UnitOutcome)>> = vec![None; pair_count];
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok((index, pair, outcome)) => outcomes[index] = Some((pair, outcome)),
                Err(e) => error!(run_id = %run_id, error = %e, "Pair unit aborted"),
            }
        }

        if cancel.is_cancelled() {
            warn!(run_id = %run_id, "Backtest run cancelled");
            return Err(BacktestError::Cancelled { run_id });
        }

        let mut pair_results = Vec::new();
        let mut failed_pairs = Vec::new();
        for (index, slot) in outcomes.into_iter().enumerate() {
            match slot {
                Some((_, Ok(result))) => pair_results.push(result),
                Some((pair, Err(error))) => {
                    warn!(run_id = %run_id, pair = %pair, error = %error, "Pair unit failed");
                    failed_pairs.push(PairFailure { pair, error });
                }
                None => failed_pairs.push(PairFailure {
                    pair: config.pairs_to_test[index].clone(),
                    error: PairError::Panicked("unit did not report a result".to_string()),
                }),
            }
        }

        let totals = PerformanceAggregator::aggregate_run(
            config.initial_capital,
            pair_results.iter().flat_map(|r| r.trades.iter()),
        );

        let status = if failed_pairs.is_empty() {
            RunStatus::Completed
        } else if pair_results.is_empty() {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        };

        info!(
            run_id = %run_id,
            status = %status,
            succeeded = pair_results.len(),
            failed = failed_pairs.len(),
            trades = totals.metrics.total_trades,
            total_pnl = %totals.total_pnl,
            "Backtest run finished"
        );

        Ok(BacktestResult {
            run_id,
            strategy_name: validated.strategy.name().to_string(),
            status,
            initial_capital: config.initial_capital,
            pair_results,
            failed_pairs,
            totals,
            started_at,
            completed_at: Utc::now(),
        })
    }
}

async fn run_unit(
    pair: PairDefinition,
    cache: Arc<WindowCache>,
    semaphore: Arc<Semaphore>,
    validated: Arc<ValidatedConfiguration>,
    capital: Decimal,
    run_id: Uuid,
    status: Option<Arc<dyn StatusSink>>,
) -> Result<PairResult, PairError> {
    let _permit = semaphore
        .acquire_owned()
        .await
        .map_err(|_| PairError::Cancelled)?;

    debug!(run_id = %run_id, pair = %pair, "Pair unit started");

    let series_a = cache.get(&pair.symbol_a).await?;
    let series_b = cache.get(&pair.symbol_b).await?;

    let strategy = validated.strategy.clone();
    let unit_pair = pair.clone();
    let result = tokio::task::spawn_blocking(move || {
        simulate_pair(&unit_pair, &series_a, &series_b, &strategy, capital)
    })
    .await
    .map_err(|e| PairError::Panicked(e.to_string()))??;

    if let Some(sink) = status {
        let update = StatusUpdate::new(
            run_id,
            format!("Pair {} finished with {} trades", pair.key(), result.trades.len()),
        )
        .symbol(pair.symbol_a.clone())
        .interval(validated.config.interval);
        notify(sink.as_ref(), update).await;
    }

    Ok(result)
}

/// Signals, simulation, and aggregation for one pair.
pub fn simulate_pair(
    pair: &PairDefinition,
    series_a: &PriceSeriesWindow,
    series_b: &PriceSeriesWindow,
    strategy: &StrategyKind,
    capital: Decimal,
) -> Result<PairResult, PairError> {
    let StrategyKind::PairsMeanReversion(config) = strategy;
    let params = config.for_pair(pair);
    let sizer = PositionSizer::new(config.sizing.clone());

    let signals = generate_signals(series_a, series_b, &params, strategy.name())?;
    let outcome = TradeSimulator::new(pair.clone()).simulate(signals, capital, &sizer);

    Ok(PairResult {
        pair: pair.clone(),
        metrics: PerformanceAggregator::aggregate(&outcome.trades),
        statistics: PerformanceAggregator::statistics(&outcome.trades),
        trades: outcome.trades,
        signals: outcome.executed_signals,
        starting_capital: capital,
        final_capital: outcome.final_capital,
    })
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

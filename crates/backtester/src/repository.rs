//! Persistence boundary for backtest runs.
//!
//! Writes are upserts keyed by run identifier, so handing the same run to
//! the repository twice never duplicates rows.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pairs_core::types::{ExitReason, PairDefinition, SpreadDirection, TradeSummary};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::PairsBacktestConfiguration;
use crate::result::{BacktestResult, RunStatus, RunSummary};

/// Storage for run configurations, trades, metrics, and run status.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BacktestRepository: Send + Sync {
    /// Upsert closed trades under `(run_id, pair, entry_time)`.
    async fn save_backtest_trades(&self, run_id: Uuid, trades: &[TradeSummary]) -> Result<usize>;

    /// Upsert the run summary under `run_id`.
    async fn update_performance_metrics(
        &self,
        run_id: Uuid,
        result: &BacktestResult,
        initial_capital: Decimal,
    ) -> Result<()>;

    /// Store a finished run's trades and summary together: either both are
    /// written or neither is. Returns the number of trades.
    async fn save_backtest_result(&self, result: &BacktestResult) -> Result<usize>;

    async fn record_run_status(&self, run_id: Uuid, status: RunStatus, message: Option<String>) -> Result<()>;

    async fn save_run_configuration(&self, run_id: Uuid, config: &PairsBacktestConfiguration) -> Result<()>;

    async fn load_run_configuration(&self, run_id: Uuid) -> Result<Option<PairsBacktestConfiguration>>;

    async fn load_backtest_trades(&self, run_id: Uuid) -> Result<Vec<TradeSummary>>;
}

/// PostgreSQL-backed repository.
pub struct PgBacktestRepository {
    pool: PgPool,
}

impl PgBacktestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row for a persisted trade.
#[derive(Debug, sqlx::FromRow)]
struct TradeRow {
    id: Uuid,
    symbol_a: String,
    symbol_b: String,
    hedge_ratio: Decimal,
    direction: String,
    entry_time: DateTime<Utc>,
    exit_time: DateTime<Utc>,
    entry_price: Decimal,
    exit_price: Decimal,
    entry_z: f64,
    exit_z: f64,
    quantity: Decimal,
    size_fraction: f64,
    capital_committed: Decimal,
    realized_pnl: Decimal,
    return_pct: f64,
    exit_reason: String,
}

impl TradeRow {
    fn into_trade(self) -> Result<TradeSummary> {
        Ok(TradeSummary {
            id: self.id,
            pair: PairDefinition::new(self.symbol_a, self.symbol_b, self.hedge_ratio),
            direction: parse_direction(&self.direction)?,
            entry_time: self.entry_time,
            exit_time: self.exit_time,
            entry_price: self.entry_price,
            exit_price: self.exit_price,
            entry_z: self.entry_z,
            exit_z: self.exit_z,
            quantity: self.quantity,
            size_fraction: self.size_fraction,
            capital_committed: self.capital_committed,
            realized_pnl: self.realized_pnl,
            return_pct: self.return_pct,
            exit_reason: parse_exit_reason(&self.exit_reason)?,
        })
    }
}

fn parse_direction(direction: &str) -> Result<SpreadDirection> {
    match direction {
        "long" => Ok(SpreadDirection::Long),
        "short" => Ok(SpreadDirection::Short),
        other => Err(anyhow!("unknown spread direction: {}", other)),
    }
}

fn parse_exit_reason(reason: &str) -> Result<ExitReason> {
    match reason {
        "signal" => Ok(ExitReason::Signal),
        "end_of_series" => Ok(ExitReason::EndOfSeries),
        other => Err(anyhow!("unknown exit reason: {}", other)),
    }
}

/// Counts are stored as BIGINT.
fn count_column(count: usize) -> Result<i64> {
    i64::try_from(count).with_context(|| format!("count {} does not fit a BIGINT column", count))
}

async fn insert_trades(conn: &mut PgConnection, run_id: Uuid, trades: &[TradeSummary]) -> Result<()> {
    for trade in trades {
        sqlx::query(
            r#"
            INSERT INTO backtest_trades (
                run_id, pair_key, entry_time, id, symbol_a, symbol_b, hedge_ratio,
                direction, exit_time, entry_price, exit_price, entry_z, exit_z,
                quantity, size_fraction, capital_committed, realized_pnl,
                return_pct, exit_reason
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (run_id, pair_key, entry_time) DO UPDATE SET
                id = EXCLUDED.id,
                hedge_ratio = EXCLUDED.hedge_ratio,
                direction = EXCLUDED.direction,
                exit_time = EXCLUDED.exit_time,
                entry_price = EXCLUDED.entry_price,
                exit_price = EXCLUDED.exit_price,
                entry_z = EXCLUDED.entry_z,
                exit_z = EXCLUDED.exit_z,
                quantity = EXCLUDED.quantity,
                size_fraction = EXCLUDED.size_fraction,
                capital_committed = EXCLUDED.capital_committed,
                realized_pnl = EXCLUDED.realized_pnl,
                return_pct = EXCLUDED.return_pct,
                exit_reason = EXCLUDED.exit_reason
            "#,
        )
        .bind(run_id)
        .bind(trade.pair.key())
        .bind(trade.entry_time)
        .bind(trade.id)
        .bind(&trade.pair.symbol_a)
        .bind(&trade.pair.symbol_b)
        .bind(trade.pair.hedge_ratio)
        .bind(trade.direction.as_str())
        .bind(trade.exit_time)
        .bind(trade.entry_price)
        .bind(trade.exit_price)
        .bind(trade.entry_z)
        .bind(trade.exit_z)
        .bind(trade.quantity)
        .bind(trade.size_fraction)
        .bind(trade.capital_committed)
        .bind(trade.realized_pnl)
        .bind(trade.return_pct)
        .bind(trade.exit_reason.as_str())
        .execute(&mut *conn)
        .await
        .with_context(|| format!("saving trade {} of run {}", trade.id, run_id))?;
    }
    Ok(())
}

async fn upsert_metrics(conn: &mut PgConnection, run_id: Uuid, summary: &RunSummary) -> Result<()> {
    let metrics = &summary.metrics;
    let stats = &summary.statistics;

    sqlx::query(
        r#"
        INSERT INTO backtest_metrics (
            run_id, strategy_name, status, initial_capital, final_equity, total_pnl,
            total_return, max_drawdown, max_drawdown_pct, win_rate, payoff_ratio,
            kelly_fraction, kelly_half_fraction, total_trades, winning_trades,
            losing_trades, average_win, average_loss, profit_factor, expectancy,
            pair_metrics, failed_pairs, equity_curve, completed_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
        ON CONFLICT (run_id) DO UPDATE SET
            strategy_name = EXCLUDED.strategy_name,
            status = EXCLUDED.status,
            initial_capital = EXCLUDED.initial_capital,
            final_equity = EXCLUDED.final_equity,
            total_pnl = EXCLUDED.total_pnl,
            total_return = EXCLUDED.total_return,
            max_drawdown = EXCLUDED.max_drawdown,
            max_drawdown_pct = EXCLUDED.max_drawdown_pct,
            win_rate = EXCLUDED.win_rate,
            payoff_ratio = EXCLUDED.payoff_ratio,
            kelly_fraction = EXCLUDED.kelly_fraction,
            kelly_half_fraction = EXCLUDED.kelly_half_fraction,
            total_trades = EXCLUDED.total_trades,
            winning_trades = EXCLUDED.winning_trades,
            losing_trades = EXCLUDED.losing_trades,
            average_win = EXCLUDED.average_win,
            average_loss = EXCLUDED.average_loss,
            profit_factor = EXCLUDED.profit_factor,
            expectancy = EXCLUDED.expectancy,
            pair_metrics = EXCLUDED.pair_metrics,
            failed_pairs = EXCLUDED.failed_pairs,
            equity_curve = EXCLUDED.equity_curve,
            completed_at = EXCLUDED.completed_at,
            updated_at = NOW()
        "#,
    )
    .bind(run_id)
    .bind(&summary.strategy_name)
    .bind(summary.status.as_str())
    .bind(summary.initial_capital)
    .bind(summary.final_equity)
    .bind(summary.total_pnl)
    .bind(summary.total_return)
    .bind(summary.max_drawdown)
    .bind(summary.max_drawdown_pct)
    .bind(metrics.win_rate)
    .bind(metrics.payoff_ratio)
    .bind(metrics.kelly_fraction)
    .bind(metrics.kelly_half_fraction)
    .bind(count_column(metrics.total_trades)?)
    .bind(count_column(metrics.winning_trades)?)
    .bind(count_column(metrics.losing_trades)?)
    .bind(metrics.average_win)
    .bind(metrics.average_loss)
    .bind(stats.profit_factor)
    .bind(stats.expectancy)
    .bind(serde_json::to_value(&summary.pairs)?)
    .bind(serde_json::to_value(&summary.failed_pairs)?)
    .bind(serde_json::to_value(&summary.equity_curve)?)
    .bind(summary.completed_at)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("updating metrics of run {}", run_id))?;
    Ok(())
}

#[async_trait]
impl BacktestRepository for PgBacktestRepository {
    async fn save_backtest_trades(&self, run_id: Uuid, trades: &[TradeSummary]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        insert_trades(&mut tx, run_id, trades).await?;
        tx.commit().await?;

        debug!(run_id = %run_id, count = trades.len(), "Saved backtest trades");
        Ok(trades.len())
    }

    async fn update_performance_metrics(
        &self,
        run_id: Uuid,
        result: &BacktestResult,
        initial_capital: Decimal,
    ) -> Result<()> {
        let summary = RunSummary::from_result(result, initial_capital);
        let mut conn = self.pool.acquire().await?;
        upsert_metrics(&mut conn, run_id, &summary).await?;

        info!(run_id = %run_id, status = %summary.status, "Stored backtest metrics");
        Ok(())
    }

    async fn save_backtest_result(&self, result: &BacktestResult) -> Result<usize> {
        let trades: Vec<TradeSummary> = result.trades().cloned().collect();
        let summary = RunSummary::from_result(result, result.initial_capital);

        let mut tx = self.pool.begin().await?;
        insert_trades(&mut tx, result.run_id, &trades).await?;
        upsert_metrics(&mut tx, result.run_id, &summary).await?;
        tx.commit().await?;

        info!(
            run_id = %result.run_id,
            trades = trades.len(),
            status = %summary.status,
            "Stored backtest result"
        );
        Ok(trades.len())
    }

    async fn record_run_status(&self, run_id: Uuid, status: RunStatus, message: Option<String>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backtest_runs (run_id, status, message)
            VALUES ($1, $2, $3)
            ON CONFLICT (run_id) DO UPDATE SET
                status = EXCLUDED.status,
                message = EXCLUDED.message,
                updated_at = NOW()
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_run_configuration(&self, run_id: Uuid, config: &PairsBacktestConfiguration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backtest_runs (run_id, strategy_name, configuration, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (run_id) DO UPDATE SET
                strategy_name = EXCLUDED.strategy_name,
                configuration = EXCLUDED.configuration,
                updated_at = NOW()
            "#,
        )
        .bind(run_id)
        .bind(&config.strategy_name)
        .bind(serde_json::to_value(config)?)
        .bind(RunStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_run_configuration(&self, run_id: Uuid) -> Result<Option<PairsBacktestConfiguration>> {
        let row: Option<(Option<serde_json::Value>,)> =
            sqlx::query_as("SELECT configuration FROM backtest_runs WHERE run_id = $1")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;

        match row.and_then(|(config,)| config) {
            Some(value) => {
                let config = serde_json::from_value(value)
                    .with_context(|| format!("decoding configuration of run {}", run_id))?;
                Ok(Some(config))
            }
            None => Ok(None),
        }
    }

    async fn load_backtest_trades(&self, run_id: Uuid) -> Result<Vec<TradeSummary>> {
        let rows: Vec<TradeRow> = sqlx::query_as(
            r#"
            SELECT id, symbol_a, symbol_b, hedge_ratio, direction, entry_time, exit_time,
                   entry_price, exit_price, entry_z, exit_z, quantity, size_fraction,
                   capital_committed, realized_pnl, return_pct, exit_reason
            FROM backtest_trades
            WHERE run_id = $1
            ORDER BY pair_key, entry_time
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TradeRow::into_trade).collect()
    }
}

#[derive(Debug, Clone)]
struct RunRecord {
    configuration: Option<PairsBacktestConfiguration>,
    status: Option<RunStatus>,
    message: Option<String>,
}

/// In-memory repository with the same upsert semantics.
#[derive(Default)]
pub struct InMemoryBacktestRepository {
    runs: DashMap<Uuid, RunRecord>,
    trades: DashMap<Uuid, BTreeMap<(String, DateTime<Utc>), TradeSummary>>,
    metrics: DashMap<Uuid, RunSummary>,
    metric_writes: AtomicUsize,
    reject_metrics: AtomicBool,
}

impl InMemoryBacktestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times run metrics were written.
    pub fn metric_writes(&self) -> usize {
        self.metric_writes.load(Ordering::SeqCst)
    }

    /// Make every later metrics write fail, as an unavailable database would.
    pub fn reject_metric_writes(&self) {
        self.reject_metrics.store(true, Ordering::SeqCst);
    }

    fn check_metrics_writable(&self, run_id: Uuid) -> Result<()> {
        if self.reject_metrics.load(Ordering::SeqCst) {
            return Err(anyhow!("metrics store unavailable for run {}", run_id));
        }
        Ok(())
    }

    fn store_trades(&self, run_id: Uuid, trades: &[TradeSummary]) {
        let mut stored = self.trades.entry(run_id).or_default();
        for trade in trades {
            stored.insert((trade.pair.key(), trade.entry_time), trade.clone());
        }
    }

    fn store_metrics(&self, run_id: Uuid, summary: RunSummary) {
        self.metrics.insert(run_id, summary);
        self.metric_writes.fetch_add(1, Ordering::SeqCst);
    }

    pub fn run_status(&self, run_id: Uuid) -> Option<RunStatus> {
        self.runs.get(&run_id).and_then(|r| r.status)
    }

    pub fn run_message(&self, run_id: Uuid) -> Option<String> {
        self.runs.get(&run_id).and_then(|r| r.message.clone())
    }

    pub fn run_summary(&self, run_id: Uuid) -> Option<RunSummary> {
        self.metrics.get(&run_id).map(|m| m.clone())
    }

    pub fn trade_count(&self, run_id: Uuid) -> usize {
        self.trades.get(&run_id).map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait]
impl BacktestRepository for InMemoryBacktestRepository {
    async fn save_backtest_trades(&self, run_id: Uuid, trades: &[TradeSummary]) -> Result<usize> {
        self.store_trades(run_id, trades);
        Ok(trades.len())
    }

    async fn update_performance_metrics(
        &self,
        run_id: Uuid,
        result: &BacktestResult,
        initial_capital: Decimal,
    ) -> Result<()> {
        self.check_metrics_writable(run_id)?;
        self.store_metrics(run_id, RunSummary::from_result(result, initial_capital));
        Ok(())
    }

    async fn save_backtest_result(&self, result: &BacktestResult) -> Result<usize> {
        self.check_metrics_writable(result.run_id)?;
        let trades: Vec<TradeSummary> = result.trades().cloned().collect();
        self.store_trades(result.run_id, &trades);
        self.store_metrics(
            result.run_id,
            RunSummary::from_result(result, result.initial_capital),
        );
        Ok(trades.len())
    }

    async fn record_run_status(&self, run_id: Uuid, status: RunStatus, message: Option<String>) -> Result<()> {
        let mut run = self.runs.entry(run_id).or_insert_with(|| RunRecord {
            configuration: None,
            status: None,
            message: None,
        });
        run.status = Some(status);
        run.message = message;
        Ok(())
    }

    async fn save_run_configuration(&self, run_id: Uuid, config: &PairsBacktestConfiguration) -> Result<()> {
        let mut run = self.runs.entry(run_id).or_insert_with(|| RunRecord {
            configuration: None,
            status: Some(RunStatus::Running),
            message: None,
        });
        run.configuration = Some(config.clone());
        Ok(())
    }

    async fn load_run_configuration(&self, run_id: Uuid) -> Result<Option<PairsBacktestConfiguration>> {
        Ok(self.runs.get(&run_id).and_then(|r| r.configuration.clone()))
    }

    async fn load_backtest_trades(&self, run_id: Uuid) -> Result<Vec<TradeSummary>> {
        Ok(self
            .trades
            .get(&run_id)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }
}

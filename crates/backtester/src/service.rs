//! Run trigger: refresh data, run, persist, record status.

use pairs_core::api::ConductorClient;
use pairs_core::types::Interval;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PairsBacktestConfiguration;
use crate::error::{BacktestError, ConfigurationError};
use crate::orchestrator::BacktestOrchestrator;
use crate::repository::BacktestRepository;
use crate::result::{BacktestResult, RunStatus};
use crate::status::{notify, StatusSink, StatusUpdate};

/// Counts from a conductor refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Ask the conductor to refresh every symbol. Failures are logged and
/// counted, never returned.
pub async fn refresh_price_data(
    conductor: &dyn ConductorClient,
    symbols: &[String],
    interval: Interval,
    status: &dyn StatusSink,
    run_id: Uuid,
) -> RefreshReport {
    let mut report = RefreshReport::default();

    let known: Option<HashSet<String>> = match conductor.get_securities().await {
        Ok(securities) => Some(securities.into_iter().collect()),
        Err(e) => {
            warn!(error = %e, "Could not list conductor securities, refreshing all symbols");
            None
        }
    };

    for symbol in symbols {
        if known.as_ref().is_some_and(|k| !k.contains(symbol)) {
            debug!(symbol, "Symbol unknown to conductor, using cached data");
            report.skipped += 1;
            continue;
        }

        match conductor.update_historical_prices(symbol, interval).await {
            Ok(true) => {
                report.refreshed += 1;
                let update = StatusUpdate::new(run_id, "Historical prices refreshed")
                    .symbol(symbol.clone())
                    .interval(interval);
                notify(status, update).await;
            }
            Ok(false) => {
                warn!(symbol, interval = %interval, "Conductor did not refresh prices");
                report.failed += 1;
            }
            Err(e) => {
                warn!(symbol, interval = %interval, error = %e, "Price refresh failed");
                report.failed += 1;
            }
        }
    }

    info!(
        refreshed = report.refreshed,
        skipped = report.skipped,
        failed = report.failed,
        "Price refresh finished"
    );
    report
}

/// Entry point invoked by the scheduler.
pub struct BacktestService {
    orchestrator: BacktestOrchestrator,
    repository: Arc<dyn BacktestRepository>,
    status: Arc<dyn StatusSink>,
    conductor: Option<Arc<dyn ConductorClient>>,
    refresh_data: bool,
    parallelism_override: Option<usize>,
}

impl BacktestService {
    pub fn new(
        orchestrator: BacktestOrchestrator,
        repository: Arc<dyn BacktestRepository>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            orchestrator,
            repository,
            status,
            conductor: None,
            refresh_data: false,
            parallelism_override: None,
        }
    }

    /// Refresh price history through `conductor` before each run.
    pub fn with_conductor(mut self, conductor: Arc<dyn ConductorClient>) -> Self {
        self.conductor = Some(conductor);
        self.refresh_data = true;
        self
    }

    pub fn refresh_data(mut self, enabled: bool) -> Self {
        self.refresh_data = enabled;
        self
    }

    /// Replace the worker-pool size of every run.
    pub fn with_parallelism_override(mut self, max_parallelism: Option<usize>) -> Self {
        self.parallelism_override = max_parallelism;
        self
    }

    /// Run a stored configuration by run identifier.
    pub async fn run_stored(&self, run_id: Uuid, cancel: CancellationToken) -> Result<BacktestResult, BacktestError> {
        let config = self
            .repository
            .load_run_configuration(run_id)
            .await
            .map_err(|source| BacktestError::Persistence { run_id, source })?
            .ok_or_else(|| {
                ConfigurationError::Load(format!("no configuration stored for run {}", run_id))
            })?;

        self.run_backtest_async(&config, run_id, cancel).await
    }

    /// Run a backtest and record its outcome.
    ///
    /// Returns once the outcome is recorded: the result and a terminal
    /// status for a finished run, or only a `cancelled`/`failed` status
    /// otherwise. A cancelled run persists no trades or metrics.
    pub async fn run_backtest_async(
        &self,
        config: &PairsBacktestConfiguration,
        run_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<BacktestResult, BacktestError> {
        self.repository
            .record_run_status(run_id, RunStatus::Running, None)
            .await
            .map_err(|source| BacktestError::Persistence { run_id, source })?;
        notify(self.status.as_ref(), StatusUpdate::new(run_id, "Backtest started")).await;

        if self.refresh_data {
            if let Some(conductor) = &self.conductor {
                refresh_price_data(
                    conductor.as_ref(),
                    &config.symbols(),
                    config.interval,
                    self.status.as_ref(),
                    run_id,
                )
                .await;
            }
        }

        let overridden;
        let config = match self.parallelism_override {
            Some(n) => {
                overridden = PairsBacktestConfiguration {
                    max_parallelism: Some(n),
                    ..config.clone()
                };
                &overridden
            }
            None => config,
        };

        let result = match self.orchestrator.run(config, run_id, cancel).await {
            Ok(result) => result,
            Err(err) => {
                let status = match err {
                    BacktestError::Cancelled { .. } => RunStatus::Cancelled,
                    _ => RunStatus::Failed,
                };
                self.record_terminal(run_id, status, Some(err.to_string())).await;
                return Err(err);
            }
        };

        if let Err(source) = self.persist(&result).await {
            error!(run_id = %run_id, error = %source, "Failed to persist backtest result");
            self.record_terminal(run_id, RunStatus::Failed, Some(source.to_string()))
                .await;
            return Err(BacktestError::Persistence { run_id, source });
        }

        let message = format!(
            "Backtest {}: {} pairs, {} failed, total P&L {}",
            result.status,
            result.pair_results.len(),
            result.failed_pairs.len(),
            result.totals.total_pnl
        );
        notify(self.status.as_ref(), StatusUpdate::new(run_id, message)).await;
        Ok(result)
    }

    async fn persist(&self, result: &BacktestResult) -> anyhow::Result<()> {
        // Trades and metrics commit together so a failed write leaves no rows behind.
        let trades = self.repository.save_backtest_result(result).await?;

        let message = (!result.failed_pairs.is_empty()).then(|| {
            result
                .failed_pairs
                .iter()
                .map(|f| format!("{}: {}", f.pair.key(), f.reason()))
                .collect::<Vec<_>>()
                .join("; ")
        });
        self.repository
            .record_run_status(result.run_id, result.status, message)
            .await?;

        info!(run_id = %result.run_id, trades, status = %result.status, "Persisted backtest result");
        Ok(())
    }

    async fn record_terminal(&self, run_id: Uuid, status: RunStatus, message: Option<String>) {
        if let Err(e) = self
            .repository
            .record_run_status(run_id, status, message.clone())
            .await
        {
            error!(run_id = %run_id, status = %status, error = %e, "Failed to record run status");
        }
        let text = match message {
            Some(m) => format!("Backtest {}: {}", status, m),
            None => format!("Backtest {}", status),
        };
        notify(self.status.as_ref(), StatusUpdate::new(run_id, text)).await;
    }
}

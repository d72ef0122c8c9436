//! Backtest Runner
//!
//! Triggers one pairs backtest run, either from a stored run configuration
//! or from a configuration file.

use anyhow::{bail, Result};
use backtester::{
    BacktestOrchestrator, BacktestRepository, BacktestService, PairsBacktestConfiguration,
    PgBacktestRepository, PgPriceStore, StatusSink, TracingStatusSink,
};
use clap::Parser;
use pairs_core::api::HttpConductorClient;
use pairs_core::config::Config;
use pairs_core::db::{create_pool, run_migrations};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Debug, Parser)]
#[command(name = "backtest-runner", about = "Run a pairs-trading backtest")]
struct Args {
    /// Run a configuration previously stored under this run id.
    #[arg(long, conflicts_with = "config")]
    run_id: Option<Uuid>,

    /// Load the run configuration from a file and store it under a new run id.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip the conductor price refresh.
    #[arg(long)]
    no_refresh: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "backtest_runner=info,backtester=info,pairs_core=info,sqlx=warn".into());

    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env()?;
    init_tracing();

    info!("Starting backtest runner");

    let pool = create_pool(&config.database).await?;
    if !config.database.skip_migrations {
        info!("Running database migrations...");
        run_migrations(&pool, "migrations").await?;
    } else {
        info!("Skipping migrations (SKIP_MIGRATIONS=true)");
    }

    let repository = Arc::new(PgBacktestRepository::new(pool.clone()));
    let status: Arc<dyn StatusSink> = Arc::new(TracingStatusSink);
    let orchestrator = BacktestOrchestrator::new(Arc::new(PgPriceStore::new(pool)))
        .with_status_sink(Arc::clone(&status));

    let mut service = BacktestService::new(orchestrator, repository.clone(), status)
        .with_parallelism_override(config.backtest.max_parallelism);
    if let Some(url) = &config.conductor.url {
        let conductor = HttpConductorClient::new(url.as_str(), Duration::from_secs(config.conductor.timeout_secs))?;
        service = service.with_conductor(Arc::new(conductor));
    }
    let refresh = !(args.no_refresh || config.backtest.skip_data_refresh);
    service = service.refresh_data(refresh);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling backtest");
            ctrl_c.cancel();
        }
    });

    let outcome = match (args.run_id, args.config) {
        (Some(run_id), _) => {
            info!(run_id = %run_id, "Running stored configuration");
            service.run_stored(run_id, cancel).await
        }
        (None, Some(path)) => {
            let run_config = PairsBacktestConfiguration::from_file(&path)?;
            let run_id = Uuid::new_v4();
            repository.save_run_configuration(run_id, &run_config).await?;
            info!(run_id = %run_id, path = %path.display(), "Stored run configuration");
            service.run_backtest_async(&run_config, run_id, cancel).await
        }
        (None, None) => bail!("either --run-id or --config is required"),
    };

    match outcome {
        Ok(result) => {
            info!(
                run_id = %result.run_id,
                status = %result.status,
                pairs = result.pair_results.len(),
                failed = result.failed_pairs.len(),
                total_pnl = %result.totals.total_pnl,
                total_return = result.total_return(),
                max_drawdown_pct = result.totals.max_drawdown_pct,
                "Backtest finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Backtest failed");
            Err(e.into())
        }
    }
}

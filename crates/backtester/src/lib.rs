//! Backtester
//!
//! Pairs-trading backtest engine with Kelly position sizing.
//!
//! # Features
//!
//! - **Spread Signals**: Rolling z-score of `A - h*B` with entry/exit hysteresis
//! - **Kelly Sizing**: Half-Kelly fractions computed from trailing closed trades
//! - **Trade Simulator**: One position at a time per pair with a running capital balance
//! - **Parallel Orchestration**: Bounded fan-out across pairs with partial-failure reporting
//! - **Persistence**: PostgreSQL storage for trades, run metrics, and run status
//!
//! # Example
//!
//! ```ignore
//! use backtester::{
//!     BacktestOrchestrator, BacktestService, PairsBacktestConfiguration,
//!     PgBacktestRepository, PgPriceStore, TracingStatusSink,
//! };
//!
//! let orchestrator = BacktestOrchestrator::new(Arc::new(PgPriceStore::new(pool.clone())));
//! let service = BacktestService::new(
//!     orchestrator,
//!     Arc::new(PgBacktestRepository::new(pool)),
//!     Arc::new(TracingStatusSink),
//! );
//!
//! let config = PairsBacktestConfiguration::from_file("backtest.toml")?;
//! let result = service.run_backtest_async(&config, Uuid::new_v4(), cancel).await?;
//! println!("Return: {:.2}%", result.total_return() * 100.0);
//! ```

pub mod config;
pub mod data_store;
pub mod error;
pub mod orchestrator;
pub mod performance;
pub mod repository;
pub mod result;
pub mod service;
pub mod signals;
pub mod simulator;
pub mod sizing;
pub mod status;
pub mod strategy;

// Re-exports
pub use config::{PairsBacktestConfiguration, ValidatedConfiguration};
pub use data_store::{InMemoryPriceSource, PgPriceStore, PriceDataSource, WindowCache};
pub use error::{AlignmentError, BacktestError, ConfigurationError, DataError, PairError};
pub use orchestrator::{simulate_pair, BacktestOrchestrator};
pub use performance::{EquityPoint, PerformanceAggregator, RunTotals, TradeStatistics};
pub use repository::{BacktestRepository, InMemoryBacktestRepository, PgBacktestRepository};
pub use result::{BacktestResult, PairFailure, PairResult, RunStatus, RunSummary};
pub use service::{refresh_price_data, BacktestService, RefreshReport};
pub use signals::{generate_signals, HysteresisBand, SignalState, SpreadSignals};
pub use simulator::{SimulationOutcome, TradeSimulator};
pub use sizing::{compute_kelly_fraction, compute_trade_size, KellyFraction, PositionSizer, SizingConfig};
pub use status::{ChannelStatusSink, StatusSink, StatusUpdate, TracingStatusSink};
pub use strategy::{PairStrategyParameters, PairsStrategyConfig, StrategyKind, StrategyRegistry};

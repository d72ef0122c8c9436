//! Pairs Lab: Pairs-Trading Backtest Engine
//!
//! This is the root crate that provides benchmark access to the internal modules.
//! For actual functionality, use the individual crates directly:
//!
//! - `pairs-core`: Core types, conductor client, database helpers
//! - `backtester`: Spread signals, Kelly sizing, simulation, run orchestration
//! - `backtest-runner`: Command-line trigger for backtest runs

// Re-export for benchmarks
pub use backtester as engine;
pub use pairs_core as core;

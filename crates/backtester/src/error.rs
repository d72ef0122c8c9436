//! Error taxonomy for backtest runs.
//!
//! Configuration and persistence errors abort a run. Alignment and data
//! errors are scoped to a single pair unit and end up in the run's failure
//! manifest instead of propagating.

use chrono::{DateTime, Utc};
use pairs_core::types::Interval;
use thiserror::Error;
use uuid::Uuid;

/// Invalid run input, reported before any work starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("no pairs configured")]
    EmptyPairs,

    #[error("start date {start} must be before end date {end}")]
    InvalidDateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("max parallelism must be at least 1, got {0}")]
    InvalidParallelism(usize),

    #[error("initial capital must be positive, got {0}")]
    InvalidCapital(String),

    #[error("invalid pair: {0}")]
    InvalidPair(String),

    #[error("pair {0} is configured more than once")]
    DuplicatePair(String),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("invalid strategy parameters: {0}")]
    InvalidParameters(String),

    #[error("failed to load configuration: {0}")]
    Load(String),
}

/// Price series of a pair do not share identical timestamps.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignmentError {
    #[error("series lengths differ: {symbol_a} has {len_a} bars, {symbol_b} has {len_b}")]
    LengthMismatch {
        symbol_a: String,
        symbol_b: String,
        len_a: usize,
        len_b: usize,
    },

    #[error("timestamps differ at index {index}: {timestamp_a} vs {timestamp_b}")]
    TimestampMismatch {
        index: usize,
        timestamp_a: DateTime<Utc>,
        timestamp_b: DateTime<Utc>,
    },
}

/// Price history could not be obtained.
///
/// Cloneable so a single failed fetch can be reported by every pair that
/// shares the symbol.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("no price data for {symbol} at {interval}")]
    Unavailable { symbol: String, interval: Interval },

    #[error("price source error: {0}")]
    Source(String),
}

/// Failure of one pair unit. Never aborts sibling units.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PairError {
    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("pair unit cancelled")]
    Cancelled,

    #[error("pair unit panicked: {0}")]
    Panicked(String),
}

/// Run-level failure surfaced to the caller.
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("backtest run {run_id} was cancelled")]
    Cancelled { run_id: Uuid },

    #[error("persistence failed for run {run_id}: {source}")]
    Persistence {
        run_id: Uuid,
        #[source]
        source: anyhow::Error,
    },
}

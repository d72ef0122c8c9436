//! Core domain types for the pairs backtesting system.

pub mod metrics;
pub mod pair;
pub mod price;
pub mod trade;

pub use metrics::*;
pub use pair::*;
pub use price::*;
pub use trade::*;

//! Pairs Core Library
//!
//! Shared types, the conductor client, and database helpers for the pairs
//! backtesting system.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod types;

pub use error::{Error, Result};

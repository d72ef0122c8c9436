//! Error types for the pairs backtesting system.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] ::config::ConfigError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("API error: {message}")]
    Api { message: String, status: Option<u16> },
}

pub type Result<T> = std::result::Result<T, Error>;

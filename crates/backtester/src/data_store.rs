//! Historical price access.
//!
//! Provides the price data source boundary, a Postgres-backed store, an
//! in-memory source for tests and demos, and a per-run window cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pairs_core::types::{Interval, PriceBar, PriceSeriesWindow};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::DataError;

/// Source of historical OHLCV bars.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceDataSource: Send + Sync {
    /// Bars for `symbol` within `[start, end]`, ordered by timestamp.
    ///
    /// Fails with [`DataError::Unavailable`] when no rows exist.
    async fn get_historical_prices(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceBar>, DataError>;
}

/// Historical price store backed by Postgres.
pub struct PgPriceStore {
    pool: PgPool,
}

impl PgPriceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace bars for a symbol.
    pub async fn upsert_bars(
        &self,
        symbol: &str,
        interval: Interval,
        bars: &[PriceBar],
    ) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await?;
        for bar in bars {
            sqlx::query(
                r#"
                INSERT INTO historical_prices (
                    symbol, interval, timestamp, open, high, low, close, volume
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (symbol, interval, timestamp) DO UPDATE SET
                    open = EXCLUDED.open,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    close = EXCLUDED.close,
                    volume = EXCLUDED.volume
                "#,
            )
            .bind(symbol)
            .bind(interval.as_str())
            .bind(bar.timestamp)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(symbol, interval = %interval, count = bars.len(), "Stored historical prices");
        Ok(bars.len())
    }

    /// First and last stored timestamps for a symbol.
    pub async fn get_data_range(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> anyhow::Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let row: (Option<DateTime<Utc>>, Option<DateTime<Utc>>) = sqlx::query_as(
            r#"
            SELECT MIN(timestamp), MAX(timestamp)
            FROM historical_prices
            WHERE symbol = $1 AND interval = $2
            "#,
        )
        .bind(symbol)
        .bind(interval.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0.zip(row.1))
    }
}

#[async_trait]
impl PriceDataSource for PgPriceStore {
    async fn get_historical_prices(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceBar>, DataError> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, open, high, low, close, volume
            FROM historical_prices
            WHERE symbol = $1 AND interval = $2 AND timestamp >= $3 AND timestamp <= $4
            ORDER BY timestamp
            "#,
        )
        .bind(symbol)
        .bind(interval.as_str())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DataError::Source(e.to_string()))?;

        if rows.is_empty() {
            return Err(DataError::Unavailable {
                symbol: symbol.to_string(),
                interval,
            });
        }

        let bars: Vec<PriceBar> = rows
            .iter()
            .map(|row| {
                use sqlx::Row;
                PriceBar {
                    timestamp: row.get("timestamp"),
                    open: row.get("open"),
                    high: row.get("high"),
                    low: row.get("low"),
                    close: row.get("close"),
                    volume: row.get("volume"),
                }
            })
            .collect();

        debug!(symbol, interval = %interval, count = bars.len(), "Fetched historical prices");
        Ok(bars)
    }
}

/// In-memory price source.
#[derive(Default)]
pub struct InMemoryPriceSource {
    series: DashMap<(String, Interval), Vec<PriceBar>>,
}

impl InMemoryPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, symbol: impl Into<String>, interval: Interval, bars: Vec<PriceBar>) {
        self.series.insert((symbol.into(), interval), bars);
    }

    pub fn with_series(self, symbol: impl Into<String>, interval: Interval, bars: Vec<PriceBar>) -> Self {
        self.insert(symbol, interval, bars);
        self
    }
}

#[async_trait]
impl PriceDataSource for InMemoryPriceSource {
    async fn get_historical_prices(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceBar>, DataError> {
        let mut bars: Vec<PriceBar> = self
            .series
            .get(&(symbol.to_string(), interval))
            .map(|entry| {
                entry
                    .iter()
                    .filter(|bar| bar.timestamp >= start && bar.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if bars.is_empty() {
            return Err(DataError::Unavailable {
                symbol: symbol.to_string(),
                interval,
            });
        }

        bars.sort_by_key(|bar| bar.timestamp);
        Ok(bars)
    }
}

type CachedWindow = Result<Arc<PriceSeriesWindow>, DataError>;

/// Per-run cache of price windows keyed by symbol.
///
/// Each symbol is fetched at most once; pair units sharing a leg get the
/// same read-only window, or the same error.
pub struct WindowCache {
    source: Arc<dyn PriceDataSource>,
    interval: Interval,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    windows: DashMap<String, Arc<OnceCell<CachedWindow>>>,
}

impl WindowCache {
    pub fn new(
        source: Arc<dyn PriceDataSource>,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            interval,
            start,
            end,
            windows: DashMap::new(),
        }
    }

    /// Window for `symbol`, fetching it on first use.
    pub async fn get(&self, symbol: &str) -> CachedWindow {
        let cell = self
            .windows
            .entry(symbol.to_string())
            .or_default()
            .value()
            .clone();

        cell.get_or_init(|| async {
            let bars = self
                .source
                .get_historical_prices(symbol, self.interval, self.start, self.end)
                .await?;
            Ok(Arc::new(PriceSeriesWindow::new(symbol, self.interval, bars)))
        })
        .await
        .clone()
    }

    /// Number of symbols requested so far.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

//! Historical price bars and per-symbol series windows.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bar interval of a price series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "1d")]
    Day1,
    #[serde(rename = "1wk")]
    Week1,
}

impl Interval {
    /// Get the interval as a chrono Duration.
    pub fn to_duration(&self) -> Duration {
        match self {
            Interval::Minute1 => Duration::minutes(1),
            Interval::Minute5 => Duration::minutes(5),
            Interval::Minute15 => Duration::minutes(15),
            Interval::Hour1 => Duration::hours(1),
            Interval::Day1 => Duration::days(1),
            Interval::Week1 => Duration::weeks(1),
        }
    }

    /// Code stored in the database and sent to the conductor.
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Minute1 => "1m",
            Interval::Minute5 => "5m",
            Interval::Minute15 => "15m",
            Interval::Hour1 => "1h",
            Interval::Day1 => "1d",
            Interval::Week1 => "1wk",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Interval::Minute1),
            "5m" => Ok(Interval::Minute5),
            "15m" => Ok(Interval::Minute15),
            "1h" => Ok(Interval::Hour1),
            "1d" => Ok(Interval::Day1),
            "1wk" => Ok(Interval::Week1),
            other => Err(format!("unknown interval: {}", other)),
        }
    }
}

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl PriceBar {
    /// Create a bar where every price equals `close`.
    pub fn flat(timestamp: DateTime<Utc>, close: Decimal) -> Self {
        Self {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ZERO,
        }
    }
}

/// Immutable, timestamp-ordered price series for one symbol.
///
/// Windows are shared read-only between pair units, so nothing here mutates
/// after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeriesWindow {
    pub symbol: String,
    pub interval: Interval,
    bars: Vec<PriceBar>,
}

impl PriceSeriesWindow {
    /// Build a window, sorting bars by timestamp and dropping duplicate timestamps
    /// (the last bar for a timestamp wins).
    pub fn new(symbol: impl Into<String>, interval: Interval, mut bars: Vec<PriceBar>) -> Self {
        bars.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let mut deduped: Vec<PriceBar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.timestamp == bar.timestamp => *last = bar,
                _ => deduped.push(bar),
            }
        }

        Self {
            symbol: symbol.into(),
            interval,
            bars: deduped,
        }
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn timestamp(&self, index: usize) -> Option<DateTime<Utc>> {
        self.bars.get(index).map(|b| b.timestamp)
    }

    pub fn close(&self, index: usize) -> Option<Decimal> {
        self.bars.get(index).map(|b| b.close)
    }

    /// First and last timestamps covered by the window.
    pub fn range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.bars.first().zip(self.bars.last()).map(|(f, l)| (f.timestamp, l.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_interval_round_trip_codes() {
        assert_eq!("1d".parse::<Interval>(), Ok(Interval::Day1));
        assert_eq!(Interval::Hour1.as_str(), "1h");
        assert_eq!(Interval::Day1.to_duration(), Duration::days(1));
        assert!("2d".parse::<Interval>().is_err());
    }

    #[test]
    fn test_window_sorts_and_dedups() {
        let window = PriceSeriesWindow::new(
            "KO",
            Interval::Day1,
            vec![
                PriceBar::flat(ts(3), Decimal::new(3, 0)),
                PriceBar::flat(ts(1), Decimal::new(1, 0)),
                PriceBar::flat(ts(2), Decimal::new(2, 0)),
                PriceBar::flat(ts(2), Decimal::new(20, 0)),
            ],
        );

        assert_eq!(window.len(), 3);
        assert_eq!(window.close(1), Some(Decimal::new(20, 0)));
        assert_eq!(window.range(), Some((ts(1), ts(3))));
    }
}

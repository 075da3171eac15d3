use crate::error::CoreError;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The bar sizes a generated strategy may trade on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [Timeframe::M15, Timeframe::M30, Timeframe::H1, Timeframe::H2];

    /// The interval string used by the `klines` table (e.g. "1h").
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H2 => 120,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes())
    }

    /// Bars per 365-day year, used to annualize per-bar Sharpe ratios.
    pub fn bars_per_year(&self) -> f64 {
        (365.0 * 24.0 * 60.0) / self.minutes() as f64
    }

    /// Floors a timestamp to the start of the bar that contains it.
    pub fn floor(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let step = self.minutes() * 60;
        let secs = at.timestamp();
        let floored = secs - secs.rem_euclid(step);
        Utc.timestamp_opt(floored, 0).single().unwrap_or(at)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| CoreError::UnknownTimeframe(s.to_string()))
    }
}

/// A single OHLCV bar as stored by the market-data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
    pub interval: String,
}

/// A half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, CoreError> {
        if start >= end {
            return Err(CoreError::InvalidInput(
                "window".to_string(),
                format!("start {start} must be before end {end}"),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.format("%Y-%m-%d %H:%M"), self.end.format("%Y-%m-%d %H:%M"))
    }
}

/// Rejects any IS/OOS pair where the in-sample window does not end at or before
/// the out-of-sample window starts.
pub fn ensure_disjoint(is_window: &Window, oos_window: &Window) -> Result<(), CoreError> {
    if is_window.end > oos_window.start {
        return Err(CoreError::WindowOverlap {
            is_window: is_window.to_string(),
            oos_window: oos_window.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn adjacent_windows_are_disjoint() {
        let is_window = Window::new(at(1, 0), at(10, 0)).unwrap();
        let oos_window = Window::new(at(10, 0), at(20, 0)).unwrap();
        assert!(!is_window.overlaps(&oos_window));
        assert!(ensure_disjoint(&is_window, &oos_window).is_ok());
    }

    #[test]
    fn overlapping_or_reversed_windows_are_rejected() {
        let is_window = Window::new(at(1, 0), at(10, 1)).unwrap();
        let oos_window = Window::new(at(10, 0), at(20, 0)).unwrap();
        assert!(ensure_disjoint(&is_window, &oos_window).is_err());
        // OOS before IS is also a leak: the "future" window would be older.
        assert!(ensure_disjoint(&oos_window, &Window::new(at(1, 0), at(5, 0)).unwrap()).is_err());
    }

    #[test]
    fn floor_aligns_to_bar_start() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 13, 47, 12).unwrap();
        assert_eq!(Timeframe::H2.floor(ts), Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap());
        assert_eq!(Timeframe::M15.floor(ts), Utc.with_ymd_and_hms(2024, 3, 5, 13, 45, 0).unwrap());
    }

    #[test]
    fn timeframe_parses_interval_strings() {
        assert_eq!("30m".parse::<Timeframe>().unwrap(), Timeframe::M30);
        assert!("4h".parse::<Timeframe>().is_err());
    }
}

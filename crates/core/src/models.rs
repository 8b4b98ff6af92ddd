use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::traits::BarSource;

// ---------------------------------------------------------------------------
// Market Data
// ---------------------------------------------------------------------------

/// A single OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Whether the bar carries usable volume. Negative and NaN volume count as zero.
    pub fn has_volume(&self) -> bool {
        self.volume.is_finite() && self.volume > 0.0
    }
}

/// Which price of a bar feeds the volume-weighted accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Open,
    High,
    Low,
    Close,
    /// (high + low) / 2
    Median,
    /// (high + low + close) / 3
    #[default]
    Typical,
}

impl PriceSource {
    pub fn price(&self, bar: &Bar) -> f64 {
        match self {
            PriceSource::Open => bar.open,
            PriceSource::High => bar.high,
            PriceSource::Low => bar.low,
            PriceSource::Close => bar.close,
            PriceSource::Median => (bar.high + bar.low) / 2.0,
            PriceSource::Typical => (bar.high + bar.low + bar.close) / 3.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Timeframe
// ---------------------------------------------------------------------------

/// Timeframe for bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Tick,
    Second(u32),
    Minute(u32),
    Hour(u32),
    Daily,
    Weekly,
    Monthly,
}

pub const SECONDS_PER_HOUR: i64 = 3_600;
pub const SECONDS_PER_DAY: i64 = 86_400;
pub const SECONDS_PER_WEEK: i64 = 7 * SECONDS_PER_DAY;
/// Monthly bars are compared as the shortest possible month.
pub const SECONDS_PER_MONTH: i64 = 28 * SECONDS_PER_DAY;

impl Timeframe {
    /// Nominal span of one bar, used to compare granularities.
    pub fn nominal_seconds(&self) -> i64 {
        match self {
            Timeframe::Tick => 0,
            Timeframe::Second(n) => i64::from(*n),
            Timeframe::Minute(n) => i64::from(*n) * 60,
            Timeframe::Hour(n) => i64::from(*n) * SECONDS_PER_HOUR,
            Timeframe::Daily => SECONDS_PER_DAY,
            Timeframe::Weekly => SECONDS_PER_WEEK,
            Timeframe::Monthly => SECONDS_PER_MONTH,
        }
    }

    /// Map a bar spacing in seconds onto the closest timeframe that does not exceed it.
    pub fn from_seconds(seconds: i64) -> Self {
        match seconds {
            s if s <= 0 => Timeframe::Tick,
            s if s >= SECONDS_PER_MONTH => Timeframe::Monthly,
            s if s >= SECONDS_PER_WEEK => Timeframe::Weekly,
            s if s >= SECONDS_PER_DAY => Timeframe::Daily,
            s if s >= SECONDS_PER_HOUR => Timeframe::Hour((s / SECONDS_PER_HOUR) as u32),
            s if s >= 60 => Timeframe::Minute((s / 60) as u32),
            s => Timeframe::Second(s as u32),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Tick => write!(f, "tick"),
            Timeframe::Second(n) => write!(f, "{n}s"),
            Timeframe::Minute(n) => write!(f, "{n}m"),
            Timeframe::Hour(n) => write!(f, "{n}h"),
            Timeframe::Daily => write!(f, "1d"),
            Timeframe::Weekly => write!(f, "1w"),
            Timeframe::Monthly => write!(f, "1M"),
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    /// Parses `tick`, `<n>s`, `<n>m`, `<n>h`, `1d`, `1w` and `1M` (months are case-sensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("tick") {
            return Ok(Timeframe::Tick);
        }
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("Missing timeframe unit in '{}'", s))?;
        let (count, unit) = s.split_at(split);
        let count: u32 = count
            .parse()
            .map_err(|_| format!("Invalid timeframe count in '{}'", s))?;
        if count == 0 {
            return Err(format!("Timeframe count must be > 0 in '{}'", s));
        }
        match unit {
            "s" => Ok(Timeframe::Second(count)),
            "m" => Ok(Timeframe::Minute(count)),
            "h" | "H" => Ok(Timeframe::Hour(count)),
            "d" | "D" if count == 1 => Ok(Timeframe::Daily),
            "w" | "W" if count == 1 => Ok(Timeframe::Weekly),
            "M" if count == 1 => Ok(Timeframe::Monthly),
            _ => Err(format!("Unsupported timeframe '{}'", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// Bar Series
// ---------------------------------------------------------------------------

/// In-memory bar history with an optional forming last bar.
#[derive(Debug, Clone)]
pub struct BarSeries {
    timeframe: Timeframe,
    bars: Vec<Bar>,
    forming: bool,
}

impl BarSeries {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            bars: Vec::new(),
            forming: false,
        }
    }

    /// All bars are treated as closed.
    pub fn from_bars(timeframe: Timeframe, bars: Vec<Bar>) -> Self {
        Self {
            timeframe,
            bars,
            forming: false,
        }
    }

    /// Append a closed bar. A forming bar, if any, is closed first.
    pub fn push(&mut self, bar: Bar) {
        self.forming = false;
        self.bars.push(bar);
    }

    /// Replace the forming bar, or open one if the last bar is closed.
    pub fn update_forming(&mut self, bar: Bar) {
        if self.forming {
            if let Some(last) = self.bars.last_mut() {
                *last = bar;
                return;
            }
        }
        self.bars.push(bar);
        self.forming = true;
    }

    pub fn close_forming(&mut self) {
        self.forming = false;
    }

    /// Mark the last bar as still forming.
    pub fn set_last_forming(&mut self, forming: bool) {
        self.forming = forming && !self.bars.is_empty();
    }

    pub fn set_timeframe(&mut self, timeframe: Timeframe) {
        self.timeframe = timeframe;
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }
}

impl BarSource for BarSeries {
    fn count(&self) -> usize {
        self.bars.len()
    }

    fn bar(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }

    fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    fn last_bar_forming(&self) -> bool {
        self.forming
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(hour: u32) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, hour, 0, 0).unwrap();
        Bar::new(ts, 10.0, 12.0, 9.0, 11.0, 100.0)
    }

    #[test]
    fn test_price_sources() {
        let b = bar(0);
        assert_eq!(PriceSource::Open.price(&b), 10.0);
        assert_eq!(PriceSource::Median.price(&b), 10.5);
        assert!((PriceSource::Typical.price(&b) - 32.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_timeframe_parse_and_display() {
        for token in ["tick", "30s", "5m", "4h", "1d", "1w", "1M"] {
            let tf: Timeframe = token.parse().unwrap();
            assert_eq!(tf.to_string(), token);
        }
        assert!("0m".parse::<Timeframe>().is_err());
        assert!("2d".parse::<Timeframe>().is_err());
        assert!("abc".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_timeframe_from_seconds() {
        assert_eq!(Timeframe::from_seconds(300), Timeframe::Minute(5));
        assert_eq!(Timeframe::from_seconds(7_200), Timeframe::Hour(2));
        assert_eq!(Timeframe::from_seconds(SECONDS_PER_DAY), Timeframe::Daily);
        assert_eq!(Timeframe::from_seconds(31 * SECONDS_PER_DAY), Timeframe::Monthly);
    }

    #[test]
    fn test_series_forming_bar() {
        let mut series = BarSeries::new(Timeframe::Hour(1));
        series.push(bar(0));
        series.update_forming(bar(1));
        assert_eq!(series.count(), 2);
        assert_eq!(series.closed_count(), 1);

        series.update_forming(bar(1));
        assert_eq!(series.count(), 2);

        series.push(bar(2));
        assert_eq!(series.count(), 3);
        assert_eq!(series.closed_count(), 3);
    }

    #[test]
    fn test_zero_volume_detection() {
        let mut b = bar(0);
        assert!(b.has_volume());
        b.volume = 0.0;
        assert!(!b.has_volume());
        b.volume = f64::NAN;
        assert!(!b.has_volume());
    }
}

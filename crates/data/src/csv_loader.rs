use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use periodband_core::{Bar, DataError, Timeframe};
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Load OHLCV bars from a CSV file.
///
/// Expected columns (case-insensitive, flexible ordering):
/// `timestamp` (or `date`, `datetime`, `time`), `open`, `high`, `low`, `close`, `volume`
///
/// Supports common date formats.
pub fn load_bars_from_csv(path: &Path) -> Result<Vec<Bar>, DataError> {
    if !path.exists() {
        return Err(DataError::NotFound(format!(
            "CSV file not found: {}",
            path.display()
        )));
    }
    let reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| DataError::ParseError(format!("Failed to open CSV: {}", e)))?;
    read_bars(reader)
}

/// Load bars from any CSV source with a header row.
pub fn load_bars_from_reader<R: Read>(input: R) -> Result<Vec<Bar>, DataError> {
    let reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);
    read_bars(reader)
}

/// Smallest positive spacing between consecutive bars.
pub fn infer_timeframe(bars: &[Bar]) -> Option<Timeframe> {
    bars.windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_seconds())
        .filter(|s| *s > 0)
        .min()
        .map(Timeframe::from_seconds)
}

fn read_bars<R: Read>(mut reader: csv::Reader<R>) -> Result<Vec<Bar>, DataError> {
    let headers = reader
        .headers()
        .map_err(|e| DataError::ParseError(format!("Failed to read headers: {}", e)))?
        .clone();

    let col_map = resolve_bar_columns(&headers)?;

    let mut bars = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| DataError::ParseError(format!("CSV record error: {}", e)))?;

        let timestamp = parse_timestamp(field(&record, col_map.timestamp, "timestamp")?)?;
        let open = parse_price(field(&record, col_map.open, "open")?, "open")?;
        let high = parse_price(field(&record, col_map.high, "high")?, "high")?;
        let low = parse_price(field(&record, col_map.low, "low")?, "low")?;
        let close = parse_price(field(&record, col_map.close, "close")?, "close")?;
        let volume = match col_map.volume.and_then(|idx| record.get(idx)) {
            Some(raw) if !raw.is_empty() => parse_price(raw, "volume")?,
            _ => 0.0,
        };

        bars.push(Bar {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    // Sort by timestamp
    bars.sort_by_key(|b| b.timestamp);
    debug!(bars = bars.len(), "Loaded bars from CSV");
    Ok(bars)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

const TIMESTAMP_HEADERS: &[&str] = &["timestamp", "date", "datetime", "time"];

/// Wall-clock layouts tried in order; all are read as UTC. `%.f` also matches no fraction.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Header positions of the bar fields. Volume is optional and defaults to zero.
struct BarColumnMap {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

fn resolve_bar_columns(headers: &csv::StringRecord) -> Result<BarColumnMap, DataError> {
    Ok(BarColumnMap {
        timestamp: required_column(headers, "timestamp", TIMESTAMP_HEADERS)?,
        open: required_column(headers, "open", &["open", "o"])?,
        high: required_column(headers, "high", &["high", "h"])?,
        low: required_column(headers, "low", &["low", "l"])?,
        close: required_column(headers, "close", &["close", "c"])?,
        volume: find_column(headers, &["volume", "vol", "v"]),
    })
}

fn required_column(
    headers: &csv::StringRecord,
    label: &str,
    names: &[&str],
) -> Result<usize, DataError> {
    find_column(headers, names)
        .ok_or_else(|| DataError::ParseError(format!("No {} column found", label)))
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers.iter().position(|header| {
        let h = header.trim().to_lowercase();
        names.iter().any(|name| h == *name)
    })
}

fn field<'a>(record: &'a csv::StringRecord, idx: usize, name: &str) -> Result<&'a str, DataError> {
    record
        .get(idx)
        .ok_or_else(|| DataError::ParseError(format!("Missing {} field", name)))
}

fn parse_price(s: &str, field: &str) -> Result<f64, DataError> {
    s.trim()
        .parse::<f64>()
        .map_err(|e| DataError::ParseError(format!("Failed to parse {} '{}': {}", field, s, e)))
}

/// RFC 3339, a naive wall-clock layout, a bare `%Y-%m-%d` date or Unix seconds.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DataError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        });
    if let Some(naive) = naive {
        return Ok(naive.and_utc());
    }

    s.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| DataError::ParseError(format!("Unable to parse timestamp: '{}'", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_load_from_reader_sorts_and_defaults_volume() {
        let csv = "Date,Open,High,Low,Close\n\
                   2024-01-02 10:00:00,2,3,1,2.5\n\
                   2024-01-02 09:00:00,1,2,0.5,1.5\n";
        let bars = load_bars_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 1.5);
        assert_eq!(bars[1].high, 3.0);
        assert!(bars.iter().all(|b| b.volume == 0.0));
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let csv = "timestamp,open,high,close\n2024-01-02,1,2,1\n";
        assert!(matches!(
            load_bars_from_reader(csv.as_bytes()),
            Err(DataError::ParseError(_))
        ));
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap();
        for s in [
            "2024-03-15T09:30:00Z",
            "2024-03-15 09:30:00",
            "2024-03-15 09:30:00.000",
            "2024-03-15 09:30",
            "03/15/2024 09:30",
            "1710495000",
        ] {
            assert_eq!(parse_timestamp(s).unwrap(), expected, "{s}");
        }
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_infer_timeframe() {
        let csv = "time,o,h,l,c,v\n\
                   2024-01-02 09:00,1,1,1,1,5\n\
                   2024-01-02 09:15,1,1,1,1,5\n\
                   2024-01-02 10:00,1,1,1,1,5\n";
        let bars = load_bars_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(infer_timeframe(&bars), Some(Timeframe::Minute(15)));
        assert_eq!(infer_timeframe(&bars[..1]), None);
    }

    #[test]
    fn test_missing_file() {
        let err = load_bars_from_csv(Path::new("/nonexistent/bars.csv")).unwrap_err();
        assert!(matches!(err, DataError::NotFound(_)));
    }
}

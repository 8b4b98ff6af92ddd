pub mod csv_loader;

pub use csv_loader::{infer_timeframe, load_bars_from_csv, load_bars_from_reader};

use periodband_core::{BarSeries, DataError, Timeframe};
use std::path::Path;
use tracing::info;

/// Load a CSV file into a closed [`BarSeries`].
///
/// When `timeframe` is `None` it is inferred from the bar spacing.
pub fn load_series(path: &Path, timeframe: Option<Timeframe>) -> Result<BarSeries, DataError> {
    let bars = load_bars_from_csv(path)?;
    if bars.is_empty() {
        return Err(DataError::NotFound(format!(
            "No bars in {}",
            path.display()
        )));
    }
    let timeframe = match timeframe {
        Some(tf) => tf,
        None => infer_timeframe(&bars).ok_or_else(|| {
            DataError::ParseError("Cannot infer timeframe from a single bar".into())
        })?,
    };
    info!(
        path = %path.display(),
        bars = bars.len(),
        timeframe = %timeframe,
        "Loaded bar series"
    );
    Ok(BarSeries::from_bars(timeframe, bars))
}

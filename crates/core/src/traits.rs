use crate::models::*;

// ---------------------------------------------------------------------------
// Bar Source Trait
// ---------------------------------------------------------------------------

/// Pull-style accessor over an ordered bar history indexed `0..count()`.
///
/// The bar at `count() - 1` may still be forming; engines must not treat it as closed.
pub trait BarSource {
    /// Number of available bars, including a forming last bar.
    fn count(&self) -> usize;

    /// The bar at `index`, if available.
    fn bar(&self, index: usize) -> Option<&Bar>;

    /// Granularity of the bars.
    fn timeframe(&self) -> Timeframe;

    /// Whether the last bar is still forming.
    fn last_bar_forming(&self) -> bool;

    /// Number of closed bars.
    fn closed_count(&self) -> usize {
        let count = self.count();
        if self.last_bar_forming() {
            count.saturating_sub(1)
        } else {
            count
        }
    }
}

// ---------------------------------------------------------------------------
// Data Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during data operations.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Data not found: {0}")]
    NotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

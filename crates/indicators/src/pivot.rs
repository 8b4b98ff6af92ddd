use crate::accumulator::PeriodState;
use crate::bands::{from_range, BandResult, BandStrategy};

/// Fractions of the previous period's range for depth 1, 2 and 3.
pub const PIVOT_LEVELS: [f64; 3] = [0.382, 0.618, 1.000];

pub const DEFAULT_PIVOT_DEPTH: u8 = 2;

/// Pivot-based bands, symmetric about the central value.
///
/// The bounds use the level selected by `depth`; the sub-levels carry all three.
#[derive(Debug, Clone)]
pub struct PivotBands {
    depth: u8,
}

impl PivotBands {
    /// `depth` is clamped to `1..=3`.
    pub fn new(depth: u8) -> Self {
        Self {
            depth: depth.clamp(1, 3),
        }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    fn level(&self) -> f64 {
        PIVOT_LEVELS[usize::from(self.depth - 1)]
    }
}

impl Default for PivotBands {
    fn default() -> Self {
        Self::new(DEFAULT_PIVOT_DEPTH)
    }
}

impl BandStrategy for PivotBands {
    fn name(&self) -> &'static str {
        "pivot"
    }

    fn compute(&self, state: &PeriodState, central_value: f64) -> BandResult {
        from_range(state, central_value, |width| {
            BandResult::symmetric(
                central_value,
                self.level() * width,
                PIVOT_LEVELS.map(|level| level * width),
            )
        })
    }
}

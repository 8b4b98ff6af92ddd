use std::fmt;

use crate::accumulator::PeriodState;
use crate::dispersion::DispersionBands;
use crate::pivot::PivotBands;
use crate::range::RangeBands;

pub const SUBLEVEL_COUNT: usize = 6;

/// Band values for one bar. `None` fields have no value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandResult {
    pub central_value: f64,
    pub upper: Option<f64>,
    pub lower: Option<f64>,
    /// Three levels above the central value, then the mirrored three below.
    pub sublevels: [Option<f64>; SUBLEVEL_COUNT],
}

impl BandResult {
    /// Zero width: every level sits on the central value.
    pub fn flat(central_value: f64) -> Self {
        Self {
            central_value,
            upper: Some(central_value),
            lower: Some(central_value),
            sublevels: [Some(central_value); SUBLEVEL_COUNT],
        }
    }

    /// Central value only; the width could not be derived.
    pub fn central_only(central_value: f64) -> Self {
        Self {
            central_value,
            upper: None,
            lower: None,
            sublevels: [None; SUBLEVEL_COUNT],
        }
    }

    /// Bounds at `central ± offset`, sub-levels at `central ± level` for each level.
    pub fn symmetric(central_value: f64, offset: f64, levels: [f64; 3]) -> Self {
        let offset = offset.abs();
        let mut sublevels = [None; SUBLEVEL_COUNT];
        for (i, level) in levels.iter().enumerate() {
            sublevels[i] = Some(central_value + level.abs());
            sublevels[i + 3] = Some(central_value - level.abs());
        }
        Self {
            central_value,
            upper: Some(central_value + offset),
            lower: Some(central_value - offset),
            sublevels,
        }
    }

    /// Distance from the central value to the upper bound.
    pub fn half_width(&self) -> Option<f64> {
        self.upper.map(|u| u - self.central_value)
    }
}

/// Derives an envelope around the central value from the period statistics.
///
/// Implementations hold configuration only; all history comes from [`PeriodState`].
pub trait BandStrategy: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn compute(&self, state: &PeriodState, central_value: f64) -> BandResult;
}

/// Range a range-driven strategy should scale from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeBasis {
    /// High minus low of the last completed period.
    Previous(f64),
    /// Stand-in while no period has completed yet.
    Partial(f64),
}

pub fn reference_range(state: &PeriodState) -> Option<RangeBasis> {
    match (state.previous, state.current) {
        (Some(previous), _) => Some(RangeBasis::Previous(previous.width())),
        (None, Some(current)) => Some(RangeBasis::Partial(current.width())),
        (None, None) => None,
    }
}

/// Shared shape of the two range-driven strategies: a zero previous range has no value,
/// a zero partial range is flat.
pub(crate) fn from_range(
    state: &PeriodState,
    central_value: f64,
    build: impl Fn(f64) -> BandResult,
) -> BandResult {
    match reference_range(state) {
        Some(RangeBasis::Previous(width)) if width > 0.0 => build(width),
        Some(RangeBasis::Previous(_)) => BandResult::central_only(central_value),
        Some(RangeBasis::Partial(width)) if width > 0.0 => build(width),
        _ => BandResult::flat(central_value),
    }
}

/// The configured band strategy and its parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BandSpec {
    Range { fraction: f64 },
    Pivot { depth: u8 },
    Dispersion { multiplier: f64 },
}

impl BandSpec {
    pub fn build(&self) -> Box<dyn BandStrategy> {
        match *self {
            BandSpec::Range { fraction } => Box::new(RangeBands::new(fraction)),
            BandSpec::Pivot { depth } => Box::new(PivotBands::new(depth)),
            BandSpec::Dispersion { multiplier } => Box::new(DispersionBands::new(multiplier)),
        }
    }
}

impl fmt::Display for BandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandSpec::Range { fraction } => write!(f, "range(fraction={fraction})"),
            BandSpec::Pivot { depth } => write!(f, "pivot(depth={depth})"),
            BandSpec::Dispersion { multiplier } => write!(f, "dispersion(multiplier={multiplier})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::PeriodRange;

    fn range(high: f64, low: f64) -> PeriodRange {
        PeriodRange {
            high,
            low,
            close: low,
        }
    }

    #[test]
    fn test_symmetric_layout() {
        let r = BandResult::symmetric(100.0, 4.0, [1.0, 2.0, 3.0]);
        assert_eq!(r.upper, Some(104.0));
        assert_eq!(r.lower, Some(96.0));
        assert_eq!(
            r.sublevels,
            [Some(101.0), Some(102.0), Some(103.0), Some(99.0), Some(98.0), Some(97.0)]
        );
        assert_eq!(r.half_width(), Some(4.0));
    }

    #[test]
    fn test_reference_range_prefers_previous() {
        let mut state = PeriodState {
            current: Some(range(110.0, 100.0)),
            ..Default::default()
        };
        assert_eq!(reference_range(&state), Some(RangeBasis::Partial(10.0)));
        state.previous = Some(range(103.0, 100.0));
        assert_eq!(reference_range(&state), Some(RangeBasis::Previous(3.0)));
    }

    #[test]
    fn test_from_range_degenerate_cases() {
        let build = |w: f64| BandResult::symmetric(50.0, w, [w; 3]);

        let first_bar = PeriodState {
            current: Some(range(50.0, 50.0)),
            ..Default::default()
        };
        assert_eq!(from_range(&first_bar, 50.0, build), BandResult::flat(50.0));

        let flat_previous = PeriodState {
            current: Some(range(55.0, 45.0)),
            previous: Some(range(50.0, 50.0)),
            ..Default::default()
        };
        assert_eq!(
            from_range(&flat_previous, 50.0, build),
            BandResult::central_only(50.0)
        );
    }

    #[test]
    fn test_build_returns_named_strategy() {
        assert_eq!(BandSpec::Range { fraction: 0.5 }.build().name(), "range");
        assert_eq!(BandSpec::Pivot { depth: 2 }.build().name(), "pivot");
        assert_eq!(BandSpec::Dispersion { multiplier: 2.0 }.build().name(), "dispersion");
    }
}

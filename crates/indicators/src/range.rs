use crate::accumulator::PeriodState;
use crate::bands::{from_range, BandResult, BandStrategy};

/// Sub-level fractions of the band offset.
pub const RANGE_SUBLEVELS: [f64; 3] = [0.236, 0.382, 0.618];

pub const DEFAULT_RANGE_FRACTION: f64 = 0.5;

/// Range-based bands.
///
/// Upper/lower sit `fraction × (high − low)` of the previous period away from the
/// central value; the sub-levels fan out at fixed fractions of that offset.
#[derive(Debug, Clone)]
pub struct RangeBands {
    fraction: f64,
}

impl RangeBands {
    pub fn new(fraction: f64) -> Self {
        Self {
            fraction: fraction.abs(),
        }
    }
}

impl Default for RangeBands {
    fn default() -> Self {
        Self::new(DEFAULT_RANGE_FRACTION)
    }
}

impl BandStrategy for RangeBands {
    fn name(&self) -> &'static str {
        "range"
    }

    fn compute(&self, state: &PeriodState, central_value: f64) -> BandResult {
        from_range(state, central_value, |width| {
            let offset = self.fraction * width;
            BandResult::symmetric(central_value, offset, RANGE_SUBLEVELS.map(|f| f * offset))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::PeriodRange;

    fn state(previous: Option<(f64, f64)>, current: (f64, f64)) -> PeriodState {
        let to_range = |(high, low): (f64, f64)| PeriodRange {
            high,
            low,
            close: low,
        };
        PeriodState {
            previous: previous.map(to_range),
            current: Some(to_range(current)),
            cumulative_volume: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_range_width_uses_previous_period() {
        let bands = RangeBands::new(0.5);
        let out = bands.compute(&state(Some((104.0, 100.0)), (130.0, 90.0)), 102.0);
        assert_eq!(out.upper, Some(104.0));
        assert_eq!(out.lower, Some(100.0));
        let first = out.sublevels[0].unwrap();
        assert!((first - (102.0 + 0.236 * 2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_range_partial_fallback() {
        let bands = RangeBands::default();
        let out = bands.compute(&state(None, (110.0, 100.0)), 105.0);
        assert_eq!(out.half_width(), Some(5.0));
    }

    #[test]
    fn test_negative_fraction_keeps_order() {
        let bands = RangeBands::new(-1.0);
        let out = bands.compute(&state(Some((12.0, 10.0)), (11.0, 11.0)), 11.0);
        assert!(out.upper.unwrap() >= out.central_value);
        assert!(out.lower.unwrap() <= out.central_value);
    }
}

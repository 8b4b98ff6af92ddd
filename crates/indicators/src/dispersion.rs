use crate::accumulator::PeriodState;
use crate::bands::{BandResult, BandStrategy};

pub const DEFAULT_DISPERSION_MULTIPLIER: f64 = 2.0;

/// Standard-deviation bands around the VWAP.
///
/// The deviation covers the elapsed part of the current period only, so these bands
/// react within the period while the range-driven strategies lag by one period.
#[derive(Debug, Clone)]
pub struct DispersionBands {
    multiplier: f64,
}

impl DispersionBands {
    pub fn new(multiplier: f64) -> Self {
        Self {
            multiplier: multiplier.abs(),
        }
    }
}

impl Default for DispersionBands {
    fn default() -> Self {
        Self::new(DEFAULT_DISPERSION_MULTIPLIER)
    }
}

impl BandStrategy for DispersionBands {
    fn name(&self) -> &'static str {
        "dispersion"
    }

    fn compute(&self, state: &PeriodState, central_value: f64) -> BandResult {
        let sigma = state.variance().map(f64::sqrt).unwrap_or(0.0);
        if sigma > 0.0 {
            BandResult::symmetric(
                central_value,
                self.multiplier * sigma,
                [sigma, 2.0 * sigma, 3.0 * sigma],
            )
        } else {
            BandResult::flat(central_value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::PeriodRange;

    #[test]
    fn test_sigma_bands() {
        let state = PeriodState {
            cumulative_price_volume: 200.0,
            cumulative_volume: 2.0,
            sum_squared_deviation: 8.0,
            ..Default::default()
        };
        let out = DispersionBands::new(2.0).compute(&state, 100.0);
        assert_eq!(out.upper, Some(104.0));
        assert_eq!(out.lower, Some(96.0));
        assert_eq!(out.sublevels[0], Some(102.0));
        assert_eq!(out.sublevels[5], Some(94.0));
    }

    #[test]
    fn test_ignores_previous_period() {
        let wide_previous = PeriodState {
            cumulative_price_volume: 100.0,
            cumulative_volume: 1.0,
            previous: Some(PeriodRange {
                high: 500.0,
                low: 1.0,
                close: 2.0,
            }),
            ..Default::default()
        };
        let out = DispersionBands::default().compute(&wide_previous, 100.0);
        assert_eq!(out, BandResult::flat(100.0));
    }
}

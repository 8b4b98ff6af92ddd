use chrono::{DateTime, Utc};
use periodband_core::{Bar, PriceSource};
use tracing::trace;

use crate::period::PeriodResolver;

/// High/low/close of one period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodRange {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl PeriodRange {
    pub fn width(&self) -> f64 {
        self.high - self.low
    }
}

/// Running sums for the current period plus the last completed period's range.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PeriodState {
    pub period_start: Option<DateTime<Utc>>,
    pub cumulative_price_volume: f64,
    pub cumulative_volume: f64,
    /// Σ volume·(price − vwap)² over the current period.
    pub sum_squared_deviation: f64,
    /// `None` until a bar with volume lands in the current period.
    pub current: Option<PeriodRange>,
    pub previous: Option<PeriodRange>,
    pub bars_in_period: usize,
}

impl PeriodState {
    pub fn has_completed_one_period(&self) -> bool {
        self.previous.is_some()
    }

    /// Volume-weighted mean since the period start; `None` without volume.
    pub fn central_value(&self) -> Option<f64> {
        if self.cumulative_volume > 0.0 {
            Some(self.cumulative_price_volume / self.cumulative_volume)
        } else {
            None
        }
    }

    /// Volume-weighted variance of price around the central value.
    pub fn variance(&self) -> Option<f64> {
        if self.cumulative_volume > 0.0 {
            Some((self.sum_squared_deviation / self.cumulative_volume).max(0.0))
        } else {
            None
        }
    }

    fn clear_period(&mut self) {
        self.cumulative_price_volume = 0.0;
        self.cumulative_volume = 0.0;
        self.sum_squared_deviation = 0.0;
        self.current = None;
        self.bars_in_period = 0;
    }
}

/// What a bar did to the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarEffect {
    /// Bar precedes the anchor; nothing accumulated.
    Inactive,
    Continued,
    NewPeriod,
}

/// Volume-weighted accumulation that resets at period boundaries.
#[derive(Debug, Clone)]
pub struct Accumulator {
    resolver: PeriodResolver,
    price_source: PriceSource,
    state: PeriodState,
    origin: Option<DateTime<Utc>>,
}

impl Accumulator {
    pub fn new(resolver: PeriodResolver, price_source: PriceSource) -> Self {
        Self {
            resolver,
            price_source,
            state: PeriodState::default(),
            origin: None,
        }
    }

    pub fn state(&self) -> &PeriodState {
        &self.state
    }

    pub fn resolver(&self) -> &PeriodResolver {
        &self.resolver
    }

    /// Feed the next bar. Bars must arrive in increasing timestamp order.
    pub fn process_bar(&mut self, bar: &Bar) -> BarEffect {
        let origin = *self.origin.get_or_insert(bar.timestamp);
        let Some(start) = self.resolver.period_start_of(bar.timestamp, Some(origin)) else {
            return BarEffect::Inactive;
        };

        let new_period =
            self.resolver
                .is_new_period(bar.timestamp, self.state.period_start, Some(origin));
        let effect = if new_period {
            self.on_period_complete();
            self.state.period_start = Some(start);
            trace!(period_start = %start, "Opened new period");
            BarEffect::NewPeriod
        } else {
            BarEffect::Continued
        };

        // Unusable bars may open a period but leave the sums alone.
        if self.accepts(bar) {
            self.accumulate(bar);
        }
        effect
    }

    /// Whether `bar` feeds the sums: positive volume and finite prices.
    pub fn accepts(&self, bar: &Bar) -> bool {
        bar.has_volume()
            && self.price_source.price(bar).is_finite()
            && bar.high.is_finite()
            && bar.low.is_finite()
            && bar.close.is_finite()
    }

    /// Close the running period: keep its range as the previous period and clear the sums.
    pub fn on_period_complete(&mut self) {
        if self.state.bars_in_period > 0 {
            self.state.previous = self.state.current;
        }
        self.state.clear_period();
    }

    /// Forget everything, including the first-bar origin.
    pub fn reset(&mut self) {
        self.state = PeriodState::default();
        self.origin = None;
    }

    fn accumulate(&mut self, bar: &Bar) {
        let price = self.price_source.price(bar);
        let volume = bar.volume;
        let state = &mut self.state;

        let mean_before = state.central_value().unwrap_or(price);
        state.cumulative_price_volume += price * volume;
        state.cumulative_volume += volume;
        let mean_after = state.cumulative_price_volume / state.cumulative_volume;
        state.sum_squared_deviation += volume * (price - mean_before) * (price - mean_after);

        state.current = Some(match state.current {
            Some(range) => PeriodRange {
                high: range.high.max(bar.high),
                low: range.low.min(bar.low),
                close: bar.close,
            },
            None => PeriodRange {
                high: bar.high,
                low: bar.low,
                close: bar.close,
            },
        });
        state.bars_in_period += 1;
    }
}

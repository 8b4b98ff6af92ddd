use periodband_core::{BarSource, Timeframe};
use tracing::{debug, info};

use crate::accumulator::{Accumulator, BarEffect, PeriodState};
use crate::bands::{BandResult, BandStrategy};
use crate::config::{ConfigChange, ConfigFallback, EngineConfig, PreviousConfiguration, ResolvedConfig};
use crate::period::{coerce, Coercion, PeriodResolver};

/// Progress through the bar history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessingCursor {
    /// `None` until the first bar is processed.
    pub last_processed_index: Option<usize>,
    pub needs_full_recalculation: bool,
}

impl ProcessingCursor {
    pub fn next_index(&self) -> usize {
        self.last_processed_index.map_or(0, |i| i + 1)
    }

    fn advance(&mut self, index: usize) {
        self.last_processed_index = Some(index);
    }

    fn invalidate(&mut self) {
        self.last_processed_index = None;
        self.needs_full_recalculation = true;
    }
}

/// What one [`BandEngine::calculate`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalculateReport {
    /// Closed bars processed during this call.
    pub processed: usize,
    /// History was discarded and replayed from bar 0.
    pub full_recalculation: bool,
    /// The band strategy was replaced without touching history.
    pub strategy_switched: bool,
}

/// Drives the accumulator and band strategy bar by bar.
///
/// The host calls [`calculate`](Self::calculate) with increasing bar indices. Only closed
/// bars are accumulated; a forming last bar gets a provisional result that is recomputed
/// on every call until it closes.
pub struct BandEngine {
    active: ResolvedConfig,
    pending: Option<ResolvedConfig>,
    snapshot: PreviousConfiguration,
    coercion: Coercion,
    accumulator: Accumulator,
    strategy: Box<dyn BandStrategy>,
    cursor: ProcessingCursor,
    outputs: Vec<Option<BandResult>>,
    provisional: Option<(usize, Option<BandResult>)>,
    calls: u64,
}

impl std::fmt::Debug for BandEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BandEngine")
            .field("snapshot", &self.snapshot)
            .field("coercion", &self.coercion)
            .field("strategy", &self.strategy)
            .field("cursor", &self.cursor)
            .field("state", self.accumulator.state())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

impl BandEngine {
    pub fn new(config: &EngineConfig, timeframe: Timeframe) -> Self {
        Self::from_resolved(config.resolve(), timeframe)
    }

    pub fn from_resolved(resolved: ResolvedConfig, timeframe: Timeframe) -> Self {
        let (accumulator, coercion) = build_accumulator(&resolved, timeframe);
        Self {
            snapshot: PreviousConfiguration::capture(&resolved, timeframe),
            strategy: resolved.band.build(),
            active: resolved,
            pending: None,
            coercion,
            accumulator,
            cursor: ProcessingCursor::default(),
            outputs: Vec::new(),
            provisional: None,
            calls: 0,
        }
    }

    /// Stage a new configuration. It takes effect at the next throttled change check.
    pub fn set_config(&mut self, config: &EngineConfig) {
        self.pending = Some(config.resolve());
    }

    /// Discard all derived state; the next call replays the history.
    pub fn invalidate(&mut self) {
        self.cursor.invalidate();
    }

    /// Process every closed bar up to and including `bar_index`.
    pub fn calculate(&mut self, source: &impl BarSource, bar_index: usize) -> CalculateReport {
        let mut report = CalculateReport::default();

        self.calls += 1;
        if self.calls % self.active.change_check_interval as u64 == 0 {
            report.strategy_switched =
                self.check_for_changes(source.timeframe()) == ConfigChange::BandOnly;
        }

        let limit = bar_index.saturating_add(1).min(source.closed_count());
        if self.cursor.needs_full_recalculation {
            report.processed = self.full_recalculate(source, limit);
            report.full_recalculation = true;
        }

        for index in self.cursor.next_index()..limit {
            if !self.process_index(source, index) {
                break;
            }
            report.processed += 1;
        }

        self.update_provisional(source, bar_index);
        report
    }

    /// Output for `index`: confirmed for closed bars, provisional for the forming one.
    pub fn output(&self, index: usize) -> Option<&BandResult> {
        if let Some((forming, output)) = &self.provisional {
            if *forming == index {
                return output.as_ref();
            }
        }
        self.outputs.get(index).and_then(Option::as_ref)
    }

    /// Confirmed outputs, indexed by bar.
    pub fn outputs(&self) -> &[Option<BandResult>] {
        &self.outputs
    }

    pub fn state(&self) -> &PeriodState {
        self.accumulator.state()
    }

    pub fn cursor(&self) -> ProcessingCursor {
        self.cursor
    }

    pub fn coercion(&self) -> Coercion {
        self.coercion
    }

    pub fn resolver(&self) -> &PeriodResolver {
        self.accumulator.resolver()
    }

    pub fn fallbacks(&self) -> &[ConfigFallback] {
        &self.active.fallbacks
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    fn check_for_changes(&mut self, timeframe: Timeframe) -> ConfigChange {
        if let Some(pending) = self.pending.take() {
            self.active = pending;
        }
        let next = PreviousConfiguration::capture(&self.active, timeframe);
        let change = self.snapshot.diff(&next);

        if next.band != self.snapshot.band {
            self.strategy = next.band.build();
        }
        match change {
            ConfigChange::Unchanged => {}
            ConfigChange::BandOnly => {
                info!(from = %self.snapshot.band, to = %next.band, "Band strategy switched");
            }
            ConfigChange::History => {
                info!(
                    policy = %next.policy,
                    timeframe = %next.timeframe,
                    "Configuration change invalidates history"
                );
                let (accumulator, coercion) = build_accumulator(&self.active, timeframe);
                self.accumulator = accumulator;
                self.coercion = coercion;
                self.cursor.invalidate();
            }
        }

        self.snapshot = next;
        change
    }

    fn full_recalculate(&mut self, source: &impl BarSource, limit: usize) -> usize {
        self.accumulator.reset();
        self.outputs.clear();
        self.provisional = None;
        self.cursor.last_processed_index = None;

        let chunk = self.active.replay_chunk_size;
        let mut processed = 0;
        'replay: for chunk_start in (0..limit).step_by(chunk) {
            let chunk_end = (chunk_start + chunk).min(limit);
            for index in chunk_start..chunk_end {
                if !self.process_index(source, index) {
                    break 'replay;
                }
                processed += 1;
            }
            debug!(from = chunk_start, to = chunk_end, "Replayed chunk");
        }

        self.cursor.needs_full_recalculation = false;
        info!(bars = processed, "Full recalculation complete");
        processed
    }

    fn process_index(&mut self, source: &impl BarSource, index: usize) -> bool {
        let Some(bar) = source.bar(index) else {
            return false;
        };
        debug_assert_eq!(self.outputs.len(), index);

        let accepted = self.accumulator.accepts(bar);
        let effect = self.accumulator.process_bar(bar);
        let output = band_output(
            self.strategy.as_ref(),
            self.accumulator.state(),
            effect,
            accepted,
            self.outputs.last().copied().flatten(),
        );
        self.outputs.push(output);
        self.cursor.advance(index);
        true
    }

    fn update_provisional(&mut self, source: &impl BarSource, bar_index: usize) {
        self.provisional = None;
        let count = source.count();
        if !source.last_bar_forming() || count == 0 || bar_index.saturating_add(1) < count {
            return;
        }
        let index = count - 1;
        if self.cursor.next_index() != index {
            return;
        }
        let Some(bar) = source.bar(index) else {
            return;
        };

        let mut preview = self.accumulator.clone();
        let accepted = preview.accepts(bar);
        let effect = preview.process_bar(bar);
        let output = band_output(
            self.strategy.as_ref(),
            preview.state(),
            effect,
            accepted,
            self.outputs.last().copied().flatten(),
        );
        self.provisional = Some((index, output));
    }
}

fn build_accumulator(resolved: &ResolvedConfig, timeframe: Timeframe) -> (Accumulator, Coercion) {
    let coercion = coerce(resolved.policy, timeframe);
    let resolver = PeriodResolver::new(coercion.policy, resolved.timezone);
    (Accumulator::new(resolver, resolved.price_source), coercion)
}

/// Bars the accumulator skipped repeat the previous output instead of leaving a gap.
fn band_output(
    strategy: &dyn BandStrategy,
    state: &PeriodState,
    effect: BarEffect,
    accepted: bool,
    previous: Option<BandResult>,
) -> Option<BandResult> {
    match effect {
        BarEffect::Inactive => None,
        _ if !accepted => previous,
        _ => state
            .central_value()
            .map(|central| strategy.compute(state, central)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BandConfig, BandKind, ResetMode};
    use chrono::{Duration, TimeZone, Utc};
    use periodband_core::{Bar, BarSeries, PriceSource};

    fn hourly_bars(count: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let base = 100.0 + (i % 7) as f64 - (i % 3) as f64;
                Bar::new(
                    start + Duration::hours(i as i64),
                    base,
                    base + 2.0,
                    base - 1.5,
                    base + 0.5,
                    10.0 + (i % 5) as f64,
                )
            })
            .collect()
    }

    fn config(interval: usize) -> EngineConfig {
        EngineConfig {
            change_check_interval: interval,
            ..Default::default()
        }
    }

    #[test]
    fn test_cursor_advances_per_bar() {
        let series = BarSeries::from_bars(Timeframe::Hour(1), hourly_bars(5));
        let mut engine = BandEngine::new(&config(10), Timeframe::Hour(1));
        assert_eq!(engine.cursor().last_processed_index, None);

        let report = engine.calculate(&series, 2);
        assert_eq!(report.processed, 3);
        assert_eq!(engine.cursor().last_processed_index, Some(2));

        let report = engine.calculate(&series, 4);
        assert_eq!(report.processed, 2);
        assert_eq!(engine.outputs().len(), 5);
    }

    #[test]
    fn test_forming_bar_not_accumulated() {
        let bars = hourly_bars(4);
        let mut series = BarSeries::from_bars(Timeframe::Hour(1), bars[..3].to_vec());
        series.update_forming(bars[3]);

        let mut engine = BandEngine::new(&config(10), Timeframe::Hour(1));
        let report = engine.calculate(&series, 3);
        assert_eq!(report.processed, 3);
        assert_eq!(engine.outputs().len(), 3);
        assert_eq!(engine.state().bars_in_period, 3);
        let provisional = *engine.output(3).unwrap();

        // Confirming the same bar yields the provisional value.
        series.close_forming();
        engine.calculate(&series, 3);
        assert_eq!(engine.outputs().len(), 4);
        assert_eq!(engine.output(3), Some(&provisional));
    }

    #[test]
    fn test_change_check_is_throttled() {
        let series = BarSeries::from_bars(Timeframe::Hour(1), hourly_bars(30));
        let mut engine = BandEngine::new(&config(10), Timeframe::Hour(1));
        engine.calculate(&series, 0);

        engine.set_config(&EngineConfig {
            reset: ResetMode::Never,
            ..config(10)
        });
        for index in 1..9 {
            assert!(!engine.calculate(&series, index).full_recalculation);
        }
        // Tenth call runs the check.
        let report = engine.calculate(&series, 9);
        assert!(report.full_recalculation);
        assert_eq!(report.processed, 10);
        assert_eq!(engine.cursor().last_processed_index, Some(9));
        assert!(!engine.cursor().needs_full_recalculation);
    }

    #[test]
    fn test_band_switch_keeps_history() {
        let series = BarSeries::from_bars(Timeframe::Hour(1), hourly_bars(8));
        let mut engine = BandEngine::new(&config(1), Timeframe::Hour(1));
        engine.calculate(&series, 4);
        let before: Vec<_> = engine.outputs().to_vec();
        let state = *engine.state();

        engine.set_config(&EngineConfig {
            band: BandConfig {
                kind: BandKind::Dispersion,
                ..Default::default()
            },
            ..config(1)
        });
        let report = engine.calculate(&series, 5);
        assert!(report.strategy_switched);
        assert!(!report.full_recalculation);
        assert_eq!(engine.strategy_name(), "dispersion");
        assert_eq!(&engine.outputs()[..5], before.as_slice());
        assert_ne!(*engine.state(), state);
    }

    #[test]
    fn test_timeframe_change_triggers_replay() {
        let mut series = BarSeries::from_bars(Timeframe::Hour(1), hourly_bars(6));
        let mut engine = BandEngine::new(&config(1), Timeframe::Hour(1));
        engine.calculate(&series, 5);

        series.set_timeframe(Timeframe::Minute(30));
        let report = engine.calculate(&series, 5);
        assert!(report.full_recalculation);
        assert_eq!(report.processed, 6);
    }

    #[test]
    fn test_invalidate_replays_in_chunks() {
        let series = BarSeries::from_bars(Timeframe::Hour(1), hourly_bars(50));
        let mut engine = BandEngine::new(
            &EngineConfig {
                replay_chunk_size: 7,
                ..config(10)
            },
            Timeframe::Hour(1),
        );
        engine.calculate(&series, 49);
        let expected = engine.outputs().to_vec();

        engine.invalidate();
        let report = engine.calculate(&series, 49);
        assert!(report.full_recalculation);
        assert_eq!(report.processed, 50);
        assert_eq!(engine.outputs(), expected.as_slice());
    }

    #[test]
    fn test_index_past_end_is_clamped() {
        let series = BarSeries::from_bars(Timeframe::Hour(1), hourly_bars(3));
        let mut engine = BandEngine::new(&config(10), Timeframe::Hour(1));
        let report = engine.calculate(&series, 100);
        assert_eq!(report.processed, 3);
        assert!(engine.output(100).is_none());

        let report = engine.calculate(&series, usize::MAX);
        assert_eq!(report.processed, 0);
        assert_eq!(engine.outputs().len(), 3);
    }

    #[test]
    fn test_nan_price_repeats_previous_output() {
        let mut bars = hourly_bars(6);
        bars[2].close = f64::NAN;
        let series = BarSeries::from_bars(Timeframe::Hour(1), bars);
        let mut engine = BandEngine::new(
            &EngineConfig {
                price_source: PriceSource::Close,
                ..config(10)
            },
            Timeframe::Hour(1),
        );
        engine.calculate(&series, 5);

        assert_eq!(engine.output(2), engine.output(1));
        assert_eq!(engine.state().bars_in_period, 5);
        for output in engine.outputs().iter().flatten() {
            assert!(output.central_value.is_finite());
            assert!(output.upper.map_or(true, f64::is_finite));
            assert!(output.lower.map_or(true, f64::is_finite));
        }
    }

    #[test]
    fn test_out_of_order_bars_do_not_open_periods() {
        let mut bars = hourly_bars(6);
        // Bar 3 repeats bar 2's timestamp, bar 4 is dated before bar 0.
        bars[3].timestamp = bars[2].timestamp;
        bars[4].timestamp = bars[0].timestamp - Duration::hours(3);
        let mut series = BarSeries::new(Timeframe::Hour(1));
        let mut engine = BandEngine::new(&config(10), Timeframe::Hour(1));
        for (i, bar) in bars.iter().enumerate() {
            series.push(*bar);
            engine.calculate(&series, i);
        }

        let state = engine.state();
        assert_eq!(state.period_start, Some(bars[0].timestamp));
        assert_eq!(state.bars_in_period, 6);
        assert!(!state.has_completed_one_period());
        assert!(engine.outputs().iter().all(Option::is_some));

        let single = {
            let mut engine = BandEngine::new(&config(10), Timeframe::Hour(1));
            engine.calculate(&BarSeries::from_bars(Timeframe::Hour(1), bars.clone()), 5);
            engine
        };
        assert_eq!(single.outputs(), engine.outputs());
    }

    #[test]
    fn test_coarse_timeframe_coerces_policy() {
        let engine = BandEngine::new(
            &EngineConfig {
                reset: ResetMode::FixedDuration,
                ..Default::default()
            },
            Timeframe::Daily,
        );
        assert!(engine.coercion().downgraded_from.is_some());
        assert_eq!(engine.resolver().policy(), engine.coercion().policy);
    }
}

pub mod accumulator;
pub mod bands;
pub mod config;
pub mod dispersion;
pub mod engine;
pub mod error;
pub mod period;
pub mod pivot;
pub mod range;

pub use accumulator::{Accumulator, BarEffect, PeriodRange, PeriodState};
pub use bands::{BandResult, BandSpec, BandStrategy, SUBLEVEL_COUNT};
pub use config::{ConfigChange, ConfigFallback, EngineConfig, PreviousConfiguration, ResolvedConfig};
pub use engine::{BandEngine, CalculateReport, ProcessingCursor};
pub use error::ConfigError;
pub use period::{coerce, CalendarPeriod, Coercion, PeriodResolver, ResetPolicy};

use chrono::offset::LocalResult;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use periodband_core::{PriceSource, Timeframe};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::bands::BandSpec;
use crate::dispersion::DEFAULT_DISPERSION_MULTIPLIER;
use crate::error::ConfigError;
use crate::period::{CalendarPeriod, ResetPolicy};
use crate::pivot::DEFAULT_PIVOT_DEPTH;
use crate::range::DEFAULT_RANGE_FRACTION;

/// Anchor timestamps are entered as `dd/MM/yyyy HH:mm`.
pub const ANCHOR_FORMAT: &str = "%d/%m/%Y %H:%M";

// ---------------------------------------------------------------------------
// Raw configuration (as read from TOML)
// ---------------------------------------------------------------------------

/// Reset policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMode {
    Anchor,
    #[default]
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Session,
    FixedDuration,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedSession {
    Sydney,
    Tokyo,
    #[default]
    London,
    NewYork,
}

/// Start hour (0-23, reference timezone) of each named session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionHours {
    pub sydney: u32,
    pub tokyo: u32,
    pub london: u32,
    pub new_york: u32,
}

impl Default for SessionHours {
    fn default() -> Self {
        Self {
            sydney: 22,
            tokyo: 0,
            london: 8,
            new_york: 13,
        }
    }
}

impl SessionHours {
    pub fn hour(&self, session: NamedSession) -> u32 {
        match session {
            NamedSession::Sydney => self.sydney,
            NamedSession::Tokyo => self.tokyo,
            NamedSession::London => self.london,
            NamedSession::NewYork => self.new_york,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandKind {
    #[default]
    Range,
    Pivot,
    Dispersion,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BandConfig {
    pub kind: BandKind,
    /// Range fraction or dispersion multiplier.
    pub multiplier: Option<f64>,
    /// Pivot depth, 1 to 3.
    pub depth: Option<i64>,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub reset: ResetMode,
    /// `dd/MM/yyyy HH:mm` in `timezone`; used when `reset = "anchor"`.
    pub anchor: Option<String>,
    pub session: NamedSession,
    pub sessions: SessionHours,
    /// Bucket length for `reset = "fixed_duration"`.
    pub fixed_hours: u32,
    /// IANA name of the reference timezone for sessions and anchors.
    pub timezone: String,
    pub price_source: PriceSource,
    pub band: BandConfig,
    /// Configuration changes are looked for once every this many calls.
    pub change_check_interval: usize,
    pub replay_chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reset: ResetMode::Daily,
            anchor: None,
            session: NamedSession::London,
            sessions: SessionHours::default(),
            fixed_hours: 4,
            timezone: "UTC".to_string(),
            price_source: PriceSource::Typical,
            band: BandConfig::default(),
            change_check_interval: 10,
            replay_chunk_size: 4096,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Turn the raw values into engine settings, falling back to safe defaults.
    pub fn resolve(&self) -> ResolvedConfig {
        let mut fallbacks = Vec::new();

        let timezone = match parse_timezone(&self.timezone) {
            Ok(tz) => tz,
            Err(_) => {
                fallbacks.push(ConfigFallback::UnknownTimezone {
                    input: self.timezone.clone(),
                });
                Tz::UTC
            }
        };

        let policy = match self.reset {
            ResetMode::Anchor => self.resolve_anchor(timezone, &mut fallbacks),
            ResetMode::Daily => ResetPolicy::Calendar(CalendarPeriod::Daily),
            ResetMode::Weekly => ResetPolicy::Calendar(CalendarPeriod::Weekly),
            ResetMode::Monthly => ResetPolicy::Calendar(CalendarPeriod::Monthly),
            ResetMode::Yearly => ResetPolicy::Calendar(CalendarPeriod::Yearly),
            ResetMode::Session => {
                let hour = self.sessions.hour(self.session);
                if hour > 23 {
                    fallbacks.push(ConfigFallback::SessionHourClamped {
                        session: self.session,
                        hour,
                    });
                }
                ResetPolicy::Session(hour.min(23))
            }
            ResetMode::FixedDuration => {
                let hours = self.fixed_hours.clamp(1, 24);
                if hours != self.fixed_hours {
                    fallbacks.push(ConfigFallback::FixedHoursClamped {
                        hours: self.fixed_hours,
                    });
                }
                ResetPolicy::FixedDuration(hours)
            }
            ResetMode::Never => ResetPolicy::Never,
        };

        let band = self.resolve_band(&mut fallbacks);

        for fallback in &fallbacks {
            warn!(?fallback, "Configuration fallback applied");
        }

        ResolvedConfig {
            policy,
            timezone,
            price_source: self.price_source,
            band,
            change_check_interval: self.change_check_interval.max(1),
            replay_chunk_size: self.replay_chunk_size.max(1),
            fallbacks,
        }
    }

    fn resolve_anchor(&self, timezone: Tz, fallbacks: &mut Vec<ConfigFallback>) -> ResetPolicy {
        let input = self.anchor.as_deref().unwrap_or_default();
        match parse_anchor(input, timezone) {
            Ok(anchor) => ResetPolicy::AnchorPoint(anchor),
            Err(e) => {
                fallbacks.push(ConfigFallback::AnchorDisabled {
                    input: input.to_string(),
                    reason: e.to_string(),
                });
                ResetPolicy::Calendar(CalendarPeriod::Daily)
            }
        }
    }

    fn band_multiplier(&self, default: f64, fallbacks: &mut Vec<ConfigFallback>) -> f64 {
        match self.band.multiplier {
            Some(value) if value.is_finite() => value,
            Some(value) => {
                fallbacks.push(ConfigFallback::MultiplierReset { value });
                default
            }
            None => default,
        }
    }

    fn resolve_band(&self, fallbacks: &mut Vec<ConfigFallback>) -> BandSpec {
        match self.band.kind {
            BandKind::Range => BandSpec::Range {
                fraction: self.band_multiplier(DEFAULT_RANGE_FRACTION, fallbacks),
            },
            BandKind::Dispersion => BandSpec::Dispersion {
                multiplier: self.band_multiplier(DEFAULT_DISPERSION_MULTIPLIER, fallbacks),
            },
            BandKind::Pivot => {
                let depth = match self.band.depth {
                    Some(depth) if (1..=3).contains(&depth) => depth as u8,
                    Some(depth) => {
                        fallbacks.push(ConfigFallback::DepthClamped { depth });
                        depth.clamp(1, 3) as u8
                    }
                    None => DEFAULT_PIVOT_DEPTH,
                };
                BandSpec::Pivot { depth }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// A local recovery applied while resolving the configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigFallback {
    /// Anchor missing or unparseable; daily resets are used instead.
    AnchorDisabled { input: String, reason: String },
    UnknownTimezone { input: String },
    SessionHourClamped { session: NamedSession, hour: u32 },
    FixedHoursClamped { hours: u32 },
    MultiplierReset { value: f64 },
    DepthClamped { depth: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub policy: ResetPolicy,
    pub timezone: Tz,
    pub price_source: PriceSource,
    pub band: BandSpec,
    pub change_check_interval: usize,
    pub replay_chunk_size: usize,
    pub fallbacks: Vec<ConfigFallback>,
}

/// Parse a `dd/MM/yyyy HH:mm` wall time in `tz`.
pub fn parse_anchor(input: &str, tz: Tz) -> Result<DateTime<Utc>, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidAnchor {
        input: input.to_string(),
        reason,
    };
    let naive = NaiveDateTime::parse_from_str(input.trim(), ANCHOR_FORMAT)
        .map_err(|e| invalid(e.to_string()))?;
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(invalid(format!("{} does not exist in {}", naive, tz))),
    }
}

pub fn parse_timezone(input: &str) -> Result<Tz, ConfigError> {
    input
        .trim()
        .parse::<Tz>()
        .map_err(|_| ConfigError::UnknownTimezone(input.to_string()))
}

// ---------------------------------------------------------------------------
// Change detection
// ---------------------------------------------------------------------------

/// How a configuration change affects already-computed history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    Unchanged,
    /// Only the band strategy differs; existing period state stays valid.
    BandOnly,
    /// Accumulation inputs differ; history must be replayed.
    History,
}

/// Snapshot of every setting the engine's output depends on, compared wholesale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviousConfiguration {
    pub policy: ResetPolicy,
    pub timezone: Tz,
    pub price_source: PriceSource,
    pub timeframe: Timeframe,
    pub band: BandSpec,
}

impl PreviousConfiguration {
    pub fn capture(resolved: &ResolvedConfig, timeframe: Timeframe) -> Self {
        Self {
            policy: resolved.policy,
            timezone: resolved.timezone,
            price_source: resolved.price_source,
            timeframe,
            band: resolved.band,
        }
    }

    pub fn diff(&self, next: &Self) -> ConfigChange {
        if self == next {
            ConfigChange::Unchanged
        } else if self.history_key() == next.history_key() {
            ConfigChange::BandOnly
        } else {
            ConfigChange::History
        }
    }

    fn history_key(&self) -> (ResetPolicy, Tz, PriceSource, Timeframe) {
        (self.policy, self.timezone, self.price_source, self.timeframe)
    }
}

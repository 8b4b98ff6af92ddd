use chrono::offset::LocalResult;
use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use periodband_core::{
    Timeframe, SECONDS_PER_DAY, SECONDS_PER_HOUR, SECONDS_PER_MONTH, SECONDS_PER_WEEK,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Calendar granularity for calendar-based resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarPeriod {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// When accumulation restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetPolicy {
    /// One boundary at the anchor; bars before it have no value.
    AnchorPoint(DateTime<Utc>),
    Calendar(CalendarPeriod),
    /// Daily boundary at the given start hour (0-23) in the reference timezone.
    Session(u32),
    /// Boundaries at every UTC hour that is a multiple of N.
    FixedDuration(u32),
    Never,
}

impl ResetPolicy {
    /// Longest bar span at which this policy still resolves a boundary.
    /// `None` means any bar span is acceptable.
    fn max_bar_seconds(&self) -> Option<i64> {
        match self {
            ResetPolicy::AnchorPoint(_) | ResetPolicy::Never => None,
            ResetPolicy::Calendar(CalendarPeriod::Daily) => Some(SECONDS_PER_DAY),
            ResetPolicy::Calendar(CalendarPeriod::Weekly) => Some(SECONDS_PER_WEEK),
            ResetPolicy::Calendar(CalendarPeriod::Monthly) => Some(SECONDS_PER_MONTH),
            ResetPolicy::Calendar(CalendarPeriod::Yearly) => None,
            // A session start hour cannot be seen on bars of a day or longer.
            ResetPolicy::Session(_) => Some(SECONDS_PER_DAY - 1),
            ResetPolicy::FixedDuration(hours) => Some(i64::from(*hours) * SECONDS_PER_HOUR),
        }
    }
}

impl fmt::Display for ResetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetPolicy::AnchorPoint(ts) => write!(f, "anchor({})", ts.format("%Y-%m-%d %H:%M")),
            ResetPolicy::Calendar(period) => f.write_str(match period {
                CalendarPeriod::Daily => "daily",
                CalendarPeriod::Weekly => "weekly",
                CalendarPeriod::Monthly => "monthly",
                CalendarPeriod::Yearly => "yearly",
            }),
            ResetPolicy::Session(hour) => write!(f, "session({hour:02}:00)"),
            ResetPolicy::FixedDuration(hours) => write!(f, "every {hours}h"),
            ResetPolicy::Never => write!(f, "never"),
        }
    }
}

/// Outcome of fitting a policy to the bar granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coercion {
    pub policy: ResetPolicy,
    /// The requested policy, when it had to be downgraded.
    pub downgraded_from: Option<ResetPolicy>,
}

/// Downgrade `policy` to the finest calendar period that can be resolved on `timeframe` bars.
pub fn coerce(policy: ResetPolicy, timeframe: Timeframe) -> Coercion {
    let span = timeframe.nominal_seconds();
    let feasible = policy.max_bar_seconds().map_or(true, |max| span <= max);
    if feasible {
        return Coercion {
            policy,
            downgraded_from: None,
        };
    }

    let period = if span <= SECONDS_PER_DAY {
        CalendarPeriod::Daily
    } else if span <= SECONDS_PER_WEEK {
        CalendarPeriod::Weekly
    } else if span <= SECONDS_PER_MONTH {
        CalendarPeriod::Monthly
    } else {
        CalendarPeriod::Yearly
    };
    let coerced = ResetPolicy::Calendar(period);
    warn!(
        requested = %policy,
        coerced = %coerced,
        timeframe = %timeframe,
        "Reset policy finer than bar granularity, downgrading"
    );
    Coercion {
        policy: coerced,
        downgraded_from: Some(policy),
    }
}

/// Decides where periods start and when a bar crosses into a new one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodResolver {
    policy: ResetPolicy,
    timezone: Tz,
}

impl PeriodResolver {
    pub fn new(policy: ResetPolicy, timezone: Tz) -> Self {
        Self { policy, timezone }
    }

    pub fn policy(&self) -> ResetPolicy {
        self.policy
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Start of the period containing `timestamp`.
    ///
    /// `origin` is the first bar seen and only matters for [`ResetPolicy::Never`].
    /// Returns `None` for bars before an anchor.
    pub fn period_start_of(
        &self,
        timestamp: DateTime<Utc>,
        origin: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match self.policy {
            ResetPolicy::AnchorPoint(anchor) => (timestamp >= anchor).then_some(anchor),
            ResetPolicy::Calendar(period) => Some(calendar_floor(timestamp, period)),
            ResetPolicy::Session(hour) => Some(session_start(timestamp, hour, self.timezone)),
            ResetPolicy::FixedDuration(hours) => Some(fixed_floor(timestamp, hours)),
            ResetPolicy::Never => Some(origin.unwrap_or(timestamp)),
        }
    }

    /// Whether `timestamp` lies in a later period than `current_period_start`.
    ///
    /// An earlier start (out-of-order input) is never a new period.
    pub fn is_new_period(
        &self,
        timestamp: DateTime<Utc>,
        current_period_start: Option<DateTime<Utc>>,
        origin: Option<DateTime<Utc>>,
    ) -> bool {
        match self.period_start_of(timestamp, origin) {
            None => false,
            Some(start) => current_period_start.map_or(true, |current| start > current),
        }
    }
}

fn utc(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)
}

fn calendar_floor(timestamp: DateTime<Utc>, period: CalendarPeriod) -> DateTime<Utc> {
    let date = timestamp.date_naive();
    let start = match period {
        CalendarPeriod::Daily => date,
        CalendarPeriod::Weekly => {
            date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
        }
        CalendarPeriod::Monthly => date.with_day(1).unwrap_or(date),
        CalendarPeriod::Yearly => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
    };
    utc(start.and_time(NaiveTime::MIN))
}

fn fixed_floor(timestamp: DateTime<Utc>, hours: u32) -> DateTime<Utc> {
    let hours = hours.clamp(1, 24);
    let hour = timestamp.hour();
    let bucket = hour - hour % hours;
    let date = timestamp.date_naive();
    utc(date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(bucket)))
}

/// Most recent wall-clock occurrence of `start_hour` in `tz`, at or before `timestamp`.
fn session_start(timestamp: DateTime<Utc>, start_hour: u32, tz: Tz) -> DateTime<Utc> {
    let local = timestamp.with_timezone(&tz).naive_local();
    let hour = local.hour();
    let floored = local.date().and_time(NaiveTime::MIN) + Duration::hours(i64::from(hour));
    // Hour-of-day distance, so sessions that span midnight resolve to the previous day.
    let distance = (i64::from(hour) - i64::from(start_hour.min(23))).rem_euclid(24);
    local_to_utc(floored - Duration::hours(distance), tz)
}

/// Ambiguous wall times pick the earliest instant; times inside a gap shift forward.
pub(crate) fn local_to_utc(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    resolve_local(naive, tz).unwrap_or_else(|| utc(naive))
}

pub(crate) fn resolve_local(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => (1..=120).find_map(|minutes| {
            tz.from_local_datetime(&(naive + Duration::minutes(minutes)))
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
        }),
    }
}

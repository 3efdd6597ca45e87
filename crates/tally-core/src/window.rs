//! Reconciliation windows.
//!
//! A window is the day-long interval one reconciliation cycle applies to. It is
//! computed for "today" in a configured IANA timezone and spans from the first
//! instant of the local day to its last microsecond, both carrying the local
//! UTC offset.

use std::fmt;

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveTime, SecondsFormat, TimeDelta, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest DST gap probed when a local midnight does not exist.
const MAX_MIDNIGHT_GAP_MINUTES: i64 = 120;

/// A closed interval `[start, end]` of one local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

impl Window {
    /// Creates a window from explicit bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `start` is after `end`.
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Result<Self> {
        if start > end {
            return Err(Error::invalid_argument(format!(
                "window start {start} is after window end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// First instant of the window.
    #[must_use]
    pub const fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }

    /// Last instant of the window.
    #[must_use]
    pub const fn end(&self) -> DateTime<FixedOffset> {
        self.end
    }

    /// Window start as ISO-8601 with offset, e.g. `2025-06-09T00:00:00+02:00`.
    #[must_use]
    pub fn start_iso(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::AutoSi, false)
    }

    /// Window end as ISO-8601 with offset, e.g. `2025-06-09T23:59:59.999999+02:00`.
    #[must_use]
    pub fn end_iso(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::AutoSi, false)
    }

    /// Local calendar date the window covers.
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    /// Returns true if `instant` lies within `[start, end]`, bounds inclusive.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start.with_timezone(&Utc) <= instant && instant <= self.end.with_timezone(&Utc)
    }

    /// Returns true once `now` is past the window end.
    #[must_use]
    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        now > self.end.with_timezone(&Utc)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start_iso(), self.end_iso())
    }
}

/// Computes day windows in a fixed timezone.
#[derive(Debug, Clone, Copy)]
pub struct WindowCalculator {
    tz: Tz,
}

impl WindowCalculator {
    /// Creates a calculator for an IANA timezone identifier such as `Europe/Berlin`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the identifier is not a known timezone.
    pub fn new(timezone: &str) -> Result<Self> {
        let tz = timezone
            .parse::<Tz>()
            .map_err(|e| Error::config(format!("invalid timezone '{timezone}': {e}")))?;
        Ok(Self { tz })
    }

    /// Returns the timezone windows are computed in.
    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.tz
    }

    /// Computes the window for the current day.
    ///
    /// # Errors
    ///
    /// Returns an error if the local day boundaries cannot be resolved.
    pub fn compute(&self) -> Result<Window> {
        self.compute_at(Utc::now())
    }

    /// Computes the window for the local day containing `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the local day boundaries cannot be resolved.
    pub fn compute_at(&self, now: DateTime<Utc>) -> Result<Window> {
        self.window_for_date(now.with_timezone(&self.tz).date_naive())
    }

    /// Computes the window covering a specific local date.
    ///
    /// # Errors
    ///
    /// Returns an error if the local day boundaries cannot be resolved.
    pub fn window_for_date(&self, date: NaiveDate) -> Result<Window> {
        let next = date
            .succ_opt()
            .ok_or_else(|| Error::invalid_argument(format!("no day follows {date}")))?;

        let start = self.start_of_day(date)?;
        let end = self.start_of_day(next)? - TimeDelta::microseconds(1);

        Window::new(start.fixed_offset(), end.fixed_offset())
    }

    fn start_of_day(&self, date: NaiveDate) -> Result<DateTime<Tz>> {
        let midnight = date.and_time(NaiveTime::MIN);

        // Zones that shift clocks at midnight have no 00:00 on that day; the day
        // then starts at the first representable local time after the gap.
        (0..=MAX_MIDNIGHT_GAP_MINUTES)
            .find_map(|minutes| {
                self.tz
                    .from_local_datetime(&(midnight + TimeDelta::minutes(minutes)))
                    .earliest()
            })
            .ok_or_else(|| Error::Internal {
                message: format!("cannot resolve start of {date} in {}", self.tz.name()),
            })
    }
}

/// Computes today's window in `timezone`.
///
/// # Errors
///
/// Returns [`Error::Config`] for an unknown timezone identifier.
pub fn compute_window(timezone: &str) -> Result<Window> {
    WindowCalculator::new(timezone)?.compute()
}

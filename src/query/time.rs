//! Time input parsing and half-open time ranges

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, Utc};

use crate::error::{FetchError, Result};

/// Naive date-time layouts tried in order. `%.f` also matches an absent
/// fractional part.
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a user supplied timestamp into UTC.
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DDTHH:MM:SS`,
/// each with optional fractional seconds and an optional trailing `Z`.
/// Inputs without an offset are taken as UTC; RFC 3339 inputs with a
/// numeric offset are converted to UTC.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = trimmed.strip_suffix('Z').unwrap_or(trimmed);
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
            return Ok(dt.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(naive, DATE_FORMAT) {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc());
        }
    }

    Err(FetchError::InvalidTimeFormat(input.to_string()))
}

/// Render a timestamp the way chunk envelopes carry it.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Half-open `[start, end)` interval with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// Construct a range; an empty or inverted range is `InvalidConfig`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(FetchError::InvalidConfig(format!(
                "time range start {} must be before end {}",
                format_timestamp(&start),
                format_timestamp(&end)
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse both bounds with [`parse_timestamp`] and construct the range.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_timestamp(start)?, parse_timestamp(end)?)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.start <= *ts && *ts < self.end
    }

    /// `[start + offset, start + offset + width)` clipped to this range, or
    /// `None` when nothing of it falls inside.
    pub fn subrange(&self, offset: TimeDelta, width: TimeDelta) -> Option<TimeRange> {
        let start = self.start.checked_add_signed(offset)?;
        let end = start
            .checked_add_signed(width)
            .map_or(self.end, |end| end.min(self.end));
        (self.start <= start && start < end).then_some(TimeRange { start, end })
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            format_timestamp(&self.start),
            format_timestamp(&self.end)
        )
    }
}

//! Timestamp conversion at the edges and wall-clock week arithmetic.

use chrono::{DateTime, Days, LocalResult, SecondsFormat, TimeDelta, TimeZone, Timelike, Utc};

use crate::model::{Ms, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    BadTimestamp(String),
    OutOfRange(Ms),
    EmptyOccurrence { week: u32 },
}

impl std::fmt::Display for CalendarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalendarError::BadTimestamp(s) => write!(f, "bad timestamp: {s}"),
            CalendarError::OutOfRange(ms) => write!(f, "timestamp out of range: {ms}"),
            CalendarError::EmptyOccurrence { week } => {
                write!(f, "week {} collapses to an empty interval", week + 1)
            }
        }
    }
}

impl std::error::Error for CalendarError {}

/// Parse an RFC 3339 / ISO-8601 timestamp with offset into Unix ms.
pub fn parse_timestamp(s: &str) -> Result<Ms, CalendarError> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| CalendarError::BadTimestamp(format!("{s}: {e}")))
}

/// Format Unix ms as UTC RFC 3339 with millisecond precision.
pub fn format_timestamp(ms: Ms) -> String {
    match Utc.timestamp_millis_opt(ms) {
        LocalResult::Single(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        _ => ms.to_string(),
    }
}

/// Hour of day (UTC) of an instant.
pub fn hour_of_day(ms: Ms) -> Option<u32> {
    Utc.timestamp_millis_opt(ms).single().map(|dt| dt.hour())
}

/// Add whole days in `tz` wall-clock time, keeping the local time of day.
/// Crossing a DST change therefore moves the absolute instant by the offset delta.
pub fn shift_days<Tz: TimeZone>(tz: &Tz, ms: Ms, days: u64) -> Result<Ms, CalendarError> {
    let instant = tz
        .timestamp_millis_opt(ms)
        .single()
        .ok_or(CalendarError::OutOfRange(ms))?;
    let local = instant
        .naive_local()
        .checked_add_days(Days::new(days))
        .ok_or(CalendarError::OutOfRange(ms))?;
    let shifted = match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        // Local time skipped by a forward jump: land just past the gap.
        LocalResult::None => tz
            .from_local_datetime(&(local + TimeDelta::hours(1)))
            .earliest()
            .ok_or(CalendarError::OutOfRange(ms))?,
    };
    Ok(shifted.timestamp_millis())
}

/// Expand `span` into `weeks` occurrences, occurrence k shifted by 7k days.
pub fn weekly_occurrences<Tz: TimeZone>(
    tz: &Tz,
    span: Span,
    weeks: u32,
) -> Result<Vec<Span>, CalendarError> {
    let mut out = Vec::with_capacity(weeks as usize);
    for week in 0..weeks {
        let days = u64::from(week) * 7;
        let start = shift_days(tz, span.start, days)?;
        let end = shift_days(tz, span.end, days)?;
        if start >= end {
            return Err(CalendarError::EmptyOccurrence { week });
        }
        out.push(Span::new(start, end));
    }
    Ok(out)
}

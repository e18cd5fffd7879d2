use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimeRangeError {
    #[error("unrecognized time expression '{0}' (expected forms like '30m', '4h', 'last 2d')")]
    InvalidRelative(String),

    #[error("unrecognized timestamp '{0}' (expected '2023-01-01', '2023-01-01 08:30', '2023-01-01 08:30:00', or RFC 3339)")]
    InvalidInstant(String),

    #[error("--end requires --start")]
    EndWithoutStart,

    #[error("time range is empty: end {end} is not after start {start}")]
    EmptyWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// A half-open search window `[start, end)`. Immutable once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TimeRangeError> {
        if end <= start {
            return Err(TimeRangeError::EmptyWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

/// Resolve a relative or absolute time specification into a concrete window.
///
/// Precedence: a relative expression wins over absolute bounds; a lone
/// `start` runs to `now`; with nothing given the window defaults to the
/// last 4 hours. `now` is passed in so resolution stays deterministic.
pub fn resolve(
    relative: Option<&str>,
    start: Option<&str>,
    end: Option<&str>,
    now: DateTime<Utc>,
) -> Result<TimeWindow, TimeRangeError> {
    if let Some(expr) = relative {
        let span = parse_relative(expr)?;
        let start = now
            .checked_sub_signed(span)
            .ok_or_else(|| TimeRangeError::InvalidRelative(expr.to_string()))?;
        return TimeWindow::new(start, now);
    }

    match (start, end) {
        (Some(s), e) => {
            let start = parse_instant(s)?;
            let end = match e {
                Some(e) => parse_instant(e)?,
                None => now,
            };
            TimeWindow::new(start, end)
        }
        (None, Some(_)) => Err(TimeRangeError::EndWithoutStart),
        (None, None) => TimeWindow::new(now - Duration::hours(4), now),
    }
}

/// Parse a relative expression: `<n><unit>` with unit m/h/d, optionally
/// prefixed with the word "last".
fn parse_relative(expr: &str) -> Result<Duration, TimeRangeError> {
    let trimmed = expr.trim();
    let body = trimmed
        .strip_prefix("last")
        .or_else(|| trimmed.strip_prefix("Last"))
        .unwrap_or(trimmed)
        .trim();

    let Some((unit_start, _)) = body.char_indices().last() else {
        return Err(TimeRangeError::InvalidRelative(expr.to_string()));
    };
    let (value_str, unit) = body.split_at(unit_start);
    let value: i64 = value_str
        .trim()
        .parse()
        .map_err(|_| TimeRangeError::InvalidRelative(expr.to_string()))?;

    if value <= 0 {
        return Err(TimeRangeError::InvalidRelative(expr.to_string()));
    }

    let secs = match unit {
        "m" => value.checked_mul(60),
        "h" => value.checked_mul(3600),
        "d" => value.checked_mul(86_400),
        _ => None,
    };

    // Duration::seconds panics near i64::MAX/1000; reject instead.
    secs.filter(|s| *s < i64::MAX / 1000)
        .map(Duration::seconds)
        .ok_or_else(|| TimeRangeError::InvalidRelative(expr.to_string()))
}

/// Parse an absolute timestamp in one of the accepted textual formats.
///
/// RFC 3339 stamps keep their offset; naive stamps are taken as UTC.
fn parse_instant(value: &str) -> Result<DateTime<Utc>, TimeRangeError> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(TimeRangeError::InvalidInstant(value.to_string()))
}

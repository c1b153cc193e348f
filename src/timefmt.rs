//! Wire timestamps. Clients send either full RFC3339 or a bare
//! `YYYY-MM-DDTHH:MM:SS` literal, which is read at the server's local offset.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, SecondsFormat, TimeZone, Utc};

use crate::limits::DAY_MS;
use crate::model::Ms;

const LOCAL_LITERAL: &str = "%Y-%m-%dT%H:%M:%S";
const DAY_LITERAL: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    Instant(String),
    Day(String),
    Offset(String),
}

impl std::fmt::Display for TimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeError::Instant(s) => {
                write!(f, "bad timestamp {s:?}: expected RFC3339 or YYYY-MM-DDTHH:MM:SS")
            }
            TimeError::Day(s) => write!(f, "bad date {s:?}: expected YYYY-MM-DD"),
            TimeError::Offset(s) => write!(f, "bad UTC offset {s:?}: expected +HH:MM"),
        }
    }
}

impl std::error::Error for TimeError {}

/// Parse `Z`, `UTC`, `+HH:MM` or `-HH:MM`.
pub fn parse_offset(s: &str) -> Result<FixedOffset, TimeError> {
    let t = s.trim();
    if t.eq_ignore_ascii_case("z") || t.eq_ignore_ascii_case("utc") {
        return Ok(utc());
    }
    let err = || TimeError::Offset(s.to_string());
    let (sign, rest) = match t.as_bytes().first() {
        Some(b'+') => (1, &t[1..]),
        Some(b'-') => (-1, &t[1..]),
        _ => return Err(err()),
    };
    let (hh, mm) = rest.split_once(':').ok_or_else(err)?;
    let hours: i32 = hh.parse().map_err(|_| err())?;
    let minutes: i32 = mm.parse().map_err(|_| err())?;
    if hours > 23 || minutes > 59 {
        return Err(err());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(err)
}

pub fn utc() -> FixedOffset {
    Utc.fix()
}

/// Normalize a wire timestamp to an absolute instant.
pub fn parse_instant(text: &str, local: FixedOffset) -> Result<Ms, TimeError> {
    let t = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Ok(dt.timestamp_millis());
    }
    let naive = NaiveDateTime::parse_from_str(t, LOCAL_LITERAL)
        .map_err(|_| TimeError::Instant(text.to_string()))?;
    local
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| TimeError::Instant(text.to_string()))
}

/// Local midnight at the start of `YYYY-MM-DD`.
pub fn parse_day(text: &str, local: FixedOffset) -> Result<Ms, TimeError> {
    let t = text.trim();
    let date =
        NaiveDate::parse_from_str(t, DAY_LITERAL).map_err(|_| TimeError::Day(text.to_string()))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| TimeError::Day(text.to_string()))?;
    local
        .from_local_datetime(&midnight)
        .single()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| TimeError::Day(text.to_string()))
}

/// `[from, to]` as whole local days → `[from 00:00, to + 1 day 00:00)`.
pub fn day_range(from: &str, to: &str, local: FixedOffset) -> Result<(Ms, Ms), TimeError> {
    let start = parse_day(from, local)?;
    let end_inclusive = parse_day(to, local)?;
    Ok((start, end_inclusive + DAY_MS))
}

/// RFC3339 in UTC, millisecond precision only when needed.
pub fn format_instant(ms: Ms) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        None => ms.to_string(),
    }
}

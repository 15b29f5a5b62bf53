//! Timestamp parsing for wire values
//!
//! Sources disagree on whether a zone offset is present, so the accepted
//! formats are tried in a fixed order and the first one that parses wins.
//! Zone-less values are read as UTC.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Unix seconds of `0001-01-01T00:00:00Z`, the zero instant
const ZERO_INSTANT_SECS: i64 = -62_135_596_800;

/// Zone-less formats, tried after RFC3339
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.3f", "%Y-%m-%dT%H:%M:%S"];

/// Fixed-precision format with an explicit offset, tried last
const OFFSET_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

/// The missing-value sentinel for timestamp fields
pub fn zero_instant() -> DateTime<Utc> {
    DateTime::from_timestamp(ZERO_INSTANT_SECS, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn is_zero_instant(ts: &DateTime<Utc>) -> bool {
    *ts == zero_instant()
}

/// Parse a wire timestamp against the accepted formats in order
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    DateTime::parse_from_str(value, OFFSET_FORMAT)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Wire form of a timestamp
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

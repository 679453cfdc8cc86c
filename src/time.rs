use chrono::{DateTime, Datelike, SecondsFormat, TimeZone, Utc};

use crate::{Error, Result};

/// Timestamps at or beyond 2^53 ms are rejected; they exceed the range the
/// vendor formats can faithfully carry.
pub const MAX_TIMESTAMP_MS: i64 = 1 << 53;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Decode a millisecond Unix timestamp into UTC.
pub fn to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    if !(0..MAX_TIMESTAMP_MS).contains(&ms) {
        return Err(Error::InvalidTimestamp(ms));
    }
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(Error::InvalidTimestamp(ms))
}

/// UTC calendar year a millisecond timestamp falls in. Boundaries are
/// strict UTC: exactly midnight on January 1st belongs to the new year.
pub fn year_of_timestamp_ms(ms: i64) -> Result<i32> {
    Ok(to_datetime(ms)?.year())
}

/// RFC3339 with millisecond precision and a `Z` suffix.
pub fn rfc3339_millis(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Compact UTC stamp used in generated file names.
pub fn compact_stamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%d-%H%M%S").to_string()
}

//! Simulation Time
//!
//! Tick timestamps are nanoseconds since the Unix epoch. Historical price tables
//! are date-indexed, so every tick lands on midnight UTC of its row's date and
//! all cooldown arithmetic is done in whole calendar days.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

/// Nanoseconds since Unix epoch (1970-01-01 00:00:00 UTC).
pub type Nanos = i64;

pub const NANOS_PER_SEC: i64 = 1_000_000_000;
pub const SECS_PER_DAY: i64 = 86_400;
pub const NANOS_PER_DAY: i64 = NANOS_PER_SEC * SECS_PER_DAY;

/// Midnight UTC of `date` as Nanos.
///
/// `None` outside the representable range (roughly 1677-09-21 to 2262-04-11).
#[inline]
pub fn date_to_nanos(date: NaiveDate) -> Option<Nanos> {
    date.and_hms_opt(0, 0, 0)
        .and_then(|dt| dt.and_utc().timestamp().checked_mul(NANOS_PER_SEC))
}

/// Convert Nanos back to a UTC datetime. Out-of-range values clamp to the epoch.
#[inline]
pub fn nanos_to_datetime(nanos: Nanos) -> DateTime<Utc> {
    let secs = nanos.div_euclid(NANOS_PER_SEC);
    let nsecs = nanos.rem_euclid(NANOS_PER_SEC) as u32;
    Utc.timestamp_opt(secs, nsecs)
        .single()
        .unwrap_or_default()
}

/// Calendar date of a timestamp.
#[inline]
pub fn nanos_to_date(nanos: Nanos) -> NaiveDate {
    nanos_to_datetime(nanos).date_naive()
}

/// Whole days elapsed from `earlier` to `later`, floored.
///
/// Negative when `later` precedes `earlier`; a partial day never counts.
#[inline]
pub fn calendar_days_between(earlier: Nanos, later: Nanos) -> i64 {
    later.saturating_sub(earlier).div_euclid(NANOS_PER_DAY)
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

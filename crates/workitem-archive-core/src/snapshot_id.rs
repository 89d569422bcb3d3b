//! Snapshot id arithmetic and day-bucket helpers.
//!
//! A snapshot id is `<origin>-<millis>` with the millis zero-padded to 13
//! digits, so for a fixed origin the ids sort lexicographically in creation
//! order. The same property lets the archive partition by creation day and
//! cluster by id.

use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};

use crate::errors::{ArchiveError, Result};

/// Width of the zero-padded millis suffix.
const SUFFIX_WIDTH: usize = 13;

/// Build a snapshot id for `origin` created at `millis`.
pub fn make(origin: &str, millis: i64) -> String {
    format!("{}-{:0width$}", origin, millis, width = SUFFIX_WIDTH)
}

/// Split a snapshot id into `(origin, millis)`.
///
/// # Errors
///
/// Returns [`ArchiveError::InvariantViolation`] when the id has no `-`,
/// an empty origin, or a non-numeric suffix.
pub fn parse(id: &str) -> Result<(&str, i64)> {
    let (origin, suffix) = id
        .rsplit_once('-')
        .ok_or_else(|| ArchiveError::invariant(format!("malformed snapshot id '{}'", id)))?;
    if origin.is_empty() {
        return Err(ArchiveError::invariant(format!(
            "snapshot id '{}' has an empty origin",
            id
        )));
    }
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ArchiveError::invariant(format!(
            "snapshot id '{}' has a non-numeric suffix",
            id
        )));
    }
    let millis = suffix
        .parse::<i64>()
        .map_err(|e| ArchiveError::invariant(format!("snapshot id '{}': {}", id, e)))?;
    Ok((origin, millis))
}

/// Origin id of a snapshot id.
pub fn origin_of(id: &str) -> Result<&str> {
    parse(id).map(|(origin, _)| origin)
}

/// The id the next snapshot of `origin` receives at `now_millis`.
///
/// Never returns an id that sorts at or before `previous`, even when two
/// snapshots are taken within the same millisecond or the clock stepped back.
pub fn next_after(origin: &str, previous: Option<&str>, now_millis: i64) -> Result<(String, i64)> {
    if origin.is_empty() {
        return Err(ArchiveError::invariant("origin id must not be empty"));
    }
    let mut millis = now_millis;
    if let Some(prev) = previous {
        let (_, prev_millis) = parse(prev)?;
        if millis <= prev_millis {
            millis = prev_millis + 1;
        }
    }
    Ok((make(origin, millis), millis))
}

pub fn to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

/// Day bucket (UTC calendar date) of a timestamp.
pub fn day_of(millis: i64) -> NaiveDate {
    to_datetime(millis).date_naive()
}

/// First millisecond of `day`.
pub fn start_of_day(day: NaiveDate) -> i64 {
    day.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or(0)
}

/// Last millisecond of `day`.
pub fn end_of_day(day: NaiveDate) -> i64 {
    start_of_day(next_day(day)) - 1
}

pub fn next_day(day: NaiveDate) -> NaiveDate {
    day.checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX)
}

/// Remote path of a snapshot: `<yyyy>/<MM>/<origin>.xml`, relative to the
/// transport root.
pub fn remote_path(origin: &str, created: DateTime<Utc>) -> String {
    format!("{}/{}.xml", created.format("%Y/%m"), origin)
}

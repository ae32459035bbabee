//! Minutes-since-epoch helpers.
//!
//! Every scheduling timestamp in the workspace (due times, query times, report
//! window ends) is an `i64` count of whole minutes since the Unix epoch, UTC.

use chrono::{DateTime, Utc};

/// Whole minutes since the Unix epoch.
pub type Minutes = i64;

pub const MINUTES_IN_HOUR: Minutes = 60;
pub const MINUTES_IN_DAY: Minutes = 1_440;

/// Convert an instant to minutes since epoch, flooring partial minutes.
pub fn to_minutes(at: DateTime<Utc>) -> Minutes {
    at.timestamp().div_euclid(60)
}

/// Convert minutes since epoch back to an instant.
///
/// Out-of-range values collapse to the epoch.
pub fn from_minutes(minutes: Minutes) -> DateTime<Utc> {
    DateTime::from_timestamp(minutes.saturating_mul(60), 0).unwrap_or_default()
}

/// Current wall-clock time in minutes.
pub fn now_minutes() -> Minutes {
    to_minutes(Utc::now())
}

/// Render minutes as `YYYY-MM-DD HH:MM` for log lines.
pub fn format_minutes(minutes: Minutes) -> String {
    from_minutes(minutes).format("%Y-%m-%d %H:%M").to_string()
}

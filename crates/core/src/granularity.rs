//! Time-bucket enumerations shared by data granularity and job frequency.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::IntervalConfig;
use crate::error::CoreError;
use crate::time::{from_minutes, to_minutes, Minutes, MINUTES_IN_DAY, MINUTES_IN_HOUR};

/// Size of one data bucket in the underlying time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl Granularity {
    pub const ALL: [Granularity; 5] = [
        Granularity::Minute,
        Granularity::Hour,
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
    ];

    /// Nominal length of one bucket in minutes. A month is a fixed 43800.
    pub fn minutes(self) -> Minutes {
        match self {
            Granularity::Minute => 1,
            Granularity::Hour => MINUTES_IN_HOUR,
            Granularity::Day => MINUTES_IN_DAY,
            Granularity::Week => 10_080,
            Granularity::Month => 43_800,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }

    /// Floor a minutes-since-epoch timestamp to the start of its bucket (UTC).
    ///
    /// Hour floors to the top of the hour, day to midnight, week to the most
    /// recent Monday midnight (a Sunday rolls back to the Monday six days
    /// earlier) and month to the first of the month.
    pub fn floor_minutes(self, minutes: Minutes) -> Minutes {
        match self {
            Granularity::Minute => minutes,
            Granularity::Hour => minutes - minutes.rem_euclid(MINUTES_IN_HOUR),
            Granularity::Day => minutes - minutes.rem_euclid(MINUTES_IN_DAY),
            Granularity::Week => {
                let day = minutes.div_euclid(MINUTES_IN_DAY);
                // Epoch day 0 is a Thursday, three days after a Monday.
                let monday = day - (day + 3).rem_euclid(7);
                monday * MINUTES_IN_DAY
            }
            Granularity::Month => {
                let date = from_minutes(minutes).date_naive();
                NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                    .and_then(|first| first.and_hms_opt(0, 0, 0))
                    .map(|naive| to_minutes(naive.and_utc()))
                    .unwrap_or_else(|| minutes - minutes.rem_euclid(MINUTES_IN_DAY))
            }
        }
    }

    /// Floor an instant to the start of its bucket.
    pub fn floor(self, at: DateTime<Utc>) -> DateTime<Utc> {
        from_minutes(self.floor_minutes(to_minutes(at)))
    }

    /// Lookback window size (number of buckets) fed to detection.
    pub fn intervals(self, config: &IntervalConfig) -> u32 {
        match self {
            Granularity::Minute => config.minutes,
            Granularity::Hour => config.hours,
            Granularity::Day => config.days,
            Granularity::Week => config.weeks,
            Granularity::Month => config.months,
        }
    }

    /// Number of buckets to look forward when rendering a job timeline.
    pub fn look_forward_periods(self) -> u32 {
        match self {
            Granularity::Minute => 12,
            // Half a day
            Granularity::Hour => 12,
            // Two weeks
            Granularity::Day => 14,
            // Three months
            Granularity::Week => 13,
            // A year
            Granularity::Month => 12,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" => Ok(Granularity::Minute),
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            _ => Err(CoreError::UnknownGranularity(s.to_string())),
        }
    }
}

/// How often a job runs. `Instant` jobs run once on demand and are never queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Instant,
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl Frequency {
    /// The bucket that defines this cadence, or `None` for `Instant`.
    pub fn granularity(self) -> Option<Granularity> {
        match self {
            Frequency::Instant => None,
            Frequency::Minute => Some(Granularity::Minute),
            Frequency::Hour => Some(Granularity::Hour),
            Frequency::Day => Some(Granularity::Day),
            Frequency::Week => Some(Granularity::Week),
            Frequency::Month => Some(Granularity::Month),
        }
    }

    pub fn minutes(self) -> Minutes {
        self.granularity().map(Granularity::minutes).unwrap_or(0)
    }

    pub fn is_periodic(self) -> bool {
        self != Frequency::Instant
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Instant => "instant",
            other => other.granularity().map(Granularity::as_str).unwrap_or("instant"),
        }
    }
}

impl From<Granularity> for Frequency {
    fn from(g: Granularity) -> Self {
        match g {
            Granularity::Minute => Frequency::Minute,
            Granularity::Hour => Frequency::Hour,
            Granularity::Day => Frequency::Day,
            Granularity::Week => Frequency::Week,
            Granularity::Month => Frequency::Month,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("instant") {
            return Ok(Frequency::Instant);
        }
        s.parse::<Granularity>()
            .map(Frequency::from)
            .map_err(|_| CoreError::UnknownFrequency(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn hour_floors_to_top_of_hour() {
        assert_eq!(Granularity::Hour.floor(at(2024, 1, 10, 15, 42)), at(2024, 1, 10, 15, 0));
    }

    #[test]
    fn day_floors_to_midnight() {
        assert_eq!(Granularity::Day.floor(at(2024, 1, 10, 15, 0)), at(2024, 1, 10, 0, 0));
    }

    #[test]
    fn week_floors_to_monday() {
        // 2024-01-10 is a Wednesday; the Monday before is 2024-01-08.
        assert_eq!(Granularity::Week.floor(at(2024, 1, 10, 15, 0)), at(2024, 1, 8, 0, 0));
        // Monday floors to itself.
        assert_eq!(Granularity::Week.floor(at(2024, 1, 8, 9, 30)), at(2024, 1, 8, 0, 0));
    }

    #[test]
    fn week_on_sunday_rolls_back_to_previous_monday() {
        // 2024-01-14 is a Sunday.
        assert_eq!(Granularity::Week.floor(at(2024, 1, 14, 23, 59)), at(2024, 1, 8, 0, 0));
    }

    #[test]
    fn month_floors_to_first_of_month() {
        assert_eq!(Granularity::Month.floor(at(2024, 2, 29, 13, 1)), at(2024, 2, 1, 0, 0));
        assert_eq!(Granularity::Month.floor(at(2024, 12, 31, 23, 59)), at(2024, 12, 1, 0, 0));
    }

    #[test]
    fn minute_floor_is_identity_on_minutes() {
        let m = to_minutes(at(2024, 1, 10, 15, 42));
        assert_eq!(Granularity::Minute.floor_minutes(m), m);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("DAY".parse::<Granularity>().unwrap(), Granularity::Day);
        assert_eq!(" week ".parse::<Frequency>().unwrap(), Frequency::Week);
        assert_eq!("Instant".parse::<Frequency>().unwrap(), Frequency::Instant);
        assert!("fortnight".parse::<Frequency>().is_err());
        assert!(matches!(
            "decade".parse::<Granularity>(),
            Err(CoreError::UnknownGranularity(_))
        ));
    }

    #[test]
    fn instant_frequency_has_no_period() {
        assert_eq!(Frequency::Instant.minutes(), 0);
        assert_eq!(Frequency::Instant.granularity(), None);
        assert!(!Frequency::Instant.is_periodic());
        assert_eq!(Frequency::Month.minutes(), 43_800);
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Frequency::Hour).unwrap();
        assert_eq!(json, "\"hour\"");
        let g: Granularity = serde_json::from_str("\"month\"").unwrap();
        assert_eq!(g, Granularity::Month);
    }

    #[test]
    fn intervals_follow_config() {
        let cfg = IntervalConfig::default();
        assert_eq!(Granularity::Minute.intervals(&cfg), 180);
        assert_eq!(Granularity::Hour.intervals(&cfg), 672);
        assert_eq!(Granularity::Day.intervals(&cfg), 28);
        assert_eq!(Granularity::Week.intervals(&cfg), 12);
        assert_eq!(Granularity::Month.intervals(&cfg), 6);
    }

    proptest! {
        #[test]
        fn floor_is_idempotent_and_not_after_input(
            minutes in 0i64..40_000_000,
            idx in 0usize..5,
        ) {
            let g = Granularity::ALL[idx];
            let once = g.floor_minutes(minutes);
            prop_assert!(once <= minutes);
            prop_assert_eq!(g.floor_minutes(once), once);
        }
    }
}

//! Query parameters shared by every named query.
//!
//! RULE: parameters are validated before any warehouse read is issued.
//! A malformed range or bucket never reaches the event source.

use crate::error::{MetricsError, MetricsResult};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    Day,
    Week,    // ISO weeks, Monday start
    Month,
    Quarter, // join-date cohorts
}

impl TimeBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeBucket::Day     => "day",
            TimeBucket::Week    => "week",
            TimeBucket::Month   => "month",
            TimeBucket::Quarter => "quarter",
        }
    }

    /// First day of the bucket containing `date`.
    pub fn truncate(&self, date: NaiveDate) -> NaiveDate {
        match self {
            TimeBucket::Day => date,
            TimeBucket::Week => {
                date - Duration::days(date.weekday().num_days_from_monday() as i64)
            }
            TimeBucket::Month => {
                NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
            }
            TimeBucket::Quarter => {
                let first_month = (date.month0() / 3) * 3 + 1;
                NaiveDate::from_ymd_opt(date.year(), first_month, 1).unwrap_or(date)
            }
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeBucket {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day"     => Ok(TimeBucket::Day),
            "week"    => Ok(TimeBucket::Week),
            "month"   => Ok(TimeBucket::Month),
            "quarter" => Ok(TimeBucket::Quarter),
            _ => Err(MetricsError::UnknownTimeBucket(s.to_string())),
        }
    }
}

/// Caller-supplied inputs to a named query. Both dates are inclusive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct QueryParams {
    pub time_bucket: TimeBucket,
    pub start_date:  NaiveDate,
    pub end_date:    NaiveDate,
}

impl QueryParams {
    pub fn new(time_bucket: TimeBucket, start_date: NaiveDate, end_date: NaiveDate) -> MetricsResult<Self> {
        if end_date < start_date {
            return Err(MetricsError::InvalidDateRange { start: start_date, end: end_date });
        }
        Ok(Self { time_bucket, start_date, end_date })
    }

    /// Parse the string form used by the CLI: bucket name and `YYYY-MM-DD` dates.
    pub fn parse(time_bucket: &str, start_date: &str, end_date: &str) -> MetricsResult<Self> {
        let bucket: TimeBucket = time_bucket.parse()?;
        let start = parse_date("start_date", start_date)?;
        let end = parse_date("end_date", end_date)?;
        Self::new(bucket, start, end)
    }
}

pub fn parse_date(name: &'static str, value: &str) -> MetricsResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| MetricsError::InvalidParameter {
        name,
        value: value.to_string(),
    })
}

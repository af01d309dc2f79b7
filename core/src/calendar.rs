//! Daily calendar: the gap-free date axis every balance series is laid on.

use crate::error::{MetricsError, MetricsResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// An inclusive, gap-free run of days. One entry per day, never a skip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Calendar {
    pub start: NaiveDate,
    pub end:   NaiveDate,
}

impl Calendar {
    pub fn new(start: NaiveDate, end: NaiveDate) -> MetricsResult<Self> {
        if end < start {
            return Err(MetricsError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// A single-day calendar.
    pub fn day(date: NaiveDate) -> Self {
        Self { start: date, end: date }
    }

    pub fn days(self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    pub fn len(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

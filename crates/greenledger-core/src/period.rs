//! Reporting periods (fiscal years) that ledger entries and gaps are scoped to.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodError {
    #[error("fiscal year start month must be 1..=12, got {0}")]
    InvalidStartMonth(u32),
    #[error("period end {end} is before start {start}")]
    Inverted { start: NaiveDate, end: NaiveDate },
    #[error("year {0} out of range")]
    YearOutOfRange(i32),
    #[error("cannot parse reporting period {0:?}: expected YYYY or YYYY-MM-DD..YYYY-MM-DD")]
    Parse(String),
}

/// An inclusive date range a disclosure is reported for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReportingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportingPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, PeriodError> {
        if end < start {
            return Err(PeriodError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// The fiscal year beginning on the first day of `start_month` in `year`.
    pub fn fiscal_year(year: i32, start_month: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&start_month) {
            return Err(PeriodError::InvalidStartMonth(start_month));
        }
        let start = NaiveDate::from_ymd_opt(year, start_month, 1)
            .ok_or(PeriodError::YearOutOfRange(year))?;
        let end = NaiveDate::from_ymd_opt(year + 1, start_month, 1)
            .and_then(|d| d.pred_opt())
            .ok_or(PeriodError::YearOutOfRange(year))?;
        Ok(Self { start, end })
    }

    /// The calendar year `year`.
    pub fn calendar_year(year: i32) -> Result<Self, PeriodError> {
        Self::fiscal_year(year, 1)
    }

    /// The fiscal year that contains `date`.
    pub fn containing(date: NaiveDate, start_month: u32) -> Result<Self, PeriodError> {
        let year = if date.month() >= start_month {
            date.year()
        } else {
            date.year() - 1
        };
        Self::fiscal_year(year, start_month)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Whether an optional `[from, until]` window intersects this period.
    pub fn overlaps(&self, from: Option<NaiveDate>, until: Option<NaiveDate>) -> bool {
        let starts_before_end = from.is_none_or(|f| f <= self.end);
        let ends_after_start = until.is_none_or(|u| u >= self.start);
        starts_before_end && ends_after_start
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let is_calendar = self.start.month() == 1
            && self.start.day() == 1
            && self.end.month() == 12
            && self.end.day() == 31
            && self.start.year() == self.end.year();
        if is_calendar {
            write!(f, "FY{}", self.start.year())
        } else {
            write!(f, "{}..{}", self.start, self.end)
        }
    }
}

impl FromStr for ReportingPeriod {
    type Err = PeriodError;

    /// Accepts "2026", "FY2026", or "2026-07-01..2027-06-30".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((start, end)) = s.split_once("..") {
            let parse = |d: &str| {
                NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d")
                    .map_err(|_| PeriodError::Parse(s.to_string()))
            };
            return Self::new(parse(start)?, parse(end)?);
        }
        let year = s.strip_prefix("FY").unwrap_or(s);
        let year: i32 = year.parse().map_err(|_| PeriodError::Parse(s.to_string()))?;
        Self::calendar_year(year)
    }
}

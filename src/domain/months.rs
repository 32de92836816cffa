//! Calendar month arithmetic for query windows.
//!
//! Every search query this tool issues is scoped either to one calendar month
//! (`created:first..last`) or to a trailing window (`updated:>=start`), so
//! month boundaries have to be exact across leap years and 28/29/30/31-day
//! months.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A calendar month, keyed as `"YYYY-MM"` everywhere it is persisted.
///
/// Internally stored as the first day of the month, which makes range
/// arithmetic plain date arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month(NaiveDate);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid month key {0:?}, expected YYYY-MM")]
pub struct ParseMonthError(String);

impl Month {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(Self)
    }

    /// The month containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        Self(date - Days::new(u64::from(date.day0())))
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    /// Last calendar day of the month (handles leap February).
    pub fn last_day(&self) -> NaiveDate {
        self.0 + Months::new(1) - Days::new(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + Months::new(1))
    }

    pub fn prev(&self) -> Self {
        Self(self.0 - Months::new(1))
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.0.year(), self.0.month())
    }
}

impl FromStr for Month {
    type Err = ParseMonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMonthError(s.to_string());
        let (year, month) = s.split_once('-').ok_or_else(err)?;
        let year: i32 = year.parse().map_err(|_| err())?;
        let month: u32 = month.parse().map_err(|_| err())?;
        Month::new(year, month).ok_or_else(err)
    }
}

impl Serialize for Month {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Month {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MonthVisitor;

        impl de::Visitor<'_> for MonthVisitor {
            type Value = Month;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a month key in YYYY-MM form")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Month, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(MonthVisitor)
    }
}

/// Inclusive sequence of months from `start` to `end`.
///
/// Empty when `start > end`; a single-month span returns exactly one entry.
pub fn month_ranges(start: Month, end: Month) -> Vec<Month> {
    let mut out = Vec::new();
    let mut current = start;
    while current <= end {
        out.push(current);
        current = current.next();
    }
    out
}

/// `months` calendar months before `date`, clamped to the target month's last
/// valid day: one month before March 31 is February 28 (29 in leap years),
/// never a rollover into March.
pub fn months_before(date: NaiveDate, months: u32) -> NaiveDate {
    date - Months::new(months)
}

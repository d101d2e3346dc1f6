use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IntervalUnit {
    Day,
    Week,
    Month,
    Year,
}

impl IntervalUnit {
    /// Single-letter code used when rendering intervals.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Day => "d",
            Self::Week => "w",
            Self::Month => "m",
            Self::Year => "y",
        }
    }
}

/// Calendar interval: a unit and a positive count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub unit: IntervalUnit,
    pub count: i64,
}

impl Interval {
    pub fn new(unit: IntervalUnit, count: i64) -> Self {
        Self { unit, count }
    }

    pub fn days(count: i64) -> Self {
        Self::new(IntervalUnit::Day, count)
    }

    pub fn weeks(count: i64) -> Self {
        Self::new(IntervalUnit::Week, count)
    }

    pub fn months(count: i64) -> Self {
        Self::new(IntervalUnit::Month, count)
    }

    pub fn years(count: i64) -> Self {
        Self::new(IntervalUnit::Year, count)
    }

    pub fn is_valid(&self) -> bool {
        self.count > 0
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::days(0)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.code())
    }
}

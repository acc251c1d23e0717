//! Inclusive calendar date ranges

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// An inclusive range of calendar dates
///
/// Either bound may be absent, meaning unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

impl DateRange {
    /// Create a range from optional bounds
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidRange`] when both bounds are present and
    /// `start > end`.
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self, DomainError> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(DomainError::InvalidRange {
                    start: s.to_string(),
                    end: e.to_string(),
                });
            }
        }
        Ok(Self { start, end })
    }

    /// A range that contains every date
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// Replaces the lower bound
    ///
    /// No ordering check is made here; an inverted range simply matches nothing.
    #[must_use]
    pub fn with_start(mut self, start: NaiveDate) -> Self {
        self.start = Some(start);
        self
    }

    /// Replaces the upper bound
    #[must_use]
    pub fn with_end(mut self, end: NaiveDate) -> Self {
        self.end = Some(end);
        self
    }

    #[must_use]
    pub const fn start(&self) -> Option<NaiveDate> {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> Option<NaiveDate> {
        self.end
    }

    /// Returns true if `date` lies within the range, bounds included
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

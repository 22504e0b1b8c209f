use chrono::{Datelike, Local, Months, NaiveDate};

use crate::error::AggError;

/// Lower bound for form watermarks when a case has never been processed.
pub const EPOCH_TIMESTAMP: &str = "1970-01-01 00:00:00";

pub struct Utils {}

impl Utils {
    pub fn month_start(date: NaiveDate) -> NaiveDate {
        date - chrono::Duration::days(date.day0() as i64)
    }

    /// First day of the month `offset` months away from `date`'s month.
    pub fn shift_month(date: NaiveDate, offset: i32) -> Result<NaiveDate, AggError> {
        let start = Self::month_start(date);
        let shifted = if offset >= 0 {
            start.checked_add_months(Months::new(offset as u32))
        } else {
            start.checked_sub_months(Months::new(offset.unsigned_abs()))
        };
        shifted.ok_or_else(|| {
            AggError::Error(format!("month offset {} from {} is out of range", offset, date))
        })
    }

    pub fn next_month(month: NaiveDate) -> Result<NaiveDate, AggError> {
        Self::shift_month(month, 1)
    }

    pub fn prev_month(month: NaiveDate) -> Result<NaiveDate, AggError> {
        Self::shift_month(month, -1)
    }

    pub fn month_end(month: NaiveDate) -> Result<NaiveDate, AggError> {
        Ok(Self::next_month(month)? - chrono::Duration::days(1))
    }

    pub fn format_date(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    pub fn parse_date(s: &str) -> Result<NaiveDate, AggError> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|e| AggError::Error(format!("invalid date '{}': {}", s, e)))
    }

    /// Timestamps are stored as text in a form that sorts chronologically.
    pub fn now_timestamp() -> String {
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

use chrono::{Datelike, Days, NaiveDate};

use crate::error::ClubPulseError;

pub struct Utils;

impl Utils {
    /// Format a date for a TEXT column (ISO-8601, sorts lexicographically)
    pub fn date_to_db(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    pub fn date_from_db(s: &str) -> Result<NaiveDate, ClubPulseError> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| ClubPulseError::Error(format!("Malformed date in database: '{}'", s)))
    }

    /// First calendar day of the period (month) containing `date`
    pub fn period_start(date: NaiveDate) -> NaiveDate {
        // with_day(1) cannot fail for day 1
        date.with_day(1).unwrap_or(date)
    }

    pub fn same_period(a: NaiveDate, b: NaiveDate) -> bool {
        a.year() == b.year() && a.month() == b.month()
    }

    /// Number of days in the month containing `date`
    pub fn days_in_period(date: NaiveDate) -> u32 {
        let start = Self::period_start(date);
        let next = start
            .checked_add_days(Days::new(32))
            .map(Self::period_start)
            .unwrap_or(start);
        next.signed_duration_since(start).num_days() as u32
    }

    /// Translate a 1-based day-of-period index into a calendar date within the
    /// period containing `reference`, clamping to the period's last day.
    pub fn day_index_to_date(reference: NaiveDate, day_index: u32) -> NaiveDate {
        let day = day_index.clamp(1, Self::days_in_period(reference));
        reference.with_day(day).unwrap_or(reference)
    }

    /// Last day of the period immediately before the one containing `reference`
    pub fn previous_period_end(reference: NaiveDate) -> NaiveDate {
        Self::period_start(reference)
            .pred_opt()
            .unwrap_or(reference)
    }
}

//! INSPIRE publish-month calendar.
//!
//! The dataset is republished on the first Sunday of every month.  The latest
//! publish month is the most recent first Sunday strictly before "today" in
//! Europe/London; running *on* the first Sunday is refused because the
//! upstream may be mid-publish.

use chrono::{Datelike, NaiveDate, Weekday};
use chrono_tz::Europe::London;

use crate::IngestError;

/// A resolved publish month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishMonth {
    /// The first Sunday the month's data appeared.
    pub first_sunday: NaiveDate,
    /// `YYYY-MM` directory label.
    pub label: String,
}

impl PublishMonth {
    fn from_sunday(first_sunday: NaiveDate) -> Self {
        Self {
            label: format!("{:04}-{:02}", first_sunday.year(), first_sunday.month()),
            first_sunday,
        }
    }
}

/// First Sunday of the given month.
fn first_sunday_of(year: i32, month: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start");
    (1..=7)
        .map(|d| NaiveDate::from_ymd_opt(year, month, d).expect("first week exists"))
        .find(|d| d.weekday() == Weekday::Sun)
        .unwrap_or(first)
}

/// The latest publish month as of `today` (already in Europe/London civil
/// time).  Errors with [`IngestError::PublishDay`] when `today` *is* a first
/// Sunday.
pub fn latest_publish_month(today: NaiveDate) -> Result<PublishMonth, IngestError> {
    let this_months = first_sunday_of(today.year(), today.month());

    if today == this_months {
        return Err(IngestError::PublishDay);
    }

    if today > this_months {
        return Ok(PublishMonth::from_sunday(this_months));
    }

    // Before this month's publish: the previous month's data is current.
    let (py, pm) = if today.month() == 1 {
        (today.year() - 1, 12)
    } else {
        (today.year(), today.month() - 1)
    };
    Ok(PublishMonth::from_sunday(first_sunday_of(py, pm)))
}

/// Today's civil date in Europe/London.
pub fn today_in_london() -> NaiveDate {
    chrono::Utc::now().with_timezone(&London).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn first_sundays_known_values() {
        // July 2026: the 1st is a Wednesday, first Sunday is the 5th.
        assert_eq!(first_sunday_of(2026, 7), d(2026, 7, 5));
        // March 2026: the 1st is a Sunday.
        assert_eq!(first_sunday_of(2026, 3), d(2026, 3, 1));
    }

    #[test]
    fn after_first_sunday_uses_current_month() {
        let pm = latest_publish_month(d(2026, 7, 10)).unwrap();
        assert_eq!(pm.first_sunday, d(2026, 7, 5));
        assert_eq!(pm.label, "2026-07");
    }

    #[test]
    fn before_first_sunday_uses_previous_month() {
        // 2026-07-03 is before the first Sunday (the 5th).
        let pm = latest_publish_month(d(2026, 7, 3)).unwrap();
        assert_eq!(pm.first_sunday, d(2026, 6, 7));
        assert_eq!(pm.label, "2026-06");
    }

    #[test]
    fn publish_day_is_refused() {
        let err = latest_publish_month(d(2026, 7, 5)).unwrap_err();
        assert!(matches!(err, IngestError::PublishDay));
    }

    #[test]
    fn january_rolls_back_to_december() {
        // 2027-01-02 precedes January's first Sunday (the 3rd).
        let pm = latest_publish_month(d(2027, 1, 2)).unwrap();
        assert_eq!(pm.first_sunday, d(2026, 12, 6));
        assert_eq!(pm.label, "2026-12");
    }
}

//! Calendar-month arithmetic shared by chargeback, allocation and
//! forecasting. A month is always represented by its first day.

use chrono::{Datelike, Days, Months, NaiveDate};

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Month start `n` months after the month containing `date`.
pub fn add_months(date: NaiveDate, n: u32) -> NaiveDate {
    let start = month_start(date);
    start.checked_add_months(Months::new(n)).unwrap_or(start)
}

/// Month start immediately before the month containing `date`.
pub fn previous_month(date: NaiveDate) -> NaiveDate {
    let start = month_start(date);
    start.checked_sub_months(Months::new(1)).unwrap_or(start)
}

/// Last day of the month containing `date`.
pub fn month_end(date: NaiveDate) -> NaiveDate {
    let next = add_months(date, 1);
    next.pred_opt().unwrap_or(next)
}

pub fn days_in_month(date: NaiveDate) -> u32 {
    month_end(date).day()
}

/// Mid-point of the month, as (day offset from month start) + start.
/// Used to sample a daily-rate projection once per month.
pub fn month_midpoint(date: NaiveDate) -> NaiveDate {
    let start = month_start(date);
    start
        .checked_add_days(Days::new(u64::from(days_in_month(start) / 2)))
        .unwrap_or(start)
}

/// "YYYY-MM" label for logs and reports.
pub fn month_label(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn month_boundaries() {
        assert_eq!(month_start(d(2025, 2, 17)), d(2025, 2, 1));
        assert_eq!(month_end(d(2024, 2, 3)), d(2024, 2, 29));
        assert_eq!(days_in_month(d(2025, 2, 3)), 28);
        assert_eq!(add_months(d(2025, 11, 30), 3), d(2026, 2, 1));
        assert_eq!(previous_month(d(2025, 1, 15)), d(2024, 12, 1));
    }

    #[test]
    fn midpoint_and_label() {
        assert_eq!(month_midpoint(d(2025, 4, 9)), d(2025, 4, 16));
        assert_eq!(month_label(d(2025, 4, 9)), "2025-04");
    }
}

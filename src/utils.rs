use crate::error::{LedgerError, Result};
use chrono::{Datelike, Days, NaiveDate};

pub fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.checked_sub_days(Days::new(1)))
        .ok_or_else(|| LedgerError::invalid("period", format!("no month {:04}-{:02}", year, month)))
}

/// First day of the month before `date`. This is the default "previous month" correction
/// date offered alongside a primary report date.
pub fn previous_month_start(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

/// Parses a period string in the format "YYYY-MM" or "YYYY-MM:YYYY-MM"
/// Returns (start_date, end_date), both inclusive.
pub fn parse_period_string(period: &str) -> Result<(NaiveDate, NaiveDate)> {
    let parts: Vec<&str> = period.split(':').collect();

    let parse_month = |text: &str| {
        let start_str = format!("{}-01", text.trim());
        NaiveDate::parse_from_str(&start_str, "%Y-%m-%d").map_err(|_| {
            LedgerError::invalid(
                "period",
                format!("Invalid date format in period: {}. Expected YYYY-MM", text),
            )
        })
    };

    let (start, end_month) = match parts.as_slice() {
        [single] => {
            let start = parse_month(*single)?;
            (start, start)
        }
        [from, to] => (parse_month(*from)?, parse_month(*to)?),
        _ => {
            return Err(LedgerError::invalid(
                "period",
                format!(
                    "Invalid period format: {}. Expected 'YYYY-MM' or 'YYYY-MM:YYYY-MM'",
                    period
                ),
            ))
        }
    };

    let end = last_day_of_month(end_month.year(), end_month.month())?;
    if end < start {
        return Err(LedgerError::invalid(
            "period",
            format!("Period {} ends before it starts", period),
        ));
    }

    Ok((start, end))
}

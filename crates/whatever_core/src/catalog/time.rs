//! Calendar helpers for due-date arithmetic in a fixed-offset zone.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};

/// Local calendar date of `now` in `tz`.
pub fn local_date(now: DateTime<Utc>, tz: FixedOffset) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Start of the local day containing `now`, as an instant.
pub fn local_midnight(now: DateTime<Utc>, tz: FixedOffset) -> DateTime<Utc> {
    midnight_of(local_date(now, tz), tz)
}

/// Local midnight today plus `days`.
pub fn due_after_days(now: DateTime<Utc>, tz: FixedOffset, days: i64) -> DateTime<Utc> {
    local_midnight(now, tz) + Duration::days(days)
}

/// Days from `today` until the first day of the month `months` ahead.
///
/// `months = 1` is the remainder of the current month.
pub fn remaining_days_in_month(today: NaiveDate, months: u32) -> i64 {
    let month_index = today.month0() + months;
    let year = today.year() + (month_index / 12) as i32;
    let month = month_index % 12 + 1;
    match NaiveDate::from_ymd_opt(year, month, 1) {
        Some(first) => (first - today).num_days(),
        None => 0,
    }
}

fn midnight_of(date: NaiveDate, tz: FixedOffset) -> DateTime<Utc> {
    let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    // A fixed offset has exactly one mapping for every local time.
    match tz.from_local_datetime(&naive).single() {
        Some(local) => local.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    }
}

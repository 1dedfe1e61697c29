use super::local_date;
use crate::db::{Activity, DailyReadTotal};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;

/// Length of the daily totals window.
pub const DAILY_WINDOW_DAYS: i64 = 30;

/// Minutes read per local day for the trailing window ending today.
///
/// Always returns exactly [`DAILY_WINDOW_DAYS`] rows, newest first, with
/// explicit zeros for days without reading.
pub fn daily_totals(
    user_id: &str,
    activity: &[Activity],
    tz: Tz,
    now: DateTime<Utc>,
) -> Vec<DailyReadTotal> {
    let today = now.with_timezone(&tz).date_naive();
    let oldest = today - Duration::days(DAILY_WINDOW_DAYS - 1);

    let mut seconds: HashMap<NaiveDate, i64> = HashMap::new();
    for a in activity.iter().filter(|a| a.duration > 0) {
        let date = local_date(a.start_time, tz);
        if date >= oldest && date <= today {
            *seconds.entry(date).or_insert(0) += a.duration;
        }
    }

    (0..DAILY_WINDOW_DAYS)
        .map(|offset| {
            let date = today - Duration::days(offset);
            DailyReadTotal {
                user_id: user_id.to_string(),
                date: date.format("%Y-%m-%d").to_string(),
                minutes_read: seconds.get(&date).copied().unwrap_or(0) / 60,
            }
        })
        .collect()
}

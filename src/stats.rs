//! Reading statistics cache.
//!
//! Statistics are folded from the activity ledger into cache tables by
//! [`refresh_cache`], which the [`RefreshScheduler`] runs on a fixed interval
//! and on demand. Request paths only ever read the cache.

mod daily;
mod documents;
mod leaderboard;
mod refresh;
mod scheduler;
mod streaks;

pub use daily::{DAILY_WINDOW_DAYS, daily_totals};
pub use documents::document_statistics;
pub use leaderboard::{LeaderboardEntry, Metric, Period, rank};
pub use refresh::{RefreshSummary, refresh_cache};
pub use scheduler::{RefreshHandle, RefreshScheduler};
pub use streaks::compute_streak;

use chrono_tz::Tz;

/// Reported percentages above this are treated as finished.
pub const COMPLETION_THRESHOLD: f64 = 97.0;

/// Snap a 0..100 percentage to 100 once it passes the completion threshold.
pub fn clamp_percentage(raw: f64) -> f64 {
    if raw > COMPLETION_THRESHOLD {
        100.0
    } else {
        raw
    }
}

/// Parse an IANA zone name, falling back to UTC.
pub fn parse_timezone(name: &str) -> Tz {
    name.parse::<Tz>().unwrap_or_else(|_| {
        tracing::warn!(timezone = name, "Unknown timezone, using UTC");
        Tz::UTC
    })
}

/// Bucket sessions by local calendar date in `tz`.
fn local_date(start_time: i64, tz: Tz) -> chrono::NaiveDate {
    crate::db::timestamp_to_datetime(start_time)
        .with_timezone(&tz)
        .date_naive()
}

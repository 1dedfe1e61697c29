use super::local_date;
use crate::db::{Activity, StreakWindow, UserStreak};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;

/// A run of consecutive windows, identified by window start dates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Run {
    start: NaiveDate,
    end: NaiveDate,
    len: i64,
}

/// First day of the window containing `date`. Weeks start on Sunday.
fn window_start(date: NaiveDate, window: StreakWindow) -> NaiveDate {
    match window {
        StreakWindow::Day => date,
        StreakWindow::Week => date - Duration::days(date.weekday().num_days_from_sunday() as i64),
    }
}

fn window_step(window: StreakWindow) -> Duration {
    match window {
        StreakWindow::Day => Duration::days(1),
        StreakWindow::Week => Duration::days(7),
    }
}

/// Last day of the window starting at `start`.
fn window_end(start: NaiveDate, window: StreakWindow) -> NaiveDate {
    start + window_step(window) - Duration::days(1)
}

fn runs(windows: &BTreeSet<NaiveDate>, step: Duration) -> Vec<Run> {
    let mut runs: Vec<Run> = Vec::new();
    for &w in windows {
        match runs.last_mut() {
            Some(run) if run.end + step == w => {
                run.end = w;
                run.len += 1;
            }
            _ => runs.push(Run {
                start: w,
                end: w,
                len: 1,
            }),
        }
    }
    runs
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Compute current and longest streaks for one user and window kind.
///
/// Only sessions with a positive duration count. The current streak is the
/// most recent run when it ends in the window containing `now` or the one
/// before it; otherwise it is zero. Ties for the longest run go to the most
/// recent one. Dates are the first and last local day of the run.
pub fn compute_streak(
    user_id: &str,
    window: StreakWindow,
    activity: &[Activity],
    tz: Tz,
    now: DateTime<Utc>,
) -> UserStreak {
    let windows: BTreeSet<NaiveDate> = activity
        .iter()
        .filter(|a| a.duration > 0)
        .map(|a| window_start(local_date(a.start_time, tz), window))
        .collect();

    let step = window_step(window);
    let runs = runs(&windows, step);

    let longest = runs.iter().fold(None::<Run>, |best, run| match best {
        Some(b) if b.len > run.len => Some(b),
        _ => Some(*run),
    });

    let today = window_start(now.with_timezone(&tz).date_naive(), window);
    let current = runs
        .last()
        .copied()
        .filter(|run| run.end >= today - step);

    UserStreak {
        user_id: user_id.to_string(),
        window,
        max_streak: longest.map_or(0, |r| r.len),
        max_streak_start_date: longest.map(|r| format_date(r.start)),
        max_streak_end_date: longest.map(|r| format_date(window_end(r.end, window))),
        current_streak: current.map_or(0, |r| r.len),
        current_streak_start_date: current.map(|r| format_date(r.start)),
        current_streak_end_date: current.map(|r| format_date(window_end(r.end, window))),
        last_timezone: tz.name().to_string(),
        last_seen: activity.iter().map(|a| a.start_time).max(),
        last_record: now.timestamp(),
    }
}

use crate::db::UserStatistic;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Leaderboard measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Words per minute.
    Wpm,
    /// Seconds read.
    Duration,
    /// Words read.
    Words,
}

/// Leaderboard time partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// All time.
    All,
    /// Trailing year.
    Year,
    /// Trailing month.
    Month,
    /// Trailing week.
    Week,
}

/// One ranked row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    /// User ID.
    pub user_id: String,
    /// Measured value.
    pub value: f64,
}

fn measure(row: &UserStatistic, metric: Metric, period: Period) -> f64 {
    match (metric, period) {
        (Metric::Wpm, Period::All) => row.total_wpm,
        (Metric::Wpm, Period::Year) => row.yearly_wpm,
        (Metric::Wpm, Period::Month) => row.monthly_wpm,
        (Metric::Wpm, Period::Week) => row.weekly_wpm,
        (Metric::Duration, Period::All) => row.total_seconds as f64,
        (Metric::Duration, Period::Year) => row.yearly_seconds as f64,
        (Metric::Duration, Period::Month) => row.monthly_seconds as f64,
        (Metric::Duration, Period::Week) => row.weekly_seconds as f64,
        (Metric::Words, Period::All) => row.total_words_read as f64,
        (Metric::Words, Period::Year) => row.yearly_words_read as f64,
        (Metric::Words, Period::Month) => row.monthly_words_read as f64,
        (Metric::Words, Period::Week) => row.weekly_words_read as f64,
    }
}

/// Sort users descending by one measure. Equal values order by user ID.
pub fn rank(rows: &[UserStatistic], metric: Metric, period: Period) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> = rows
        .iter()
        .map(|row| LeaderboardEntry {
            user_id: row.user_id.clone(),
            value: measure(row, metric, period),
        })
        .collect();

    entries.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    entries
}

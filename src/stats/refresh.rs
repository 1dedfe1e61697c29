use super::{compute_streak, daily_totals, document_statistics, parse_timezone};
use crate::db::{CacheSnapshot, Database, StreakWindow};
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// What one refresh produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Users processed.
    pub users: usize,
    /// Document statistic rows written.
    pub documents: usize,
}

/// Rebuild every cache table from the ledger and swap it in atomically.
///
/// The new snapshot is computed in full before anything is written. A
/// cancellation observed between users, or any error, abandons the rebuild
/// and leaves the previous cache untouched.
pub fn refresh_cache(
    db: &Database,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<RefreshSummary> {
    let start = Instant::now();
    let users = db.list_users()?;
    let words = db.document_words()?;

    let mut snapshot = CacheSnapshot::default();
    for user in &users {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let tz = parse_timezone(&user.timezone);
        let activity = db.user_activity(&user.id)?;
        let percentages = db.latest_percentages(&user.id)?;

        snapshot
            .document_statistics
            .extend(document_statistics(&user.id, &activity, &words, &percentages, now));
        for window in [StreakWindow::Day, StreakWindow::Week] {
            snapshot
                .streaks
                .push(compute_streak(&user.id, window, &activity, tz, now));
        }
        snapshot
            .daily_totals
            .extend(daily_totals(&user.id, &activity, tz, now));
    }
    let computed = start.elapsed();

    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }

    db.replace_cache(&snapshot)?;

    tracing::debug!(
        users = users.len(),
        documents = snapshot.document_statistics.len(),
        compute = ?computed,
        swap = ?(start.elapsed() - computed),
        "Statistics cache rebuilt"
    );

    Ok(RefreshSummary {
        users: users.len(),
        documents: snapshot.document_statistics.len(),
    })
}

use crate::db::{
    CacheSnapshot, DailyReadTotal, Database, DocumentUserStatistic, StreakWindow, UserStatistic,
    UserStreak,
};
use crate::error::Result;
use rusqlite::{OptionalExtension, Row, params};

const STATISTIC_COLUMNS: &str = "document_id, user_id, last_read, percentage, read_percentage, \
     total_time_seconds, total_words_read, total_wpm, \
     yearly_time_seconds, yearly_words_read, yearly_wpm, \
     monthly_time_seconds, monthly_words_read, monthly_wpm, \
     weekly_time_seconds, weekly_words_read, weekly_wpm";

const STREAK_COLUMNS: &str = "user_id, window_kind, max_streak, max_streak_start_date, max_streak_end_date, \
     current_streak, current_streak_start_date, current_streak_end_date, \
     last_timezone, last_seen, last_record";

impl Database {
    // ========== CACHE OPERATIONS ==========

    /// Replace every cache table with `snapshot` in one transaction.
    ///
    /// Readers see either the previous cache or the new one.
    pub fn replace_cache(&self, snapshot: &CacheSnapshot) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute_batch(
            "DELETE FROM document_user_statistics;
             DELETE FROM user_streaks;
             DELETE FROM daily_read_totals;",
        )?;

        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO document_user_statistics ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                STATISTIC_COLUMNS
            ))?;
            for s in &snapshot.document_statistics {
                stmt.execute(params![
                    s.document_id,
                    s.user_id,
                    s.last_read,
                    s.percentage,
                    s.read_percentage,
                    s.total_time_seconds,
                    s.total_words_read,
                    s.total_wpm,
                    s.yearly_time_seconds,
                    s.yearly_words_read,
                    s.yearly_wpm,
                    s.monthly_time_seconds,
                    s.monthly_words_read,
                    s.monthly_wpm,
                    s.weekly_time_seconds,
                    s.weekly_words_read,
                    s.weekly_wpm,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO user_streaks ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                STREAK_COLUMNS
            ))?;
            for s in &snapshot.streaks {
                stmt.execute(params![
                    s.user_id,
                    s.window.as_str(),
                    s.max_streak,
                    s.max_streak_start_date,
                    s.max_streak_end_date,
                    s.current_streak,
                    s.current_streak_start_date,
                    s.current_streak_end_date,
                    s.last_timezone,
                    s.last_seen,
                    s.last_record,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO daily_read_totals (user_id, date, minutes_read) VALUES (?1, ?2, ?3)",
            )?;
            for d in &snapshot.daily_totals {
                stmt.execute(params![d.user_id, d.date, d.minutes_read])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Cached document statistics of a user, most recently read first.
    pub fn document_statistics(&self, user_id: &str) -> Result<Vec<DocumentUserStatistic>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM document_user_statistics
             WHERE user_id = ?1
             ORDER BY last_read DESC, document_id",
            STATISTIC_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![user_id], statistic_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Cached statistics of one document for a user.
    pub fn document_statistic(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentUserStatistic>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM document_user_statistics
                     WHERE user_id = ?1 AND document_id = ?2",
                    STATISTIC_COLUMNS
                ),
                params![user_id, document_id],
                statistic_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Cached streaks of a user, DAY before WEEK.
    pub fn user_streaks(&self, user_id: &str) -> Result<Vec<UserStreak>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM user_streaks WHERE user_id = ?1 ORDER BY window_kind",
            STREAK_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![user_id], streak_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Timezone the cached streaks were computed in.
    pub fn streak_timezone(&self, user_id: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let tz = conn
            .query_row(
                "SELECT last_timezone FROM user_streaks WHERE user_id = ?1 LIMIT 1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(tz)
    }

    /// Cached 30 day totals of a user, newest first.
    pub fn daily_read_totals(&self, user_id: &str) -> Result<Vec<DailyReadTotal>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, date, minutes_read FROM daily_read_totals
             WHERE user_id = ?1 ORDER BY date DESC",
        )?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(DailyReadTotal {
                    user_id: row.get(0)?,
                    date: row.get(1)?,
                    minutes_read: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Leaderboard rows for every user with words read.
    pub fn user_statistics(&self) -> Result<Vec<UserStatistic>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id,
                    SUM(total_words_read), SUM(total_time_seconds),
                    SUM(yearly_words_read), SUM(yearly_time_seconds),
                    SUM(monthly_words_read), SUM(monthly_time_seconds),
                    SUM(weekly_words_read), SUM(weekly_time_seconds)
             FROM document_user_statistics
             GROUP BY user_id
             HAVING SUM(total_words_read) > 0
             ORDER BY user_id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let total_words_read: i64 = row.get(1)?;
                let total_seconds: i64 = row.get(2)?;
                let yearly_words_read: i64 = row.get(3)?;
                let yearly_seconds: i64 = row.get(4)?;
                let monthly_words_read: i64 = row.get(5)?;
                let monthly_seconds: i64 = row.get(6)?;
                let weekly_words_read: i64 = row.get(7)?;
                let weekly_seconds: i64 = row.get(8)?;
                Ok(UserStatistic {
                    user_id: row.get(0)?,
                    total_words_read,
                    total_seconds,
                    total_wpm: words_per_minute(total_words_read, total_seconds),
                    yearly_words_read,
                    yearly_seconds,
                    yearly_wpm: words_per_minute(yearly_words_read, yearly_seconds),
                    monthly_words_read,
                    monthly_seconds,
                    monthly_wpm: words_per_minute(monthly_words_read, monthly_seconds),
                    weekly_words_read,
                    weekly_seconds,
                    weekly_wpm: words_per_minute(weekly_words_read, weekly_seconds),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

/// Words per minute, 0 when nothing was timed.
pub fn words_per_minute(words: i64, seconds: i64) -> f64 {
    if seconds <= 0 {
        return 0.0;
    }
    words as f64 / (seconds as f64 / 60.0)
}

fn statistic_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentUserStatistic> {
    Ok(DocumentUserStatistic {
        document_id: row.get(0)?,
        user_id: row.get(1)?,
        last_read: row.get(2)?,
        percentage: row.get(3)?,
        read_percentage: row.get(4)?,
        total_time_seconds: row.get(5)?,
        total_words_read: row.get(6)?,
        total_wpm: row.get(7)?,
        yearly_time_seconds: row.get(8)?,
        yearly_words_read: row.get(9)?,
        yearly_wpm: row.get(10)?,
        monthly_time_seconds: row.get(11)?,
        monthly_words_read: row.get(12)?,
        monthly_wpm: row.get(13)?,
        weekly_time_seconds: row.get(14)?,
        weekly_words_read: row.get(15)?,
        weekly_wpm: row.get(16)?,
    })
}

fn streak_from_row(row: &Row<'_>) -> rusqlite::Result<UserStreak> {
    let window: String = row.get(1)?;
    let window = StreakWindow::parse(&window).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown streak window '{}'", window).into(),
        )
    })?;

    Ok(UserStreak {
        user_id: row.get(0)?,
        window,
        max_streak: row.get(2)?,
        max_streak_start_date: row.get(3)?,
        max_streak_end_date: row.get(4)?,
        current_streak: row.get(5)?,
        current_streak_start_date: row.get(6)?,
        current_streak_end_date: row.get(7)?,
        last_timezone: row.get(8)?,
        last_seen: row.get(9)?,
        last_record: row.get(10)?,
    })
}

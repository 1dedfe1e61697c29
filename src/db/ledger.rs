use crate::db::catalog::upsert_document_in;
use crate::db::devices::upsert_device_in;
use crate::db::{Activity, Database, Document, NewActivity, NewProgress, ProgressSnapshot, now_timestamp};
use crate::error::{AppError, Result};
use rusqlite::{OptionalExtension, Row, params};
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;

impl Database {
    // ========== ACTIVITY OPERATIONS ==========

    /// Append a batch of reading sessions.
    ///
    /// Document stubs, the device upsert and every activity row share one
    /// transaction. Any error, or a cancellation observed between rows,
    /// drops the transaction uncommitted and nothing persists.
    pub fn record_activity(
        &self,
        user_id: &str,
        device_id: &str,
        device_name: &str,
        items: &[NewActivity],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = now_timestamp();

        let mut seen = HashSet::new();
        for item in items {
            if seen.insert(item.document_id.as_str()) {
                upsert_document_in(&tx, &Document::stub(item.document_id.as_str()), now)?;
            }
        }

        upsert_device_in(&tx, user_id, device_id, device_name, now)?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO activity (user_id, document_id, device_id, start_time, duration,
                                       page, pages, start_percentage, end_percentage, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;

            for item in items {
                if cancel.is_cancelled() {
                    return Err(AppError::Cancelled);
                }
                stmt.execute(params![
                    user_id,
                    item.document_id,
                    device_id,
                    item.start_time,
                    item.duration,
                    item.page,
                    item.pages,
                    item.start_percentage(),
                    item.end_percentage(),
                    now,
                ])?;
            }
        }

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        tx.commit()?;
        Ok(items.len())
    }

    /// Latest session start recorded for a device, 0 when none.
    pub fn last_activity_time(&self, user_id: &str, device_id: &str) -> Result<i64> {
        let conn = self.conn();
        let last = conn.query_row(
            "SELECT COALESCE(MAX(start_time), 0) FROM activity
             WHERE user_id = ?1 AND device_id = ?2",
            params![user_id, device_id],
            |row| row.get(0),
        )?;
        Ok(last)
    }

    /// Page through a user's sessions, newest first.
    pub fn list_activity(
        &self,
        user_id: &str,
        document_id: Option<&str>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Activity>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, document_id, device_id, start_time, duration, page, pages,
                    start_percentage, end_percentage, created_at
             FROM activity
             WHERE user_id = ?1 AND (?2 IS NULL OR document_id = ?2)
             ORDER BY start_time DESC, id DESC
             LIMIT ?3 OFFSET ?4",
        )?;

        let rows = stmt
            .query_map(params![user_id, document_id, limit, offset], activity_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Every session of a user in start order.
    pub fn user_activity(&self, user_id: &str) -> Result<Vec<Activity>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, document_id, device_id, start_time, duration, page, pages,
                    start_percentage, end_percentage, created_at
             FROM activity WHERE user_id = ?1
             ORDER BY start_time, id",
        )?;

        let rows = stmt
            .query_map(params![user_id], activity_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    // ========== PROGRESS OPERATIONS ==========

    /// Append a progress snapshot stamped with `created_at`.
    pub fn insert_progress(
        &self,
        user_id: &str,
        device_name: &str,
        report: &NewProgress,
        created_at: i64,
    ) -> Result<ProgressSnapshot> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = now_timestamp();

        upsert_document_in(&tx, &Document::stub(report.document_id.as_str()), now)?;
        upsert_device_in(&tx, user_id, &report.device_id, device_name, now)?;

        tx.execute(
            "INSERT INTO document_progress (user_id, document_id, device_id, percentage, progress, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                report.document_id,
                report.device_id,
                report.percentage,
                report.progress,
                created_at,
            ],
        )?;

        let stored_name: String = tx.query_row(
            "SELECT device_name FROM devices WHERE user_id = ?1 AND id = ?2",
            params![user_id, report.device_id],
            |row| row.get(0),
        )?;

        tx.commit()?;

        Ok(ProgressSnapshot {
            user_id: user_id.to_string(),
            document_id: report.document_id.clone(),
            device_id: report.device_id.clone(),
            device_name: stored_name,
            percentage: report.percentage,
            progress: report.progress.clone(),
            created_at,
        })
    }

    /// Newest snapshot for a document across all of the user's devices.
    pub fn latest_progress(&self, user_id: &str, document_id: &str) -> Result<Option<ProgressSnapshot>> {
        let conn = self.conn();
        let snapshot = conn
            .query_row(
                "SELECT p.user_id, p.document_id, p.device_id, COALESCE(d.device_name, ''),
                        p.percentage, p.progress, p.created_at
                 FROM document_progress p
                 LEFT JOIN devices d ON d.user_id = p.user_id AND d.id = p.device_id
                 WHERE p.user_id = ?1 AND p.document_id = ?2
                 ORDER BY p.created_at DESC, p.id DESC
                 LIMIT 1",
                params![user_id, document_id],
                |row| {
                    Ok(ProgressSnapshot {
                        user_id: row.get(0)?,
                        document_id: row.get(1)?,
                        device_id: row.get(2)?,
                        device_name: row.get(3)?,
                        percentage: row.get(4)?,
                        progress: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    /// Latest reported fraction per document for a user.
    pub fn latest_percentages(&self, user_id: &str) -> Result<HashMap<String, f64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT p.document_id, p.percentage
             FROM document_progress p
             WHERE p.user_id = ?1 AND p.id = (
                SELECT q.id FROM document_progress q
                WHERE q.user_id = p.user_id AND q.document_id = p.document_id
                ORDER BY q.created_at DESC, q.id DESC
                LIMIT 1
             )",
        )?;

        let latest = stmt
            .query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;

        Ok(latest)
    }
}

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<Activity> {
    Ok(Activity {
        id: row.get(0)?,
        user_id: row.get(1)?,
        document_id: row.get(2)?,
        device_id: row.get(3)?,
        start_time: row.get(4)?,
        duration: row.get(5)?,
        page: row.get(6)?,
        pages: row.get(7)?,
        start_percentage: row.get(8)?,
        end_percentage: row.get(9)?,
        created_at: row.get(10)?,
    })
}

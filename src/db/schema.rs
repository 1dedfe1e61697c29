use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::Arc;

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Lock the shared connection.
    pub(super) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute_batch(
            r#"
            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                admin INTEGER NOT NULL DEFAULT 0,
                timezone TEXT NOT NULL DEFAULT 'UTC',
                created_at INTEGER NOT NULL
            );

            -- Document catalog (never hard-deleted)
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                checksum TEXT,
                filepath TEXT,
                coverfile TEXT,
                title TEXT,
                author TEXT,
                series TEXT,
                series_index INTEGER,
                lang TEXT,
                description TEXT,
                words INTEGER,
                gbid TEXT,
                olid TEXT,
                isbn10 TEXT,
                isbn13 TEXT,
                synced INTEGER NOT NULL DEFAULT 0,
                deleted INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            -- Devices table
            CREATE TABLE IF NOT EXISTS devices (
                id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                device_name TEXT NOT NULL,
                last_synced INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                sync INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Append-only activity ledger
            CREATE TABLE IF NOT EXISTS activity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                duration INTEGER NOT NULL,
                page INTEGER NOT NULL,
                pages INTEGER NOT NULL,
                start_percentage REAL NOT NULL,
                end_percentage REAL NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (document_id) REFERENCES documents(id)
            );

            -- Append-only progress snapshots
            CREATE TABLE IF NOT EXISTS document_progress (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                percentage REAL NOT NULL,
                progress TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (document_id) REFERENCES documents(id)
            );

            -- Cache: per (user, document) rollups
            CREATE TABLE IF NOT EXISTS document_user_statistics (
                document_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                last_read INTEGER NOT NULL,
                percentage REAL NOT NULL,
                read_percentage REAL NOT NULL,
                total_time_seconds INTEGER NOT NULL,
                total_words_read INTEGER NOT NULL,
                total_wpm REAL NOT NULL,
                yearly_time_seconds INTEGER NOT NULL,
                yearly_words_read INTEGER NOT NULL,
                yearly_wpm REAL NOT NULL,
                monthly_time_seconds INTEGER NOT NULL,
                monthly_words_read INTEGER NOT NULL,
                monthly_wpm REAL NOT NULL,
                weekly_time_seconds INTEGER NOT NULL,
                weekly_words_read INTEGER NOT NULL,
                weekly_wpm REAL NOT NULL,
                PRIMARY KEY (user_id, document_id)
            );

            -- Cache: streaks per user and window kind
            CREATE TABLE IF NOT EXISTS user_streaks (
                user_id TEXT NOT NULL,
                window_kind TEXT NOT NULL,
                max_streak INTEGER NOT NULL,
                max_streak_start_date TEXT,
                max_streak_end_date TEXT,
                current_streak INTEGER NOT NULL,
                current_streak_start_date TEXT,
                current_streak_end_date TEXT,
                last_timezone TEXT NOT NULL,
                last_seen INTEGER,
                last_record INTEGER NOT NULL,
                PRIMARY KEY (user_id, window_kind)
            );

            -- Cache: trailing 30 day totals per user
            CREATE TABLE IF NOT EXISTS daily_read_totals (
                user_id TEXT NOT NULL,
                date TEXT NOT NULL,
                minutes_read INTEGER NOT NULL,
                PRIMARY KEY (user_id, date)
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_activity_user_start ON activity(user_id, start_time);
            CREATE INDEX IF NOT EXISTS idx_activity_device ON activity(user_id, device_id, start_time);
            CREATE INDEX IF NOT EXISTS idx_progress_user_doc ON document_progress(user_id, document_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_documents_deleted ON documents(deleted);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== USER OPERATIONS ==========

    /// Create a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, password_hash, admin, timezone, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id,
                user.password_hash,
                user.admin,
                user.timezone,
                user.created_at,
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Conflict(format!("User '{}' already exists", user.id))
            } else {
                AppError::Database(e)
            }
        })?;
        Ok(())
    }

    /// Get user by ID.
    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                "SELECT id, password_hash, admin, timezone, created_at
                 FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, password_hash, admin, timezone, created_at
             FROM users ORDER BY id",
        )?;

        let users = stmt
            .query_map([], user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(users)
    }

    /// Update user password hash.
    pub fn update_user_password(&self, id: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![password_hash, id],
        )?;
        Ok(rows > 0)
    }

    /// Update user timezone.
    pub fn update_user_timezone(&self, id: &str, timezone: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "UPDATE users SET timezone = ?1 WHERE id = ?2",
            params![timezone, id],
        )?;
        Ok(rows > 0)
    }

    /// Delete user.
    ///
    /// Ledger rows cascade. Cached statistics are dropped in the same
    /// transaction so the user disappears from leaderboards immediately.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        for table in ["document_user_statistics", "user_streaks", "daily_read_totals"] {
            tx.execute(&format!("DELETE FROM {} WHERE user_id = ?1", table), params![id])?;
        }
        let rows = tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;

        tx.commit()?;
        Ok(rows > 0)
    }

    /// Row counts for a user.
    pub fn database_info(&self, user_id: &str) -> Result<DatabaseInfo> {
        let conn = self.conn.lock();
        let info = conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM activity WHERE user_id = ?1),
                (SELECT COUNT(*) FROM documents),
                (SELECT COUNT(*) FROM document_progress WHERE user_id = ?1),
                (SELECT COUNT(*) FROM devices WHERE user_id = ?1)",
            params![user_id],
            |row| {
                Ok(DatabaseInfo {
                    activity_size: row.get(0)?,
                    documents_size: row.get(1)?,
                    progress_size: row.get(2)?,
                    devices_size: row.get(3)?,
                })
            },
        )?;
        Ok(info)
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        password_hash: row.get(1)?,
        admin: row.get(2)?,
        timezone: row.get(3)?,
        created_at: row.get(4)?,
    })
}

mod cache;
mod catalog;
mod devices;
mod ledger;
mod schema;

pub use cache::words_per_minute;
pub use schema::Database;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Username, also the primary key.
    pub id: String,
    /// Argon2 hash of the sync key.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Whether the user may run administrative actions.
    pub admin: bool,
    /// IANA timezone name used for calendar bucketing.
    pub timezone: String,
    /// Account creation timestamp.
    pub created_at: i64,
}

/// Document in the catalog.
///
/// Every attribute except the ID is optional: documents are created as bare
/// stubs by whichever device first references them and filled in later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Content-addressed ID chosen by the uploading client.
    pub id: String,
    /// Checksum of the stored file.
    pub checksum: Option<String>,
    /// Storage reference of the attached file.
    pub filepath: Option<String>,
    /// Storage reference of the cover image.
    pub coverfile: Option<String>,
    /// Title.
    pub title: Option<String>,
    /// Author.
    pub author: Option<String>,
    /// Series name.
    pub series: Option<String>,
    /// Position in series.
    pub series_index: Option<i64>,
    /// Language code.
    pub lang: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Word count of the attached file.
    pub words: Option<i64>,
    /// Google Books ID.
    pub gbid: Option<String>,
    /// Open Library ID.
    pub olid: Option<String>,
    /// ISBN-10.
    pub isbn10: Option<String>,
    /// ISBN-13.
    pub isbn13: Option<String>,
    /// True once a canonical upload has been accepted.
    #[serde(skip_deserializing)]
    pub synced: bool,
    /// Soft-delete tombstone.
    #[serde(skip_deserializing)]
    pub deleted: bool,
    /// Last update timestamp.
    #[serde(skip_deserializing)]
    pub updated_at: i64,
    /// Creation timestamp.
    #[serde(skip_deserializing)]
    pub created_at: i64,
}

impl Document {
    /// Bare stub carrying only an ID.
    pub fn stub(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Whether a file is attached.
    pub fn has_file(&self) -> bool {
        self.filepath.is_some()
    }
}

/// Device belonging to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Client-chosen device ID.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Display name.
    pub device_name: String,
    /// Last time the device talked to the server.
    pub last_synced: i64,
    /// Creation timestamp.
    pub created_at: i64,
    /// Full-sync opt-in: enables give/delete reconciliation.
    pub sync: bool,
}

/// One immutable reading session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// Row ID.
    pub id: i64,
    /// User ID.
    pub user_id: String,
    /// Document ID.
    pub document_id: String,
    /// Device ID.
    pub device_id: String,
    /// Session start, unix seconds UTC.
    pub start_time: i64,
    /// Session length in seconds.
    pub duration: i64,
    /// Reported page.
    pub page: i64,
    /// Reported page count.
    pub pages: i64,
    /// Fraction of the document at session start (0..1).
    pub start_percentage: f64,
    /// Fraction of the document at session end (0..1).
    pub end_percentage: f64,
    /// Insert timestamp.
    pub created_at: i64,
}

/// New activity row before insertion.
#[derive(Debug, Clone)]
pub struct NewActivity {
    /// Document ID.
    pub document_id: String,
    /// Session start, unix seconds UTC.
    pub start_time: i64,
    /// Session length in seconds.
    pub duration: i64,
    /// Reported page.
    pub page: i64,
    /// Reported page count.
    pub pages: i64,
}

impl NewActivity {
    /// Fraction of the document read before the session.
    pub fn start_percentage(&self) -> f64 {
        if self.pages <= 0 {
            return 0.0;
        }
        (self.page as f64 / self.pages as f64).clamp(0.0, 1.0)
    }

    /// Fraction of the document read after the session.
    pub fn end_percentage(&self) -> f64 {
        if self.pages <= 0 {
            return 0.0;
        }
        ((self.page + 1) as f64 / self.pages as f64).clamp(0.0, 1.0)
    }
}

/// New progress report before insertion.
#[derive(Debug, Clone)]
pub struct NewProgress {
    /// Document ID.
    pub document_id: String,
    /// Reporting device.
    pub device_id: String,
    /// Fraction of the document (0..1).
    pub percentage: f64,
    /// Opaque reader-specific position cursor.
    pub progress: String,
}

/// Reading position snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// User ID.
    pub user_id: String,
    /// Document ID.
    pub document_id: String,
    /// Device that reported the position.
    pub device_id: String,
    /// Device display name at read time.
    pub device_name: String,
    /// Fraction of the document (0..1).
    pub percentage: f64,
    /// Opaque reader-specific position cursor.
    pub progress: String,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Cached per (user, document) rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentUserStatistic {
    /// Document ID.
    pub document_id: String,
    /// User ID.
    pub user_id: String,
    /// Most recent session start.
    pub last_read: i64,
    /// Latest reported position, 0..100, clamped to 100 above 97.
    pub percentage: f64,
    /// Sum of per-session coverage, 0..100 per full read.
    pub read_percentage: f64,
    /// All-time seconds read.
    pub total_time_seconds: i64,
    /// All-time words read.
    pub total_words_read: i64,
    /// All-time words per minute.
    pub total_wpm: f64,
    /// Trailing 365 day seconds.
    pub yearly_time_seconds: i64,
    /// Trailing 365 day words.
    pub yearly_words_read: i64,
    /// Trailing 365 day words per minute.
    pub yearly_wpm: f64,
    /// Trailing 30 day seconds.
    pub monthly_time_seconds: i64,
    /// Trailing 30 day words.
    pub monthly_words_read: i64,
    /// Trailing 30 day words per minute.
    pub monthly_wpm: f64,
    /// Trailing 7 day seconds.
    pub weekly_time_seconds: i64,
    /// Trailing 7 day words.
    pub weekly_words_read: i64,
    /// Trailing 7 day words per minute.
    pub weekly_wpm: f64,
}

/// Streak window kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreakWindow {
    /// Consecutive calendar days.
    Day,
    /// Consecutive calendar weeks (Sunday start).
    Week,
}

impl StreakWindow {
    /// Stored column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreakWindow::Day => "DAY",
            StreakWindow::Week => "WEEK",
        }
    }

    /// Parse a stored column value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DAY" => Some(StreakWindow::Day),
            "WEEK" => Some(StreakWindow::Week),
            _ => None,
        }
    }
}

/// Cached streak result for one user and window kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStreak {
    /// User ID.
    pub user_id: String,
    /// Window kind.
    pub window: StreakWindow,
    /// Longest run ever observed.
    pub max_streak: i64,
    /// First window of the longest run (`YYYY-MM-DD`).
    pub max_streak_start_date: Option<String>,
    /// Last window of the longest run.
    pub max_streak_end_date: Option<String>,
    /// Run still alive as of the computation time.
    pub current_streak: i64,
    /// First window of the current run.
    pub current_streak_start_date: Option<String>,
    /// Last window of the current run.
    pub current_streak_end_date: Option<String>,
    /// Timezone the windows were bucketed in.
    pub last_timezone: String,
    /// Latest activity start seen by the computation.
    pub last_seen: Option<i64>,
    /// When the row was computed.
    pub last_record: i64,
}

/// Minutes read on one local calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReadTotal {
    /// User ID.
    pub user_id: String,
    /// Local date (`YYYY-MM-DD`).
    pub date: String,
    /// Whole minutes read.
    pub minutes_read: i64,
}

/// Fully computed statistics cache, swapped in as one unit.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    /// Per (user, document) rollups.
    pub document_statistics: Vec<DocumentUserStatistic>,
    /// Streak rows, two per user.
    pub streaks: Vec<UserStreak>,
    /// Trailing 30 day totals, thirty per user.
    pub daily_totals: Vec<DailyReadTotal>,
}

/// Leaderboard aggregate for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStatistic {
    /// User ID.
    pub user_id: String,
    /// All-time words.
    pub total_words_read: i64,
    /// All-time seconds.
    pub total_seconds: i64,
    /// All-time words per minute.
    pub total_wpm: f64,
    /// Trailing year words.
    pub yearly_words_read: i64,
    /// Trailing year seconds.
    pub yearly_seconds: i64,
    /// Trailing year words per minute.
    pub yearly_wpm: f64,
    /// Trailing month words.
    pub monthly_words_read: i64,
    /// Trailing month seconds.
    pub monthly_seconds: i64,
    /// Trailing month words per minute.
    pub monthly_wpm: f64,
    /// Trailing week words.
    pub weekly_words_read: i64,
    /// Trailing week seconds.
    pub weekly_seconds: i64,
    /// Trailing week words per minute.
    pub weekly_wpm: f64,
}

/// Row counts for a user, shown on settings pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Activity rows of the user.
    pub activity_size: i64,
    /// Documents in the catalog.
    pub documents_size: i64,
    /// Progress rows of the user.
    pub progress_size: i64,
    /// Devices of the user.
    pub devices_size: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

use super::{Validate, require_id};
use crate::db::{Database, NewActivity};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// One reading session reported by a device.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityItem {
    /// Document ID.
    pub document: String,
    /// Session start, unix seconds UTC.
    pub start_time: i64,
    /// Session length in seconds.
    pub duration: i64,
    /// Page at session start.
    #[serde(default)]
    pub page: i64,
    /// Total pages.
    #[serde(default)]
    pub pages: i64,
}

impl ActivityItem {
    fn check(&self, index: usize) -> Result<()> {
        let invalid = |msg: &str| -> Result<()> {
            Err(AppError::Validation(format!("activity[{}]: {}", index, msg)))
        };

        if self.document.trim().is_empty() {
            return invalid("document is required");
        }
        if self.start_time < 0 {
            return invalid("start_time must not be negative");
        }
        if self.duration < 0 {
            return invalid("duration must not be negative");
        }
        if self.pages <= 0 {
            return invalid("pages must be positive");
        }
        if self.page < 0 || self.page > self.pages {
            return invalid("page out of range");
        }
        Ok(())
    }
}

/// Batch of sessions from one device.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityRequest {
    /// Device ID.
    pub device_id: String,
    /// Device display name.
    #[serde(default)]
    pub device: String,
    /// Sessions.
    #[serde(default)]
    pub activity: Vec<ActivityItem>,
}

impl Validate for ActivityRequest {
    fn validate(&self) -> Result<()> {
        require_id("device_id", &self.device_id)?;
        for (index, item) in self.activity.iter().enumerate() {
            item.check(index)?;
        }
        Ok(())
    }
}

/// Activity batch result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityResponse {
    /// Rows appended.
    pub added: usize,
}

/// Last sync query.
#[derive(Debug, Clone, Deserialize)]
pub struct LastSyncRequest {
    /// Device ID.
    pub device_id: String,
}

/// Last sync answer, 0 when the device has no activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastSyncResponse {
    /// Latest session start, unix seconds.
    pub last_sync: i64,
}

/// Validate and append an activity batch atomically.
pub fn record_activity(
    db: &Database,
    user_id: &str,
    req: &ActivityRequest,
    cancel: &CancellationToken,
) -> Result<ActivityResponse> {
    req.validate()?;

    let items: Vec<NewActivity> = req
        .activity
        .iter()
        .map(|item| NewActivity {
            document_id: item.document.trim().to_string(),
            start_time: item.start_time,
            duration: item.duration,
            page: item.page,
            pages: item.pages,
        })
        .collect();

    let added = db.record_activity(
        user_id,
        req.device_id.trim(),
        req.device.trim(),
        &items,
        cancel,
    )?;

    tracing::info!(user = user_id, device = req.device_id.trim(), added, "Recorded activity");
    Ok(ActivityResponse { added })
}

/// Latest session start known for a device.
pub fn last_sync_time(db: &Database, user_id: &str, req: &LastSyncRequest) -> Result<LastSyncResponse> {
    require_id("device_id", &req.device_id)?;
    let last_sync = db.last_activity_time(user_id, req.device_id.trim())?;
    Ok(LastSyncResponse { last_sync })
}

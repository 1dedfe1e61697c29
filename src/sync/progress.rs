use super::{Validate, require_id};
use crate::db::{self, Database, NewProgress};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Position report from a device.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressRequest {
    /// Document ID.
    pub document: String,
    /// Fraction read, 0..1.
    pub percentage: f64,
    /// Opaque reader cursor.
    #[serde(default)]
    pub progress: String,
    /// Device display name.
    #[serde(default)]
    pub device: String,
    /// Device ID.
    pub device_id: String,
}

impl Validate for ProgressRequest {
    fn validate(&self) -> Result<()> {
        require_id("document", &self.document)?;
        require_id("device_id", &self.device_id)?;
        if !self.percentage.is_finite() || !(0.0..=1.0).contains(&self.percentage) {
            return Err(AppError::Validation(
                "percentage must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Acknowledgement of a stored snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressAck {
    /// Document ID.
    pub document: String,
    /// Snapshot creation time.
    pub timestamp: i64,
}

/// Current position of a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressResponse {
    /// Document ID.
    pub document: String,
    /// Fraction read, 0..1.
    pub percentage: f64,
    /// Opaque reader cursor.
    pub progress: String,
    /// Name of the device that wrote it.
    pub device: String,
    /// Device that wrote it.
    pub device_id: String,
    /// Snapshot creation time.
    pub timestamp: i64,
}

/// Append a new snapshot. Earlier snapshots are kept.
pub fn set_progress(db: &Database, user_id: &str, req: &ProgressRequest) -> Result<ProgressAck> {
    req.validate()?;

    let report = NewProgress {
        document_id: req.document.trim().to_string(),
        device_id: req.device_id.trim().to_string(),
        percentage: req.percentage,
        progress: req.progress.clone(),
    };
    let snapshot = db.insert_progress(user_id, req.device.trim(), &report, db::now_timestamp())?;

    tracing::debug!(
        user = user_id,
        document = %snapshot.document_id,
        device = %snapshot.device_id,
        percentage = snapshot.percentage,
        "Stored progress"
    );

    Ok(ProgressAck {
        document: snapshot.document_id,
        timestamp: snapshot.created_at,
    })
}

/// Most recent snapshot across every device of the user.
pub fn get_progress(db: &Database, user_id: &str, document_id: &str) -> Result<ProgressResponse> {
    require_id("document", document_id)?;

    let snapshot = db
        .latest_progress(user_id, document_id.trim())?
        .ok_or_else(|| AppError::NotFound(format!("No progress for document '{}'", document_id)))?;

    Ok(ProgressResponse {
        document: snapshot.document_id,
        percentage: snapshot.percentage,
        progress: snapshot.progress,
        device: snapshot.device_name,
        device_id: snapshot.device_id,
        timestamp: snapshot.created_at,
    })
}

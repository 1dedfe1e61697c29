//! Device sync protocol.
//!
//! Typed requests coming from e-reader devices are validated here before
//! anything touches the store. Validation failures surface as
//! [`AppError::Validation`] and never leave partial state behind.

mod activity;
mod documents;
mod progress;
mod reconcile;

pub use activity::{
    ActivityItem, ActivityRequest, ActivityResponse, LastSyncRequest, LastSyncResponse,
    last_sync_time, record_activity,
};
pub use documents::{DocumentPushRequest, DocumentPushResponse, push_documents};
pub use progress::{ProgressAck, ProgressRequest, ProgressResponse, get_progress, set_progress};
pub use reconcile::{ReconcileRequest, ReconcileResponse, reconcile};

use crate::error::{AppError, Result};

/// Longest accepted identifier.
const MAX_ID_LEN: usize = 255;

/// A request that can be checked before dispatch.
pub trait Validate {
    /// Reject malformed input with a validation error.
    fn validate(&self) -> Result<()>;
}

/// Check that an identifier is present and reasonably sized.
fn require_id(field: &str, value: &str) -> Result<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    if trimmed.len() > MAX_ID_LEN {
        return Err(AppError::Validation(format!(
            "{} exceeds {} characters",
            field, MAX_ID_LEN
        )));
    }
    Ok(())
}

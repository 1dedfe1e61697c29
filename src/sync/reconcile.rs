use super::{Validate, require_id};
use crate::db::{Database, Document};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Inventory check sent by a device.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileRequest {
    /// Device ID.
    pub device_id: String,
    /// Device display name.
    #[serde(default)]
    pub device: String,
    /// Document IDs present on the device.
    #[serde(default)]
    pub have: Vec<String>,
}

impl Validate for ReconcileRequest {
    fn validate(&self) -> Result<()> {
        require_id("device_id", &self.device_id)?;
        if let Some(pos) = self.have.iter().position(|id| id.trim().is_empty()) {
            return Err(AppError::Validation(format!("have[{}] is empty", pos)));
        }
        Ok(())
    }
}

/// Three-way diff returned to the device. Every list is always present.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileResponse {
    /// Union of `want_files` and `want_metadata`.
    pub want: Vec<String>,
    /// IDs the server needs the file for.
    pub want_files: Vec<String>,
    /// IDs whose metadata was never confirmed by an upload.
    pub want_metadata: Vec<String>,
    /// Documents the device is missing. Full-sync devices only.
    pub give: Vec<Document>,
    /// IDs the device should drop. Full-sync devices only.
    pub delete: Vec<String>,
}

/// Diff a device's inventory against the catalog.
///
/// The device upsert is the only write. Give and delete are computed only
/// for devices that opted into full sync.
pub fn reconcile(db: &Database, user_id: &str, req: &ReconcileRequest) -> Result<ReconcileResponse> {
    req.validate()?;

    let device = db.upsert_device(user_id, req.device_id.trim(), req.device.trim())?;

    let mut seen = HashSet::new();
    let have: Vec<String> = req
        .have
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| seen.insert(id.clone()))
        .collect();

    let known = db.documents_by_ids(&have)?;
    let mut resp = ReconcileResponse::default();

    for id in &have {
        match known.get(id) {
            None => {
                resp.want.push(id.clone());
                resp.want_files.push(id.clone());
                resp.want_metadata.push(id.clone());
            }
            Some(doc) if !doc.deleted && (!doc.synced || !doc.has_file()) => {
                resp.want.push(id.clone());
                if !doc.has_file() {
                    resp.want_files.push(id.clone());
                }
                if !doc.synced {
                    resp.want_metadata.push(id.clone());
                }
            }
            Some(_) => {}
        }
    }

    if device.sync {
        resp.give = db
            .available_documents()?
            .into_iter()
            .filter(|doc| !seen.contains(&doc.id))
            .collect();

        resp.delete = have
            .iter()
            .filter(|id| known.get(*id).is_some_and(|doc| doc.deleted))
            .cloned()
            .collect();
    }

    tracing::debug!(
        user = user_id,
        device = %device.id,
        full_sync = device.sync,
        have = have.len(),
        want = resp.want.len(),
        give = resp.give.len(),
        delete = resp.delete.len(),
        "Reconciled device inventory"
    );

    Ok(resp)
}

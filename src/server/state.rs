//! Application state shared across handlers.

use crate::auth::AuthService;
use crate::config::Config;
use crate::db::{Database, Document};
use crate::error::{AppError, Result};
use crate::stats::RefreshHandle;
use axum::body::Bytes;
use futures_util::{Stream, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Trigger for statistics cache rebuilds.
    pub refresh: RefreshHandle,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create new application state with database.
    pub fn new_with_db(
        config: Config,
        db: Database,
        auth: AuthService,
        refresh: RefreshHandle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db,
            auth: Arc::new(auth),
            refresh,
            shutdown,
        }
    }

    /// Stream an uploaded file to disk and attach it to its document.
    ///
    /// The file lands as `<id>.<ext>` under the documents directory, written
    /// to a temporary name first and renamed into place. The checksum is
    /// computed while the chunks are written. Uploads over
    /// `storage.max_upload_bytes` are rejected and leave nothing behind.
    pub async fn store_document_file<S, E>(
        &self,
        id: &str,
        ext: &str,
        words: Option<i64>,
        mut chunks: S,
    ) -> Result<Document>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        check_file_component("document id", id)?;
        check_file_component("extension", ext)?;

        if self.db.get_document(id)?.is_none() {
            return Err(AppError::NotFound(format!("Document '{}' not found", id)));
        }

        let dir = &self.config.storage.documents_dir;
        tokio::fs::create_dir_all(dir).await?;

        let file_name = format!("{}.{}", id, ext.to_ascii_lowercase());
        let partial = dir.join(format!("{}.part", file_name));

        let mut file = File::create(&partial).await?;
        let written = write_chunks(&mut file, &mut chunks, self.config.storage.max_upload_bytes).await;
        drop(file);

        let (bytes, checksum) = match written {
            Ok(done) => done,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&partial).await {
                    tracing::warn!(error = %rm, file = %partial.display(), "Failed to remove partial upload");
                }
                return Err(e);
            }
        };

        tokio::fs::rename(&partial, dir.join(&file_name)).await?;
        let doc = self.db.attach_file(id, &file_name, &checksum, words)?;

        tracing::info!(document = id, bytes, file = %file_name, "Stored document file");
        Ok(doc)
    }

    /// Resolve the on-disk path of an attached file.
    pub fn document_file_path(&self, doc: &Document) -> Result<PathBuf> {
        let file_name = doc
            .filepath
            .as_deref()
            .ok_or_else(|| AppError::NotFound(format!("Document '{}' has no file", doc.id)))?;
        Ok(self.config.storage.documents_dir.join(file_name))
    }
}

/// Copy chunks into `file`, hashing as they pass. Returns size and blake3 hex.
async fn write_chunks<S, E>(file: &mut File, chunks: &mut S, limit: u64) -> Result<(u64, String)>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut hasher = blake3::Hasher::new();
    let mut size: u64 = 0;

    while let Some(chunk) = chunks.next().await {
        let chunk =
            chunk.map_err(|e| AppError::Validation(format!("Failed to read upload: {}", e)))?;
        size += chunk.len() as u64;
        if size > limit {
            return Err(AppError::PayloadTooLarge(format!(
                "Upload exceeds {} bytes",
                limit
            )));
        }
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }

    if size == 0 {
        return Err(AppError::Validation("Empty file".to_string()));
    }

    file.flush().await?;
    Ok((size, hasher.finalize().to_hex().to_string()))
}

/// Reject anything that could escape the documents directory.
fn check_file_component(field: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value.len() <= 128
        && !value.starts_with('.')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');

    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!("Invalid {}: '{}'", field, value)))
    }
}

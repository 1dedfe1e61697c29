use super::{Validate, require_id};
use crate::db::{Database, Document};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Metadata batch pushed by a device.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentPushRequest {
    /// Documents to merge.
    #[serde(default)]
    pub documents: Vec<Document>,
}

impl Validate for DocumentPushRequest {
    fn validate(&self) -> Result<()> {
        for (index, doc) in self.documents.iter().enumerate() {
            require_id(&format!("documents[{}].id", index), &doc.id)?;
            if doc.words.is_some_and(|w| w < 0) || doc.series_index.is_some_and(|i| i < 0) {
                return Err(AppError::Validation(format!(
                    "documents[{}]: negative counter",
                    index
                )));
            }
        }
        Ok(())
    }
}

/// Metadata batch result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentPushResponse {
    /// Documents inserted or changed.
    pub changed: usize,
}

/// Merge a batch of device metadata into the catalog in one transaction.
///
/// Strings are trimmed and blank values count as absent. File references
/// are ignored here; they are only set by an accepted upload.
pub fn push_documents(db: &Database, req: &DocumentPushRequest) -> Result<DocumentPushResponse> {
    req.validate()?;

    let docs: Vec<Document> = req.documents.iter().map(normalize).collect();
    let changed = db.upsert_documents(&docs)?;

    tracing::debug!(pushed = docs.len(), changed, "Merged document metadata");
    Ok(DocumentPushResponse { changed })
}

fn normalize(doc: &Document) -> Document {
    fn clean(value: &Option<String>) -> Option<String> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    Document {
        id: doc.id.trim().to_string(),
        checksum: clean(&doc.checksum),
        filepath: None,
        coverfile: None,
        title: clean(&doc.title),
        author: clean(&doc.author),
        series: clean(&doc.series),
        series_index: doc.series_index,
        lang: clean(&doc.lang),
        description: clean(&doc.description),
        words: doc.words,
        gbid: clean(&doc.gbid),
        olid: clean(&doc.olid),
        isbn10: clean(&doc.isbn10),
        isbn13: clean(&doc.isbn13),
        ..Document::default()
    }
}

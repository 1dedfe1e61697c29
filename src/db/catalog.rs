use crate::db::{Database, Document, now_timestamp};
use crate::error::{AppError, Result};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::collections::HashMap;

const DOCUMENT_COLUMNS: &str = "id, checksum, filepath, coverfile, title, author, series, series_index, \
     lang, description, words, gbid, olid, isbn10, isbn13, synced, deleted, updated_at, created_at";

/// Max bound parameters per `IN (...)` lookup.
const LOOKUP_CHUNK: usize = 500;

/// Merge a document into the catalog.
///
/// Incoming non-null fields replace stored ones, incoming nulls are ignored,
/// so a write can never clear a value. Returns 1 when a row was inserted or
/// changed and 0 when the write carried nothing new. Tombstone and `synced`
/// are left alone.
pub(crate) fn upsert_document_in(conn: &Connection, doc: &Document, now: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO documents (id, checksum, filepath, coverfile, title, author, series, series_index,
                                lang, description, words, gbid, olid, isbn10, isbn13,
                                updated_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
         ON CONFLICT(id) DO UPDATE SET
            checksum = COALESCE(excluded.checksum, documents.checksum),
            filepath = COALESCE(excluded.filepath, documents.filepath),
            coverfile = COALESCE(excluded.coverfile, documents.coverfile),
            title = COALESCE(excluded.title, documents.title),
            author = COALESCE(excluded.author, documents.author),
            series = COALESCE(excluded.series, documents.series),
            series_index = COALESCE(excluded.series_index, documents.series_index),
            lang = COALESCE(excluded.lang, documents.lang),
            description = COALESCE(excluded.description, documents.description),
            words = COALESCE(excluded.words, documents.words),
            gbid = COALESCE(excluded.gbid, documents.gbid),
            olid = COALESCE(excluded.olid, documents.olid),
            isbn10 = COALESCE(excluded.isbn10, documents.isbn10),
            isbn13 = COALESCE(excluded.isbn13, documents.isbn13),
            updated_at = excluded.updated_at
         WHERE (excluded.checksum IS NOT NULL AND excluded.checksum IS NOT documents.checksum)
            OR (excluded.filepath IS NOT NULL AND excluded.filepath IS NOT documents.filepath)
            OR (excluded.coverfile IS NOT NULL AND excluded.coverfile IS NOT documents.coverfile)
            OR (excluded.title IS NOT NULL AND excluded.title IS NOT documents.title)
            OR (excluded.author IS NOT NULL AND excluded.author IS NOT documents.author)
            OR (excluded.series IS NOT NULL AND excluded.series IS NOT documents.series)
            OR (excluded.series_index IS NOT NULL AND excluded.series_index IS NOT documents.series_index)
            OR (excluded.lang IS NOT NULL AND excluded.lang IS NOT documents.lang)
            OR (excluded.description IS NOT NULL AND excluded.description IS NOT documents.description)
            OR (excluded.words IS NOT NULL AND excluded.words IS NOT documents.words)
            OR (excluded.gbid IS NOT NULL AND excluded.gbid IS NOT documents.gbid)
            OR (excluded.olid IS NOT NULL AND excluded.olid IS NOT documents.olid)
            OR (excluded.isbn10 IS NOT NULL AND excluded.isbn10 IS NOT documents.isbn10)
            OR (excluded.isbn13 IS NOT NULL AND excluded.isbn13 IS NOT documents.isbn13)",
        params![
            doc.id,
            doc.checksum,
            doc.filepath,
            doc.coverfile,
            doc.title,
            doc.author,
            doc.series,
            doc.series_index,
            doc.lang,
            doc.description,
            doc.words,
            doc.gbid,
            doc.olid,
            doc.isbn10,
            doc.isbn13,
            now,
        ],
    )
}

impl Database {
    // ========== DOCUMENT OPERATIONS ==========

    /// Upsert a single document.
    pub fn upsert_document(&self, doc: &Document) -> Result<bool> {
        let conn = self.conn();
        let changed = upsert_document_in(&conn, doc, now_timestamp())?;
        Ok(changed > 0)
    }

    /// Upsert a batch of documents in one transaction.
    pub fn upsert_documents(&self, docs: &[Document]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = now_timestamp();

        let mut changed = 0;
        for doc in docs {
            changed += upsert_document_in(&tx, doc, now)?;
        }

        tx.commit()?;
        Ok(changed)
    }

    /// Get document by ID, tombstoned or not.
    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.conn();
        let doc = conn
            .query_row(
                &format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS),
                params![id],
                document_from_row,
            )
            .optional()?;
        Ok(doc)
    }

    /// List catalog documents.
    pub fn list_documents(&self, include_deleted: bool) -> Result<Vec<Document>> {
        let conn = self.conn();
        let sql = if include_deleted {
            format!("SELECT {} FROM documents ORDER BY created_at, id", DOCUMENT_COLUMNS)
        } else {
            format!(
                "SELECT {} FROM documents WHERE deleted = 0 ORDER BY created_at, id",
                DOCUMENT_COLUMNS
            )
        };

        let mut stmt = conn.prepare(&sql)?;
        let docs = stmt
            .query_map([], document_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(docs)
    }

    /// Look up a set of IDs. Unknown IDs are absent from the map.
    pub fn documents_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Document>> {
        let conn = self.conn();
        let mut found = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM documents WHERE id IN ({})",
                DOCUMENT_COLUMNS, placeholders
            ))?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), document_from_row)?;
            for row in rows {
                let doc = row?;
                found.insert(doc.id.clone(), doc);
            }
        }

        Ok(found)
    }

    /// Non-deleted documents with an attached file.
    pub fn available_documents(&self) -> Result<Vec<Document>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents
             WHERE deleted = 0 AND filepath IS NOT NULL
             ORDER BY created_at, id",
            DOCUMENT_COLUMNS
        ))?;

        let docs = stmt
            .query_map([], document_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(docs)
    }

    /// Record an accepted canonical upload and mark the document synced.
    pub fn attach_file(
        &self,
        id: &str,
        filepath: &str,
        checksum: &str,
        words: Option<i64>,
    ) -> Result<Document> {
        {
            let conn = self.conn();
            let rows = conn.execute(
                "UPDATE documents
                 SET filepath = ?2, checksum = ?3, words = COALESCE(?4, words),
                     synced = 1, updated_at = ?5
                 WHERE id = ?1",
                params![id, filepath, checksum, words, now_timestamp()],
            )?;
            if rows == 0 {
                return Err(AppError::NotFound(format!("Document '{}' not found", id)));
            }
        }

        self.get_document(id)?
            .ok_or_else(|| AppError::NotFound(format!("Document '{}' not found", id)))
    }

    /// Set or clear the tombstone. Rows are never purged.
    pub fn set_deleted(&self, id: &str, deleted: bool) -> Result<bool> {
        let conn = self.conn();
        let rows = conn.execute(
            "UPDATE documents SET deleted = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, deleted, now_timestamp()],
        )?;
        Ok(rows > 0)
    }

    /// Word counts of every document that has one.
    pub fn document_words(&self) -> Result<HashMap<String, i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, words FROM documents WHERE words IS NOT NULL")?;
        let words = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(words)
    }
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        checksum: row.get(1)?,
        filepath: row.get(2)?,
        coverfile: row.get(3)?,
        title: row.get(4)?,
        author: row.get(5)?,
        series: row.get(6)?,
        series_index: row.get(7)?,
        lang: row.get(8)?,
        description: row.get(9)?,
        words: row.get(10)?,
        gbid: row.get(11)?,
        olid: row.get(12)?,
        isbn10: row.get(13)?,
        isbn13: row.get(14)?,
        synced: row.get(15)?,
        deleted: row.get(16)?,
        updated_at: row.get(17)?,
        created_at: row.get(18)?,
    })
}

use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::*;

const DOCUMENT_COLUMNS: &str = "d.id, d.filename, d.file_path, d.file_size, d.mime_type,
     d.uploaded_at, d.processed_at, d.status, d.error_message";

pub fn insert_document(conn: &Connection, doc: &SourceDocument) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO documents (id, filename, file_path, file_size, mime_type, uploaded_at,
         processed_at, status, error_message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            doc.id.to_string(),
            doc.filename,
            doc.file_path,
            doc.file_size,
            doc.mime_type,
            format_timestamp(&doc.uploaded_at),
            doc.processed_at.as_ref().map(format_timestamp),
            doc.status.as_str(),
            doc.error_message,
        ],
    )?;
    Ok(())
}

pub fn get_document(conn: &Connection, id: &Uuid) -> Result<Option<SourceDocument>, DatabaseError> {
    let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.id = ?1");
    let row = conn
        .query_row(&sql, params![id.to_string()], read_document_row)
        .optional()?;

    row.map(document_from_row).transpose()
}

/// Move a document to `status`. `error_message` replaces the stored message
/// (`None` clears it).
pub fn update_document_status(
    conn: &Connection,
    document_id: &Uuid,
    status: DocumentStatus,
    error_message: Option<&str>,
) -> Result<(), DatabaseError> {
    let rows = conn.execute(
        "UPDATE documents SET status = ?2, error_message = ?3 WHERE id = ?1",
        params![document_id.to_string(), status.as_str(), error_message],
    )?;
    if rows == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Document".into(),
            id: document_id.to_string(),
        });
    }
    Ok(())
}

/// Move a document to `processing` unless it is already `completed`.
/// Returns `false` when the document was left untouched because it is done.
pub fn mark_document_processing(conn: &Connection, document_id: &Uuid) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE documents SET status = ?2, error_message = NULL WHERE id = ?1 AND status != ?3",
        params![
            document_id.to_string(),
            DocumentStatus::Processing.as_str(),
            DocumentStatus::Completed.as_str(),
        ],
    )?;
    if rows > 0 {
        return Ok(true);
    }
    match get_document(conn, document_id)? {
        Some(_) => Ok(false),
        None => Err(DatabaseError::NotFound {
            entity_type: "Document".into(),
            id: document_id.to_string(),
        }),
    }
}

pub fn mark_document_failed(
    conn: &Connection,
    document_id: &Uuid,
    message: &str,
) -> Result<(), DatabaseError> {
    update_document_status(conn, document_id, DocumentStatus::Failed, Some(message))
}

/// Page through documents, newest first unless `filter.order` says otherwise.
/// The type filter matches the extraction's document type, so it only ever
/// returns completed documents.
pub fn list_documents(
    conn: &Connection,
    filter: &DocumentFilter,
) -> Result<Vec<SourceDocument>, DatabaseError> {
    let order = match filter.order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    let sql = format!(
        "SELECT {DOCUMENT_COLUMNS}
         FROM documents d LEFT JOIN extractions e ON e.document_id = d.id
         WHERE (?1 IS NULL OR e.document_type = ?1)
           AND (?2 IS NULL OR d.status = ?2)
         ORDER BY d.uploaded_at {order}
         LIMIT ?3 OFFSET ?4"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            filter.doc_type.map(|t| t.as_str()),
            filter.status.map(|s| s.as_str()),
            filter.limit,
            filter.offset(),
        ],
        read_document_row,
    )?;

    let mut docs = Vec::new();
    for row in rows {
        docs.push(document_from_row(row?)?);
    }
    Ok(docs)
}

pub fn count_documents(conn: &Connection, filter: &DocumentFilter) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM documents d LEFT JOIN extractions e ON e.document_id = d.id
         WHERE (?1 IS NULL OR e.document_type = ?1)
           AND (?2 IS NULL OR d.status = ?2)",
        params![
            filter.doc_type.map(|t| t.as_str()),
            filter.status.map(|s| s.as_str()),
        ],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(count)
}

// Internal row type for SourceDocument mapping
struct DocumentRow {
    id: String,
    filename: String,
    file_path: String,
    file_size: i64,
    mime_type: String,
    uploaded_at: String,
    processed_at: Option<String>,
    status: String,
    error_message: Option<String>,
}

fn read_document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        id: row.get(0)?,
        filename: row.get(1)?,
        file_path: row.get(2)?,
        file_size: row.get(3)?,
        mime_type: row.get(4)?,
        uploaded_at: row.get(5)?,
        processed_at: row.get(6)?,
        status: row.get(7)?,
        error_message: row.get(8)?,
    })
}

fn document_from_row(row: DocumentRow) -> Result<SourceDocument, DatabaseError> {
    Ok(SourceDocument {
        id: parse_uuid(&row.id)?,
        filename: row.filename,
        file_path: row.file_path,
        file_size: row.file_size,
        mime_type: row.mime_type,
        uploaded_at: parse_timestamp("uploaded_at", &row.uploaded_at)?,
        processed_at: row
            .processed_at
            .as_deref()
            .map(|raw| parse_timestamp("processed_at", raw))
            .transpose()?,
        status: DocumentStatus::from_str(&row.status)?,
        error_message: row.error_message,
    })
}

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::*;

/// Confidence assigned to a field a human has corrected.
pub const MANUAL_CONFIDENCE: f64 = 1.0;

/// Persist the extraction and move its document to `completed` in one
/// transaction. `processed_at` is only set when the document has none yet.
pub fn complete_extraction(
    conn: &Connection,
    record: &ExtractionRecord,
    processed_at: &NaiveDateTime,
) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO extractions (id, document_id, document_type, extracted_data,
         confidence_scores, ocr_text, processing_time, created_at, updated_at, manually_corrected)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.id.to_string(),
            record.document_id.to_string(),
            record.document_type.as_str(),
            serde_json::to_string(&record.extracted_data)?,
            serde_json::to_string(&record.confidence_scores)?,
            record.ocr_text,
            record.processing_time,
            format_timestamp(&record.created_at),
            format_timestamp(&record.updated_at),
            record.manually_corrected as i32,
        ],
    )?;

    let rows = tx.execute(
        "UPDATE documents SET status = ?2, error_message = NULL,
         processed_at = COALESCE(processed_at, ?3)
         WHERE id = ?1",
        params![
            record.document_id.to_string(),
            DocumentStatus::Completed.as_str(),
            format_timestamp(processed_at),
        ],
    )?;
    if rows == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Document".into(),
            id: record.document_id.to_string(),
        });
    }

    tx.commit()?;
    Ok(())
}

pub fn get_extraction_by_document(
    conn: &Connection,
    document_id: &Uuid,
) -> Result<Option<ExtractionRecord>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, document_id, document_type, extracted_data, confidence_scores, ocr_text,
             processing_time, created_at, updated_at, manually_corrected
             FROM extractions WHERE document_id = ?1",
            params![document_id.to_string()],
            |row| {
                Ok(ExtractionRow {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    document_type: row.get(2)?,
                    extracted_data: row.get(3)?,
                    confidence_scores: row.get(4)?,
                    ocr_text: row.get(5)?,
                    processing_time: row.get(6)?,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                    manually_corrected: row.get(9)?,
                })
            },
        )
        .optional()?;

    row.map(extraction_from_row).transpose()
}

/// Load a document and its extraction, if any.
pub fn get_document_with_extraction(
    conn: &Connection,
    document_id: &Uuid,
) -> Result<Option<DocumentWithExtraction>, DatabaseError> {
    let Some(document) = super::get_document(conn, document_id)? else {
        return Ok(None);
    };
    let extraction = get_extraction_by_document(conn, document_id)?;
    Ok(Some(DocumentWithExtraction {
        document,
        extraction,
    }))
}

/// Merge human corrections into a document's extraction.
///
/// Corrected keys overwrite existing values and their confidence becomes 1.0,
/// whatever `scores` says for them. Scores for untouched keys are merged as given.
pub fn apply_manual_correction(
    conn: &Connection,
    document_id: &Uuid,
    corrections: &Map<String, Value>,
    scores: Option<&BTreeMap<String, f64>>,
) -> Result<ExtractionRecord, DatabaseError> {
    let mut record = get_extraction_by_document(conn, document_id)?.ok_or_else(|| {
        DatabaseError::NotFound {
            entity_type: "Extraction".into(),
            id: document_id.to_string(),
        }
    })?;

    if let Some(scores) = scores {
        for (key, score) in scores {
            record.confidence_scores.insert(key.clone(), score.clamp(0.0, 1.0));
        }
    }
    for (key, value) in corrections {
        record.extracted_data.insert(key.clone(), value.clone());
        record.confidence_scores.insert(key.clone(), MANUAL_CONFIDENCE);
    }
    if let Some(label) = corrections.get("document_type").and_then(Value::as_str) {
        record.document_type = DocumentType::from_label(label);
    }
    record.manually_corrected = true;
    record.updated_at = chrono::Local::now().naive_local();

    conn.execute(
        "UPDATE extractions SET document_type = ?2, extracted_data = ?3, confidence_scores = ?4,
         updated_at = ?5, manually_corrected = 1
         WHERE document_id = ?1",
        params![
            document_id.to_string(),
            record.document_type.as_str(),
            serde_json::to_string(&record.extracted_data)?,
            serde_json::to_string(&record.confidence_scores)?,
            format_timestamp(&record.updated_at),
        ],
    )?;

    tracing::info!(
        document_id = %document_id,
        fields = corrections.len(),
        "Applied manual correction"
    );
    Ok(record)
}

// Internal row type for ExtractionRecord mapping
struct ExtractionRow {
    id: String,
    document_id: String,
    document_type: String,
    extracted_data: String,
    confidence_scores: String,
    ocr_text: String,
    processing_time: f64,
    created_at: String,
    updated_at: String,
    manually_corrected: i32,
}

fn extraction_from_row(row: ExtractionRow) -> Result<ExtractionRecord, DatabaseError> {
    Ok(ExtractionRecord {
        id: parse_uuid(&row.id)?,
        document_id: parse_uuid(&row.document_id)?,
        document_type: DocumentType::from_str(&row.document_type)?,
        extracted_data: serde_json::from_str(&row.extracted_data)?,
        confidence_scores: serde_json::from_str(&row.confidence_scores)?,
        ocr_text: row.ocr_text,
        processing_time: row.processing_time,
        created_at: parse_timestamp("created_at", &row.created_at)?,
        updated_at: parse_timestamp("updated_at", &row.updated_at)?,
        manually_corrected: row.manually_corrected != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::{get_document, insert_document};
    use crate::db::sqlite::open_memory_database;
    use serde_json::json;

    fn test_db() -> Connection {
        open_memory_database().unwrap()
    }

    fn seeded_document(conn: &Connection) -> SourceDocument {
        let doc = SourceDocument::new_pending("facture.pdf", "/uploads/facture.pdf", 2048, "application/pdf");
        insert_document(conn, &doc).unwrap();
        doc
    }

    fn make_record(document_id: Uuid) -> ExtractionRecord {
        let now = chrono::Local::now().naive_local();
        let data = json!({
            "document_type": "invoice",
            "invoice_number": "F-2024-001",
            "amount_ttc": 120.0,
            "confidence_score": 0.8
        });
        let data = data.as_object().unwrap().clone();
        let scores = data.keys().map(|k| (k.clone(), 0.8)).collect();
        ExtractionRecord {
            id: Uuid::new_v4(),
            document_id,
            document_type: DocumentType::Invoice,
            extracted_data: data,
            confidence_scores: scores,
            ocr_text: "Facture F-2024-001".into(),
            processing_time: 1.5,
            created_at: now,
            updated_at: now,
            manually_corrected: false,
        }
    }

    #[test]
    fn complete_extraction_persists_and_completes_document() {
        let conn = test_db();
        let doc = seeded_document(&conn);
        let record = make_record(doc.id);
        let now = chrono::Local::now().naive_local();

        complete_extraction(&conn, &record, &now).unwrap();

        let stored = get_extraction_by_document(&conn, &doc.id).unwrap().unwrap();
        assert_eq!(stored.document_type, DocumentType::Invoice);
        assert_eq!(stored.extracted_data["invoice_number"], "F-2024-001");
        assert_eq!(stored.confidence_scores["amount_ttc"], 0.8);

        let doc = get_document(&conn, &doc.id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.processed_at, Some(now));
    }

    #[test]
    fn processed_at_is_not_overwritten() {
        let conn = test_db();
        let mut doc = SourceDocument::new_pending("a.pdf", "/uploads/a.pdf", 10, "application/pdf");
        let earlier = chrono::NaiveDate::from_ymd_opt(2023, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        doc.processed_at = Some(earlier);
        insert_document(&conn, &doc).unwrap();

        complete_extraction(&conn, &make_record(doc.id), &chrono::Local::now().naive_local()).unwrap();
        let doc = get_document(&conn, &doc.id).unwrap().unwrap();
        assert_eq!(doc.processed_at, Some(earlier));
    }

    #[test]
    fn second_extraction_for_same_document_is_rejected_atomically() {
        let conn = test_db();
        let doc = seeded_document(&conn);
        let now = chrono::Local::now().naive_local();
        complete_extraction(&conn, &make_record(doc.id), &now).unwrap();

        assert!(complete_extraction(&conn, &make_record(doc.id), &now).is_err());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM extractions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn extraction_for_unknown_document_leaves_nothing_behind() {
        let conn = test_db();
        let record = make_record(Uuid::new_v4());
        // Foreign key rejects the insert before the status update runs.
        assert!(complete_extraction(&conn, &record, &chrono::Local::now().naive_local()).is_err());
        assert!(get_extraction_by_document(&conn, &record.document_id).unwrap().is_none());
    }

    #[test]
    fn manual_correction_forces_full_confidence() {
        let conn = test_db();
        let doc = seeded_document(&conn);
        complete_extraction(&conn, &make_record(doc.id), &chrono::Local::now().naive_local()).unwrap();

        let corrections = json!({"amount_ttc": 132.0, "supplier": "ACME SARL"});
        let mut scores = BTreeMap::new();
        scores.insert("invoice_number".to_string(), 0.5);
        scores.insert("amount_ttc".to_string(), 0.2);

        let updated = apply_manual_correction(
            &conn,
            &doc.id,
            corrections.as_object().unwrap(),
            Some(&scores),
        )
        .unwrap();

        assert!(updated.manually_corrected);
        assert_eq!(updated.extracted_data["amount_ttc"], 132.0);
        assert_eq!(updated.extracted_data["supplier"], "ACME SARL");
        assert_eq!(updated.confidence_scores["amount_ttc"], 1.0);
        assert_eq!(updated.confidence_scores["supplier"], 1.0);
        assert_eq!(updated.confidence_scores["invoice_number"], 0.5);

        let stored = get_extraction_by_document(&conn, &doc.id).unwrap().unwrap();
        assert!(stored.manually_corrected);
        assert_eq!(stored.confidence_scores["supplier"], 1.0);
    }

    #[test]
    fn correcting_document_type_updates_column() {
        let conn = test_db();
        let doc = seeded_document(&conn);
        complete_extraction(&conn, &make_record(doc.id), &chrono::Local::now().naive_local()).unwrap();

        let corrections = json!({"document_type": "receipt"});
        let updated =
            apply_manual_correction(&conn, &doc.id, corrections.as_object().unwrap(), None).unwrap();
        assert_eq!(updated.document_type, DocumentType::Receipt);
    }

    #[test]
    fn correction_without_extraction_is_not_found() {
        let conn = test_db();
        let doc = seeded_document(&conn);
        let err = apply_manual_correction(&conn, &doc.id, &Map::new(), None).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn document_with_extraction_joins_both_rows() {
        let conn = test_db();
        let doc = seeded_document(&conn);
        let pending = get_document_with_extraction(&conn, &doc.id).unwrap().unwrap();
        assert!(pending.extraction.is_none());

        complete_extraction(&conn, &make_record(doc.id), &chrono::Local::now().naive_local()).unwrap();
        let done = get_document_with_extraction(&conn, &doc.id).unwrap().unwrap();
        assert_eq!(done.document.status, DocumentStatus::Completed);
        assert!(done.extraction.is_some());

        assert!(get_document_with_extraction(&conn, &Uuid::new_v4()).unwrap().is_none());
    }
}

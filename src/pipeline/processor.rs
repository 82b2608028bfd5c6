//! Extraction orchestrator.
//!
//! Drives one document through the pipeline:
//! load → acquire text → model extraction → type/confidence heuristic → persist.
//!
//! Capabilities (OCR engine, PDF reader, model client) come in through
//! traits so the whole run is testable with mock implementations.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use rusqlite::Connection;
use uuid::Uuid;

use crate::db::{repository, DatabaseError};
use crate::models::ExtractionRecord;
use crate::pipeline::extraction::DocumentTextReader;
use crate::pipeline::structuring::{reconcile_metadata, StructuredExtractor};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that end a processing attempt.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("Stored data cannot be decoded: {0}")]
    Decode(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Worker failed: {0}")]
    Worker(String),
}

impl ProcessingError {
    /// Whether another attempt could succeed. A missing document or
    /// undecodable stored data fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Worker(_))
    }
}

impl From<DatabaseError> for ProcessingError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { entity_type, id } if entity_type == "Document" => {
                match Uuid::parse_str(&id) {
                    Ok(id) => Self::DocumentNotFound(id),
                    Err(_) => Self::Persistence(format!("{entity_type} {id} not found")),
                }
            }
            DatabaseError::InvalidEnum { .. } | DatabaseError::Serialization(_) => {
                Self::Decode(e.to_string())
            }
            other => Self::Persistence(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs the full pipeline for one stored document.
pub struct ExtractionOrchestrator {
    reader: DocumentTextReader,
    extractor: StructuredExtractor,
}

impl ExtractionOrchestrator {
    pub fn new(reader: DocumentTextReader, extractor: StructuredExtractor) -> Self {
        Self { reader, extractor }
    }

    /// Process `document_id` and persist its extraction, moving the document
    /// to `completed` in the same transaction.
    ///
    /// Text acquisition and model failures degrade (empty text, fallback
    /// payload); only a missing document or a persistence failure is an error.
    pub fn run(
        &self,
        conn: &Connection,
        document_id: &Uuid,
    ) -> Result<ExtractionRecord, ProcessingError> {
        let document = repository::get_document(conn, document_id)?
            .ok_or(ProcessingError::DocumentNotFound(*document_id))?;

        let start = Instant::now();
        tracing::info!(
            document_id = %document_id,
            mime_type = %document.mime_type,
            "Processing: acquiring text"
        );
        let text = self
            .reader
            .read_text(Path::new(&document.file_path), &document.mime_type);

        tracing::info!(
            document_id = %document_id,
            text_length = text.len(),
            "Processing: structured extraction"
        );
        let mut payload = self.extractor.extract(&text);

        let (document_type, confidence) = reconcile_metadata(
            payload.reported_type(),
            payload.reported_confidence(),
            &text,
            &payload,
        );
        payload.set_document_type(document_type);
        payload.set_confidence(confidence);

        // One document-level score, repeated for every field.
        let confidence_scores: BTreeMap<String, f64> =
            payload.keys().map(|k| (k.clone(), confidence)).collect();

        let now = chrono::Local::now().naive_local();
        let record = ExtractionRecord {
            id: Uuid::new_v4(),
            document_id: *document_id,
            document_type,
            extracted_data: payload.into_map(),
            confidence_scores,
            ocr_text: text,
            processing_time: start.elapsed().as_secs_f64(),
            created_at: now,
            updated_at: now,
            manually_corrected: false,
        };

        repository::complete_extraction(conn, &record, &now)?;

        tracing::info!(
            document_id = %document_id,
            document_type = document_type.as_str(),
            confidence,
            processing_time = record.processing_time,
            "Processing complete"
        );
        Ok(record)
    }
}

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::enums::{DocumentStatus, DocumentType};

/// An uploaded file awaiting or having gone through extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: Uuid,
    pub filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub uploaded_at: NaiveDateTime,
    pub processed_at: Option<NaiveDateTime>,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
}

impl SourceDocument {
    /// A freshly uploaded document in the `pending` state.
    pub fn new_pending(filename: &str, file_path: &str, file_size: i64, mime_type: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            file_path: file_path.to_string(),
            file_size,
            mime_type: mime_type.to_string(),
            uploaded_at: chrono::Local::now().naive_local(),
            processed_at: None,
            status: DocumentStatus::Pending,
            error_message: None,
        }
    }
}

/// Persisted result of one successful pipeline run. 1:1 with a completed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub id: Uuid,
    pub document_id: Uuid,
    pub document_type: DocumentType,
    pub extracted_data: Map<String, Value>,
    pub confidence_scores: BTreeMap<String, f64>,
    pub ocr_text: String,
    /// Wall-clock seconds spent in the pipeline.
    pub processing_time: f64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub manually_corrected: bool,
}

/// A document together with its extraction, if one exists.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentWithExtraction {
    #[serde(flatten)]
    pub document: SourceDocument,
    pub extraction: Option<ExtractionRecord>,
}

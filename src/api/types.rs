//! Shared state and wire types for the HTTP API.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::db::Database;
use crate::models::DocumentWithExtraction;
use crate::pipeline::tasks::{ProgressStore, TaskQueue};
use crate::storage::UploadStorage;

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Limits applied to `POST /api/v1/upload`.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_files: usize,
    pub max_file_bytes: usize,
}

/// Shared context for all API routes. Cheap to clone.
#[derive(Clone)]
pub struct ApiContext {
    pub db: Database,
    pub storage: UploadStorage,
    pub queue: Arc<TaskQueue>,
    pub progress: Arc<dyn ProgressStore>,
    pub limits: UploadLimits,
}

// ═══════════════════════════════════════════════════════════
// Request / response bodies
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
pub struct QueuedDocument {
    pub document_id: Uuid,
    pub task_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub documents: Vec<QueuedDocument>,
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub data: Vec<DocumentWithExtraction>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

/// Body of `PATCH /api/v1/documents/:id/extracted-data`.
#[derive(Debug, Deserialize)]
pub struct CorrectionRequest {
    pub extracted_data: Map<String, Value>,
    #[serde(default)]
    pub confidence_scores: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Serialize)]
pub struct CorrectionResponse {
    pub document_id: Uuid,
    pub extracted_data: Map<String, Value>,
    pub confidence_scores: BTreeMap<String, f64>,
    pub manually_corrected: bool,
}

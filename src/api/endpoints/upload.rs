//! Document upload: validate, store, register, enqueue.
//!
//! `POST /api/v1/upload` takes a multipart body with one or more `files`
//! fields. Every file is checked before any is written, so a bad file
//! rejects the whole request.

use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, QueuedDocument, UploadResponse};
use crate::api::validation::{normalize_mime, validate_upload, Rejection};
use crate::db::repository;
use crate::models::SourceDocument;

/// Multipart field carrying the files.
const FILES_FIELD: &str = "files";

struct IncomingFile {
    filename: String,
    mime: String,
    bytes: Bytes,
}

pub async fn upload(
    State(ctx): State<ApiContext>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        if files.len() == ctx.limits.max_files {
            return Err(ApiError::BadRequest(format!(
                "Maximum {} files per upload",
                ctx.limits.max_files
            )));
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let mime = normalize_mime(field.content_type().unwrap_or_default());
        let bytes = field.bytes().await.map_err(multipart_error)?;
        files.push(IncomingFile {
            filename,
            mime,
            bytes,
        });
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest("No files provided".into()));
    }

    for file in &files {
        validate_upload(&file.mime, &file.bytes, ctx.limits.max_file_bytes).map_err(|rejection| {
            tracing::warn!(filename = %file.filename, reason = %rejection, "Upload rejected");
            let message = format!("{}: {rejection}", file.filename);
            match rejection {
                Rejection::TooLarge { .. } => ApiError::PayloadTooLarge(message),
                _ => ApiError::BadRequest(message),
            }
        })?;
    }

    let conn = ctx.db.connect()?;
    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        let path = ctx.storage.save(&file.filename, &file.bytes)?;
        let doc = SourceDocument::new_pending(
            &file.filename,
            &path.to_string_lossy(),
            file.bytes.len() as i64,
            &file.mime,
        );
        repository::insert_document(&conn, &doc)?;
        let task_id = ctx.queue.enqueue(doc.id)?;

        tracing::info!(
            document_id = %doc.id,
            task_id = %task_id,
            filename = %doc.filename,
            size = doc.file_size,
            "Document accepted"
        );
        documents.push(QueuedDocument {
            document_id: doc.id,
            task_id,
        });
    }

    Ok((StatusCode::ACCEPTED, Json(UploadResponse { documents })))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

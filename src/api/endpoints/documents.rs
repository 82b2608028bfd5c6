//! Document listing, detail and manual correction.

use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use super::parse_id;
use crate::api::error::ApiError;
use crate::api::types::{
    ApiContext, CorrectionRequest, CorrectionResponse, DocumentListResponse,
};
use crate::db::repository;
use crate::models::{
    DocumentFilter, DocumentStatus, DocumentType, DocumentWithExtraction, SortOrder,
};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    pub status: Option<String>,
    pub order: Option<String>,
}

impl ListQuery {
    fn into_filter(self) -> Result<DocumentFilter, ApiError> {
        let defaults = DocumentFilter::default();
        let doc_type = self
            .doc_type
            .as_deref()
            .map(DocumentType::from_str)
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let status = self
            .status
            .as_deref()
            .map(DocumentStatus::from_str)
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let order = match self.order.as_deref() {
            None | Some("desc") => SortOrder::Desc,
            Some("asc") => SortOrder::Asc,
            Some(other) => {
                return Err(ApiError::BadRequest(format!(
                    "order must be 'asc' or 'desc', got '{other}'"
                )))
            }
        };
        Ok(DocumentFilter {
            doc_type,
            status,
            order,
            page: self.page.unwrap_or(defaults.page),
            limit: self.limit.unwrap_or(defaults.limit),
        }
        .normalized())
    }
}

/// `GET /api/v1/documents?page=&limit=&type=&status=&order=`
pub async fn list(
    State(ctx): State<ApiContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DocumentListResponse>, ApiError> {
    let filter = query.into_filter()?;
    let conn = ctx.db.connect()?;

    let total = repository::count_documents(&conn, &filter)?;
    let mut data = Vec::new();
    for document in repository::list_documents(&conn, &filter)? {
        let extraction = repository::get_extraction_by_document(&conn, &document.id)?;
        data.push(DocumentWithExtraction {
            document,
            extraction,
        });
    }

    Ok(Json(DocumentListResponse {
        data,
        total,
        page: filter.page,
        limit: filter.limit,
    }))
}

/// `GET /api/v1/documents/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<DocumentWithExtraction>, ApiError> {
    let id = parse_id(&id, "Document")?;
    let conn = ctx.db.connect()?;
    repository::get_document_with_extraction(&conn, &id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Document {id} not found")))
}

/// `PATCH /api/v1/documents/:id/extracted-data`
///
/// Corrected fields are merged into the extraction with confidence 1.0.
/// 404 when the document has no extraction yet.
pub async fn correct(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    Json(body): Json<CorrectionRequest>,
) -> Result<Json<CorrectionResponse>, ApiError> {
    let id = parse_id(&id, "Document")?;
    if body.extracted_data.is_empty() {
        return Err(ApiError::BadRequest("extracted_data is empty".into()));
    }

    let conn = ctx.db.connect()?;
    if repository::get_document(&conn, &id)?.is_none() {
        return Err(ApiError::NotFound(format!("Document {id} not found")));
    }
    let record = repository::apply_manual_correction(
        &conn,
        &id,
        &body.extracted_data,
        body.confidence_scores.as_ref(),
    )?;

    Ok(Json(CorrectionResponse {
        document_id: id,
        extracted_data: record.extracted_data,
        confidence_scores: record.confidence_scores,
        manually_corrected: record.manually_corrected,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_uses_defaults() {
        let filter = ListQuery::default().into_filter().unwrap();
        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, 20);
        assert_eq!(filter.order, SortOrder::Desc);
        assert!(filter.doc_type.is_none());
    }

    #[test]
    fn limit_is_capped() {
        let query = ListQuery {
            limit: Some(1000),
            order: Some("asc".into()),
            doc_type: Some("invoice".into()),
            ..Default::default()
        };
        let filter = query.into_filter().unwrap();
        assert_eq!(filter.limit, crate::models::MAX_PAGE_SIZE);
        assert_eq!(filter.order, SortOrder::Asc);
        assert_eq!(filter.doc_type, Some(DocumentType::Invoice));
    }

    #[test]
    fn unknown_type_or_order_is_bad_request() {
        let bad_type = ListQuery {
            doc_type: Some("memo".into()),
            ..Default::default()
        };
        assert!(matches!(bad_type.into_filter(), Err(ApiError::BadRequest(_))));

        let bad_order = ListQuery {
            order: Some("sideways".into()),
            ..Default::default()
        };
        assert!(matches!(bad_order.into_filter(), Err(ApiError::BadRequest(_))));
    }
}

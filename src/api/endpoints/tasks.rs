//! Task progress lookup.

use axum::extract::{Path, State};
use axum::Json;

use super::parse_id;
use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::pipeline::tasks::TaskProgress;

/// `GET /api/v1/tasks/:task_id`, 404 once the entry has expired.
pub async fn status(
    State(ctx): State<ApiContext>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskProgress>, ApiError> {
    let id = parse_id(&task_id, "Task")?;
    ctx.progress
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Task {id} not found")))
}

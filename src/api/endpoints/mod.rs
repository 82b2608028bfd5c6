//! API endpoint handlers, one module per resource.

pub mod documents;
pub mod health;
pub mod tasks;
pub mod upload;

use uuid::Uuid;

use crate::api::error::ApiError;

/// Parse a path identifier. Malformed ids cannot exist, so they read as 404.
pub(crate) fn parse_id(raw: &str, entity: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(format!("{entity} {raw} not found")))
}

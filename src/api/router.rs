//! API router.
//!
//! Routes are nested under `/api/v1/`, health sits at `/healthz`.
//! Layers (outermost first): CORS, request tracing, body limit.
//!
//! NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::types::ApiContext;

/// Headroom for multipart framing on top of the file payloads.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// CORS policy from configured origins. `*` allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(allowed))
}

pub fn build_router(ctx: ApiContext, cors: CorsLayer) -> Router {
    let body_limit = ctx
        .limits
        .max_file_bytes
        .saturating_mul(ctx.limits.max_files)
        .saturating_add(MULTIPART_OVERHEAD);

    let api = Router::new()
        .route("/upload", post(endpoints::upload::upload))
        .route("/documents", get(endpoints::documents::list))
        .route("/documents/:id", get(endpoints::documents::detail))
        .route(
            "/documents/:id/extracted-data",
            patch(endpoints::documents::correct),
        )
        .route("/tasks/:task_id", get(endpoints::tasks::status));

    Router::new()
        .route("/healthz", get(endpoints::health::check))
        .nest("/api/v1", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

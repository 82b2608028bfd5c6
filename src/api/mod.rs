//! HTTP API.
//!
//! Upload, document listing and correction, task progress and health,
//! served by axum under `/api/v1/`. Handlers only validate, persist and
//! enqueue; extraction runs on the task queue.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;
pub mod validation;

pub use router::{build_router, cors_layer};
pub use server::{start_server, ApiServer};
pub use types::{ApiContext, UploadLimits};

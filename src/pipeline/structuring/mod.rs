pub mod types;
pub mod prompt;
pub mod parser;
pub mod classify;
pub mod client;
pub mod gemini;
pub mod ollama;

pub use types::*;
pub use prompt::*;
pub use parser::*;
pub use classify::*;
pub use client::*;
pub use gemini::*;
pub use ollama::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StructuringError {
    #[error("Model service unreachable at {0}")]
    Connection(String),

    #[error("Model service returned error (status {status}): {body}")]
    ServiceError { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Model request timed out after {0}s")]
    Timeout(u64),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Model returned no candidates")]
    EmptyResponse,
}

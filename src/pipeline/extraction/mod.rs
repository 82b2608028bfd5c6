pub mod types;
pub mod filters;
pub mod deskew;
pub mod preprocess;
pub mod ocr;
pub mod pdfium;
pub mod docx;
pub mod dispatch;

pub use types::*;
pub use preprocess::*;
pub use ocr::*;
pub use pdfium::*;
pub use dispatch::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot decode document bytes: {0}")]
    Decode(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("OCR timed out after {0}s")]
    OcrTimeout(u64),

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("DOCX parsing failed: {0}")]
    Docx(String),
}

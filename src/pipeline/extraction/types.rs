use std::path::Path;

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

use super::ExtractionError;

/// Single-channel raster ready for OCR, plus the labels of the steps that
/// produced it, in order.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: GrayImage,
    pub steps: Vec<String>,
}

/// One recognized token with its confidence in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    pub confidence: f32,
}

/// Full OCR output for one image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrResult {
    pub text: String,
    pub lines: Vec<OcrLine>,
}

impl OcrResult {
    /// Mean confidence over recognized lines (0.0 when there are none).
    pub fn mean_confidence(&self) -> f32 {
        if self.lines.is_empty() {
            return 0.0;
        }
        self.lines.iter().map(|l| l.confidence).sum::<f32>() / self.lines.len() as f32
    }
}

/// Raw token as reported by an OCR engine. `confidence` is the engine's own
/// string, typically an integer percentage with -1 meaning "unknown".
#[derive(Debug, Clone, PartialEq)]
pub struct OcrToken {
    pub text: String,
    pub confidence: String,
}

/// OCR engine abstraction (allows mocking for tests)
pub trait OcrEngine {
    /// Plain text for the whole image.
    fn recognize_text(&self, image: &GrayImage, lang: &str) -> Result<String, ExtractionError>;

    /// Token records with raw confidences, in reading order.
    fn recognize_tokens(&self, image: &GrayImage, lang: &str)
        -> Result<Vec<OcrToken>, ExtractionError>;
}

/// Page-level access to a PDF. Pages are 0-based.
pub trait PdfReader {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError>;

    /// Native text blocks of the page, in content-stream order.
    fn text_blocks(&self, pdf_bytes: &[u8], page: usize) -> Result<Vec<String>, ExtractionError>;

    /// Raster images embedded in the page.
    fn embedded_images(
        &self,
        pdf_bytes: &[u8],
        page: usize,
    ) -> Result<Vec<DynamicImage>, ExtractionError>;

    /// Rasterize the whole page at `dpi`.
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page: usize,
        dpi: u32,
    ) -> Result<DynamicImage, ExtractionError>;
}

/// Extraction strategy chosen for a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    Pdf,
    Docx,
    PlainText,
    Image,
}

impl SourceFormat {
    /// Pick a strategy from the file extension first, then the declared MIME
    /// type. `None` when neither is recognized.
    pub fn detect(path: &Path, mime_type: &str) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        let by_extension = match ext.as_deref() {
            Some("pdf") => Some(Self::Pdf),
            Some("docx") | Some("doc") => Some(Self::Docx),
            Some("txt") | Some("md") | Some("log") => Some(Self::PlainText),
            Some("jpg") | Some("jpeg") | Some("png") | Some("bmp") | Some("tiff") | Some("tif") => {
                Some(Self::Image)
            }
            _ => None,
        };
        by_extension.or_else(|| Self::from_mime(mime_type))
    }

    fn from_mime(mime_type: &str) -> Option<Self> {
        let mime = mime_type.trim().to_lowercase();
        match mime.as_str() {
            "application/pdf" => Some(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            | "application/msword" => Some(Self::Docx),
            "text/plain" | "text/markdown" => Some(Self::PlainText),
            m if m.starts_with("image/") => Some(Self::Image),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_wins_over_mime() {
        let format = SourceFormat::detect(Path::new("/u/report.PDF"), "image/png");
        assert_eq!(format, Some(SourceFormat::Pdf));
    }

    #[test]
    fn mime_used_when_extension_unknown() {
        let format = SourceFormat::detect(Path::new("/u/upload.bin"), "application/pdf");
        assert_eq!(format, Some(SourceFormat::Pdf));
        let format = SourceFormat::detect(Path::new("/u/noext"), "image/jpeg");
        assert_eq!(format, Some(SourceFormat::Image));
    }

    #[test]
    fn text_and_word_extensions() {
        assert_eq!(
            SourceFormat::detect(Path::new("notes.md"), ""),
            Some(SourceFormat::PlainText)
        );
        assert_eq!(
            SourceFormat::detect(Path::new("contrat.docx"), ""),
            Some(SourceFormat::Docx)
        );
        assert_eq!(
            SourceFormat::detect(Path::new("scan.tiff"), ""),
            Some(SourceFormat::Image)
        );
    }

    #[test]
    fn unknown_everything_is_none() {
        assert_eq!(
            SourceFormat::detect(Path::new("archive.zip"), "application/zip"),
            None
        );
    }

    #[test]
    fn mean_confidence_of_empty_result_is_zero() {
        assert_eq!(OcrResult::default().mean_confidence(), 0.0);
        let result = OcrResult {
            text: "a b".into(),
            lines: vec![
                OcrLine { text: "a".into(), confidence: 0.5 },
                OcrLine { text: "b".into(), confidence: 1.0 },
            ],
        };
        assert!((result.mean_confidence() - 0.75).abs() < 1e-6);
    }
}

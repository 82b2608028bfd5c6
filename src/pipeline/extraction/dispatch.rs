//! Format-aware text acquisition.
//!
//! Chooses a strategy per stored file and never fails: every strategy
//! degrades to empty text, which downstream stages accept.

use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use tracing::{debug, info, warn};

use super::docx::extract_docx_text;
use super::ocr::OcrAdapter;
use super::preprocess::{normalize_decoded, ImageNormalizer};
use super::types::{PdfReader, SourceFormat};
use super::ExtractionError;

/// Rasterization resolution for PDF pages without text or images.
pub const PAGE_RENDER_DPI: u32 = 300;

/// Reads the text of a stored document, OCR-ing whatever has no text layer.
pub struct DocumentTextReader {
    pdf: Arc<dyn PdfReader + Send + Sync>,
    normalizer: ImageNormalizer,
    ocr: OcrAdapter,
}

impl DocumentTextReader {
    pub fn new(pdf: Arc<dyn PdfReader + Send + Sync>, ocr: OcrAdapter) -> Self {
        Self {
            normalizer: ImageNormalizer::new(Arc::clone(&pdf)),
            pdf,
            ocr,
        }
    }

    /// Text of the file at `file_path`. Extension decides the strategy, the
    /// declared MIME type is the fallback, and unknown files go through OCR.
    pub fn read_text(&self, file_path: &Path, mime_type: &str) -> String {
        let format = SourceFormat::detect(file_path, mime_type).unwrap_or_else(|| {
            warn!(
                path = %file_path.display(),
                mime_type,
                "Unrecognized format, falling back to image OCR"
            );
            SourceFormat::Image
        });

        let text = match format {
            SourceFormat::Pdf => self.read_pdf(file_path),
            SourceFormat::Docx => degrade(file_path, "DOCX", read_docx(file_path)),
            SourceFormat::PlainText => degrade(file_path, "text", read_plain_text(file_path)),
            SourceFormat::Image => {
                degrade(file_path, "image", self.read_image(file_path, mime_type))
            }
        };

        if text.is_empty() {
            warn!(path = %file_path.display(), ?format, "No text extracted");
        } else {
            info!(path = %file_path.display(), ?format, chars = text.len(), "Text extracted");
        }
        text
    }

    // ── PDF ──

    fn read_pdf(&self, path: &Path) -> String {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read PDF");
                return String::new();
            }
        };
        let page_count = match self.pdf.page_count(&bytes) {
            Ok(n) => n,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot open PDF");
                return String::new();
            }
        };

        let mut pages = Vec::with_capacity(page_count);
        for page in 0..page_count {
            match self.read_pdf_page(&bytes, page) {
                Ok(text) if !text.trim().is_empty() => pages.push(text),
                Ok(_) => debug!(page, "Page yielded no text"),
                Err(e) => {
                    warn!(path = %path.display(), page, error = %e, "Page extraction failed");
                }
            }
        }
        pages.join("\n\n").trim().to_string()
    }

    /// Native text when the page has any; otherwise OCR of its embedded
    /// images, or of a full-page render when it has none.
    fn read_pdf_page(&self, bytes: &[u8], page: usize) -> Result<String, ExtractionError> {
        let native = self.pdf.text_blocks(bytes, page)?.join("\n");
        if !native.trim().is_empty() {
            debug!(page, "Using native text layer");
            return Ok(native);
        }

        let images = self.pdf.embedded_images(bytes, page)?;
        if images.is_empty() {
            debug!(page, dpi = PAGE_RENDER_DPI, "No text or images, rendering page for OCR");
            let rendered = self.pdf.render_page(bytes, page, PAGE_RENDER_DPI)?;
            return self.ocr_raster(rendered);
        }

        debug!(page, images = images.len(), "OCR of embedded images");
        let mut texts = Vec::with_capacity(images.len());
        for (index, image) in images.into_iter().enumerate() {
            match self.ocr_raster(image) {
                Ok(text) if !text.is_empty() => texts.push(text),
                Ok(_) => {}
                Err(e) => debug!(page, image = index, error = %e, "Embedded image OCR failed"),
            }
        }
        Ok(texts.join("\n"))
    }

    fn ocr_raster(&self, image: DynamicImage) -> Result<String, ExtractionError> {
        let normalized = normalize_decoded(image);
        let result = self.ocr.recognize(&normalized, None)?;
        Ok(result.text.trim().to_string())
    }

    // ── Images ──

    fn read_image(&self, path: &Path, mime_type: &str) -> Result<String, ExtractionError> {
        let bytes = std::fs::read(path)?;
        let normalized = self.normalizer.normalize(&bytes, mime_type)?;
        let result = self.ocr.recognize(&normalized, None)?;
        debug!(
            path = %path.display(),
            tokens = result.lines.len(),
            mean_confidence = result.mean_confidence(),
            "Image OCR complete"
        );
        Ok(result.text.trim().to_string())
    }
}

fn read_docx(path: &Path) -> Result<String, ExtractionError> {
    let bytes = std::fs::read(path)?;
    extract_docx_text(&bytes)
}

fn read_plain_text(path: &Path) -> Result<String, ExtractionError> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).trim().to_string())
}

fn degrade(path: &Path, strategy: &str, result: Result<String, ExtractionError>) -> String {
    result.unwrap_or_else(|e| {
        warn!(path = %path.display(), strategy, error = %e, "Extraction failed, using empty text");
        String::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::ocr::{MockOcrEngine, DEFAULT_OCR_LANGUAGES};
    use crate::pipeline::extraction::pdfium::{MockPdfPage, MockPdfReader};
    use std::io::Cursor;

    struct Fixture {
        reader: DocumentTextReader,
        engine: Arc<MockOcrEngine>,
        pdf: Arc<MockPdfReader>,
        dir: tempfile::TempDir,
    }

    fn fixture(pages: Vec<MockPdfPage>, engine: MockOcrEngine) -> Fixture {
        let engine = Arc::new(engine);
        let pdf = Arc::new(MockPdfReader::new(pages));
        let adapter = OcrAdapter::new(Box::new(Arc::clone(&engine)), DEFAULT_OCR_LANGUAGES);
        let reader = DocumentTextReader::new(pdf.clone(), adapter);
        Fixture {
            reader,
            engine,
            pdf,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn text_page(text: &str) -> MockPdfPage {
        MockPdfPage {
            text_blocks: vec![text.to_string()],
            image_count: 0,
        }
    }

    fn write(fx: &Fixture, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = fx.dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::GrayImage::from_pixel(32, 32, image::Luma([250]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut cursor, image::ImageOutputFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    #[test]
    fn native_text_pages_never_reach_ocr() {
        let fx = fixture(
            vec![text_page("FACTURE N° 42"), text_page("Total TTC 120,00")],
            MockOcrEngine::new("should not appear", "90"),
        );
        let path = write(&fx, "facture.pdf", b"%PDF-1.4");

        let text = fx.reader.read_text(&path, "application/pdf");

        assert_eq!(text, "FACTURE N° 42\n\nTotal TTC 120,00");
        assert_eq!(fx.engine.calls(), 0);
        assert_eq!(fx.pdf.render_calls(), 0);
    }

    #[test]
    fn bare_page_is_rendered_and_ocred_once() {
        let fx = fixture(vec![MockPdfPage::default()], MockOcrEngine::new("Reçu n° 7", "88"));
        let path = write(&fx, "scan.pdf", b"%PDF-1.4");

        let text = fx.reader.read_text(&path, "application/pdf");

        assert_eq!(text, "Reçu n° 7");
        assert_eq!(fx.pdf.render_calls(), 1);
        assert_eq!(fx.engine.calls(), 1);
    }

    #[test]
    fn embedded_images_are_ocred_without_rendering() {
        let fx = fixture(
            vec![MockPdfPage {
                text_blocks: vec!["   ".into()],
                image_count: 2,
            }],
            MockOcrEngine::new("Contrat", "75"),
        );
        let path = write(&fx, "contrat.pdf", b"%PDF-1.4");

        let text = fx.reader.read_text(&path, "application/pdf");

        assert_eq!(text, "Contrat\nContrat");
        assert_eq!(fx.engine.calls(), 2);
        assert_eq!(fx.pdf.render_calls(), 0);
    }

    #[test]
    fn failing_page_contributes_no_text() {
        let fx = fixture(
            vec![text_page("Page un"), MockPdfPage::default()],
            MockOcrEngine::failing(),
        );
        let path = write(&fx, "mixed.pdf", b"%PDF-1.4");

        assert_eq!(fx.reader.read_text(&path, "application/pdf"), "Page un");
    }

    #[test]
    fn failed_embedded_image_keeps_the_others() {
        let fx = fixture(
            vec![MockPdfPage {
                text_blocks: vec![],
                image_count: 3,
            }],
            MockOcrEngine::scripted(&[Some("img0"), None, Some("img2")]),
        );
        let path = write(&fx, "photos.pdf", b"%PDF-1.4");

        assert_eq!(fx.reader.read_text(&path, "application/pdf"), "img0\nimg2");
        assert_eq!(fx.engine.calls(), 3);
    }

    #[test]
    fn blank_image_text_is_not_joined() {
        let fx = fixture(
            vec![MockPdfPage {
                text_blocks: vec![],
                image_count: 3,
            }],
            MockOcrEngine::scripted(&[Some("Ligne 1"), Some("   "), Some("Ligne 3")]),
        );
        let path = write(&fx, "photos.pdf", b"%PDF-1.4");

        assert_eq!(fx.reader.read_text(&path, "application/pdf"), "Ligne 1\nLigne 3");
    }

    #[test]
    fn failing_middle_page_leaves_no_gap() {
        let fx = fixture(
            vec![text_page("A"), MockPdfPage::default(), text_page("C")],
            MockOcrEngine::failing(),
        );
        let path = write(&fx, "gap.pdf", b"%PDF-1.4");

        assert_eq!(fx.reader.read_text(&path, "application/pdf"), "A\n\nC");
        assert_eq!(fx.pdf.render_calls(), 1);
    }

    #[test]
    fn empty_middle_page_leaves_no_gap() {
        let fx = fixture(
            vec![text_page("A"), MockPdfPage::default(), text_page("C")],
            MockOcrEngine::new("  ", "0"),
        );
        let path = write(&fx, "gap.pdf", b"%PDF-1.4");

        assert_eq!(fx.reader.read_text(&path, "application/pdf"), "A\n\nC");
    }

    #[test]
    fn missing_file_yields_empty_text() {
        let fx = fixture(vec![], MockOcrEngine::new("x", "90"));
        let path = fx.dir.path().join("gone.pdf");
        assert_eq!(fx.reader.read_text(&path, "application/pdf"), "");
    }

    #[test]
    fn plain_text_is_read_and_trimmed() {
        let fx = fixture(vec![], MockOcrEngine::new("x", "90"));
        let path = write(&fx, "notes.txt", "\n  Facture n°123, Montant TTC 120.00 \n".as_bytes());
        assert_eq!(fx.reader.read_text(&path, "text/plain"), "Facture n°123, Montant TTC 120.00");
        assert_eq!(fx.engine.calls(), 0);
    }

    #[test]
    fn broken_docx_degrades_to_empty() {
        let fx = fixture(vec![], MockOcrEngine::new("x", "90"));
        let path = write(&fx, "contrat.docx", b"not a zip");
        assert_eq!(fx.reader.read_text(&path, ""), "");
    }

    #[test]
    fn image_goes_through_normalizer_and_ocr() {
        let fx = fixture(vec![], MockOcrEngine::new("  TICKET CAISSE  ", "93"));
        let path = write(&fx, "ticket.png", &png_bytes());
        assert_eq!(fx.reader.read_text(&path, "image/png"), "TICKET CAISSE");
        assert_eq!(fx.engine.calls(), 1);
    }

    #[test]
    fn unknown_format_falls_back_to_image_ocr() {
        let fx = fixture(vec![], MockOcrEngine::new("fallback", "80"));
        let path = write(&fx, "upload.bin", &png_bytes());
        assert_eq!(fx.reader.read_text(&path, "application/octet-stream"), "fallback");
        assert_eq!(fx.engine.calls(), 1);
    }

    #[test]
    fn undecodable_image_degrades_to_empty() {
        let fx = fixture(vec![], MockOcrEngine::new("never", "80"));
        let path = write(&fx, "broken.jpg", b"\xff\xd8 truncated");
        assert_eq!(fx.reader.read_text(&path, "image/jpeg"), "");
        assert_eq!(fx.engine.calls(), 0);
    }
}

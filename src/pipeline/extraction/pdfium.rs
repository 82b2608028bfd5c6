//! PDF access via Google PDFium: native text, embedded images, page rendering.
//!
//! `PdfiumReader` is stateless (`Send + Sync`). Each operation creates a fresh
//! `Pdfium` instance; the OS caches the `dlopen`, so repeat loads are cheap.

use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, GrayImage, Luma};
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::types::PdfReader;
use super::ExtractionError;

/// Maximum dimension (width or height) for rendered page images.
/// Prevents OOM on extremely large pages or absurd DPI settings.
const MAX_DIMENSION_PX: u32 = 4096;

/// PDF points per inch (standard PDF unit).
const POINTS_PER_INCH: f32 = 72.0;

/// Reads PDFs through the PDFium library.
pub struct PdfiumReader;

impl PdfiumReader {
    /// Create a reader, verifying the PDFium library is loadable.
    ///
    /// Discovery order:
    /// 1. `PDFIUM_DYNAMIC_LIB_PATH` env var (explicit path to library file)
    /// 2. Alongside the running executable
    /// 3. System library search paths
    pub fn new() -> Result<Self, ExtractionError> {
        let _ = load_pdfium()?;
        Ok(Self)
    }

    fn with_page<T>(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        f: impl FnOnce(&PdfPage<'_>) -> Result<T, ExtractionError>,
    ) -> Result<T, ExtractionError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;
        let pages = document.pages();

        let page_index = u16::try_from(page_number).map_err(|_| ExtractionError::PdfRendering {
            page: page_number,
            reason: format!("Page index {page_number} exceeds u16 maximum"),
        })?;
        let page = pages
            .get(page_index)
            .map_err(|_| ExtractionError::PdfRendering {
                page: page_number,
                reason: format!(
                    "Page {page_number} out of range (document has {} pages)",
                    pages.len()
                ),
            })?;

        f(&page)
    }
}

fn load_pdfium() -> Result<Pdfium, ExtractionError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Loading PDFium from env var");
        let bindings = Pdfium::bind_to_library(&path).map_err(|e| {
            ExtractionError::PdfRendering {
                page: 0,
                reason: format!("Failed to load PDFium from {path}: {e}"),
            }
        })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let candidates = [exe_dir.to_path_buf(), exe_dir.join("lib")];
            for dir in &candidates {
                let lib_path = Pdfium::pdfium_platform_library_name_at_path(
                    dir.to_string_lossy().as_ref(),
                );
                if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                    debug!(dir = %dir.display(), "Loaded PDFium from candidate directory");
                    return Ok(Pdfium::new(bindings));
                }
            }
        }
    }

    let bindings =
        Pdfium::bind_to_system_library().map_err(|e| ExtractionError::PdfRendering {
            page: 0,
            reason: format!(
                "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
            ),
        })?;
    Ok(Pdfium::new(bindings))
}

/// Encrypted PDFs cannot be read without a password; everything else is a
/// damaged or non-PDF file. Both are decode failures.
fn map_load_error(e: PdfiumError) -> ExtractionError {
    let msg = format!("{e}");
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractionError::Decode("PDF is password protected".into())
    } else {
        ExtractionError::Decode(format!("Failed to load PDF: {e}"))
    }
}

/// Compute pixel dimensions for rendering, applying the dimension guard.
///
/// Returns (width_px, height_px), both clamped to [1, MAX_DIMENSION_PX].
/// Preserves aspect ratio when capping.
fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let max_dim = raw_w.max(raw_h);
    if max_dim > MAX_DIMENSION_PX as f32 {
        let ratio = MAX_DIMENSION_PX as f32 / max_dim;
        let w = ((raw_w * ratio) as u32).max(1).min(MAX_DIMENSION_PX);
        let h = ((raw_h * ratio) as u32).max(1).min(MAX_DIMENSION_PX);
        (w, h)
    } else {
        (raw_w as u32, raw_h as u32)
    }
}

/// Split page text into blank-line separated blocks.
fn split_blocks(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(String::from)
        .collect()
}

impl PdfReader for PdfiumReader {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;
        Ok(document.pages().len() as usize)
    }

    fn text_blocks(&self, pdf_bytes: &[u8], page: usize) -> Result<Vec<String>, ExtractionError> {
        self.with_page(pdf_bytes, page, |p| {
            let text = p.text().map_err(|e| ExtractionError::PdfRendering {
                page,
                reason: format!("Text layer unreadable: {e}"),
            })?;
            Ok(split_blocks(&text.all()))
        })
    }

    fn embedded_images(
        &self,
        pdf_bytes: &[u8],
        page: usize,
    ) -> Result<Vec<DynamicImage>, ExtractionError> {
        self.with_page(pdf_bytes, page, |p| {
            let mut images = Vec::new();
            for object in p.objects().iter() {
                if let Some(image_object) = object.as_image_object() {
                    match image_object.get_raw_image() {
                        Ok(img) => images.push(img),
                        Err(e) => warn!(page, error = %e, "Skipping unreadable embedded image"),
                    }
                }
            }
            Ok(images)
        })
    }

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page: usize,
        dpi: u32,
    ) -> Result<DynamicImage, ExtractionError> {
        self.with_page(pdf_bytes, page, |p| {
            let width_points = p.width().value;
            let height_points = p.height().value;
            let (target_w, target_h) = compute_render_dimensions(width_points, height_points, dpi);

            let uncapped_w = (width_points * dpi as f32 / POINTS_PER_INCH) as u32;
            let uncapped_h = (height_points * dpi as f32 / POINTS_PER_INCH) as u32;
            if target_w != uncapped_w || target_h != uncapped_h {
                warn!(
                    page,
                    raw_width = uncapped_w,
                    raw_height = uncapped_h,
                    capped_width = target_w,
                    capped_height = target_h,
                    "Page dimensions capped to {MAX_DIMENSION_PX}px",
                );
            }

            let config = PdfRenderConfig::new()
                .set_target_width(target_w as i32)
                .set_maximum_height(target_h as i32);

            let bitmap = p
                .render_with_config(&config)
                .map_err(|e| ExtractionError::PdfRendering {
                    page,
                    reason: format!("Rendering failed: {e}"),
                })?;

            debug!(page, width = target_w, height = target_h, "Rendered PDF page");
            Ok(bitmap.as_image())
        })
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Content of one page served by `MockPdfReader`.
#[derive(Debug, Clone, Default)]
pub struct MockPdfPage {
    pub text_blocks: Vec<String>,
    pub image_count: usize,
}

/// In-memory PDF reader that ignores the bytes it is given and serves the
/// configured pages. Counts renders so tests can assert on OCR fallbacks.
pub struct MockPdfReader {
    pages: Vec<MockPdfPage>,
    render_calls: AtomicUsize,
}

impl MockPdfReader {
    pub fn new(pages: Vec<MockPdfPage>) -> Self {
        Self {
            pages,
            render_calls: AtomicUsize::new(0),
        }
    }

    /// `count` pages with neither a text layer nor embedded images.
    pub fn scanned(count: usize) -> Self {
        Self::new(vec![MockPdfPage::default(); count])
    }

    pub fn render_calls(&self) -> usize {
        self.render_calls.load(Ordering::SeqCst)
    }

    fn page(&self, page: usize) -> Result<&MockPdfPage, ExtractionError> {
        self.pages.get(page).ok_or_else(|| ExtractionError::PdfRendering {
            page,
            reason: format!("Page {page} out of range (mock has {} pages)", self.pages.len()),
        })
    }
}

/// Small light page with one dark bar, enough for the normalizer to chew on.
fn mock_page_image() -> DynamicImage {
    let mut img = GrayImage::from_pixel(64, 48, Luma([240]));
    for x in 8..56 {
        for y in 20..26 {
            img.put_pixel(x, y, Luma([10]));
        }
    }
    DynamicImage::ImageLuma8(img)
}

impl PdfReader for MockPdfReader {
    fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        Ok(self.pages.len())
    }

    fn text_blocks(&self, _pdf_bytes: &[u8], page: usize) -> Result<Vec<String>, ExtractionError> {
        Ok(self.page(page)?.text_blocks.clone())
    }

    fn embedded_images(
        &self,
        _pdf_bytes: &[u8],
        page: usize,
    ) -> Result<Vec<DynamicImage>, ExtractionError> {
        let count = self.page(page)?.image_count;
        Ok((0..count).map(|_| mock_page_image()).collect())
    }

    fn render_page(
        &self,
        _pdf_bytes: &[u8],
        page: usize,
        _dpi: u32,
    ) -> Result<DynamicImage, ExtractionError> {
        self.page(page)?;
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        Ok(mock_page_image())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Pure dimension logic tests (no PDFium needed) ──

    #[test]
    fn a4_at_300dpi() {
        let (w, h) = compute_render_dimensions(595.0, 842.0, 300);
        assert!(w > 2400 && w < 2550, "A4 width at 300dpi: got {w}");
        assert!(h > 3450 && h < 3600, "A4 height at 300dpi: got {h}");
    }

    #[test]
    fn dimension_guard_caps_oversized() {
        let (w, h) = compute_render_dimensions(5000.0, 7000.0, 300);
        assert!(w <= MAX_DIMENSION_PX, "Width {w} exceeds {MAX_DIMENSION_PX}");
        assert!(h <= MAX_DIMENSION_PX, "Height {h} exceeds {MAX_DIMENSION_PX}");
    }

    #[test]
    fn dimension_guard_preserves_aspect_ratio() {
        let (w, h) = compute_render_dimensions(5000.0, 10000.0, 300);
        let ratio = h as f32 / w as f32;
        assert!((ratio - 2.0).abs() < 0.15, "Aspect ratio should be ~2:1, got {ratio}");
    }

    #[test]
    fn zero_points_clamped_to_1() {
        let (w, h) = compute_render_dimensions(0.0, 0.0, 300);
        assert!(w >= 1 && h >= 1);
    }

    #[test]
    fn blocks_split_on_blank_lines() {
        let blocks = split_blocks("FACTURE N° 12\r\nACME SARL\r\n\r\nTotal TTC 120,00\n\n  \n");
        assert_eq!(blocks, vec!["FACTURE N° 12\nACME SARL", "Total TTC 120,00"]);
    }

    #[test]
    fn blank_text_layer_yields_no_blocks() {
        assert!(split_blocks(" \n\n \r\n").is_empty());
    }

    // ── Mock reader tests ──

    #[test]
    fn mock_serves_configured_pages() {
        let mock = MockPdfReader::new(vec![
            MockPdfPage {
                text_blocks: vec!["Contrat".into()],
                image_count: 0,
            },
            MockPdfPage {
                text_blocks: vec![],
                image_count: 2,
            },
        ]);
        assert_eq!(mock.page_count(&[]).unwrap(), 2);
        assert_eq!(mock.text_blocks(&[], 0).unwrap(), vec!["Contrat"]);
        assert_eq!(mock.embedded_images(&[], 1).unwrap().len(), 2);
    }

    #[test]
    fn mock_counts_renders_and_rejects_out_of_range() {
        let mock = MockPdfReader::scanned(1);
        assert!(mock.render_page(&[], 0, 300).is_ok());
        let err = mock.render_page(&[], 1, 300).unwrap_err();
        assert!(matches!(err, ExtractionError::PdfRendering { page: 1, .. }));
        assert_eq!(mock.render_calls(), 1);
    }
}

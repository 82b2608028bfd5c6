//! Image normalization ahead of OCR.
//!
//! Fixed order: decode → grayscale → rotation correction → denoise →
//! adaptive threshold → deskew → border removal. Only decoding can fail the
//! whole run; every later step falls back to passing its input through.

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, GrayImage, ImageOutputFormat};
use tracing::{debug, warn};

use super::deskew::{hough_rotation_correction, ink_rotation_correction, rotate_about_center};
use super::filters::{adaptive_threshold_gaussian, crop_to_content, denoise, rgb_to_gray};
use super::types::{NormalizedImage, PdfReader};
use super::ExtractionError;

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Filter strength of the denoising step.
pub const DENOISE_STRENGTH: f32 = 10.0;

/// Neighbourhood of the adaptive threshold (pixels, odd).
pub const THRESHOLD_BLOCK_SIZE: u32 = 35;

/// Offset subtracted from the local mean before comparing.
pub const THRESHOLD_OFFSET: f32 = 11.0;

/// Canny hysteresis thresholds used before the Hough deskew.
pub const CANNY_LOW: f32 = 50.0;
pub const CANNY_HIGH: f32 = 150.0;

/// Minimum Hough votes for a line to count.
pub const HOUGH_VOTES: u32 = 200;

/// Resolution used when a PDF is rasterized for normalization.
pub const PDF_RENDER_DPI: u32 = 300;

// ═══════════════════════════════════════════════════════════
// Normalizer
// ═══════════════════════════════════════════════════════════

/// Turns raw document bytes into a binarized, deskewed, cropped raster.
pub struct ImageNormalizer {
    pdf: Arc<dyn PdfReader + Send + Sync>,
}

impl ImageNormalizer {
    pub fn new(pdf: Arc<dyn PdfReader + Send + Sync>) -> Self {
        Self { pdf }
    }

    /// Run the full normalization over `bytes` declared as `mime_type`.
    pub fn normalize(&self, bytes: &[u8], mime_type: &str) -> Result<NormalizedImage, ExtractionError> {
        let decoded = self.decode(bytes, mime_type)?;
        Ok(normalize_decoded(decoded))
    }

    /// Decode to a raster. PDFs contribute their first page only.
    fn decode(&self, bytes: &[u8], mime_type: &str) -> Result<DynamicImage, ExtractionError> {
        if mime_type.eq_ignore_ascii_case("application/pdf") {
            return self
                .pdf
                .render_page(bytes, 0, PDF_RENDER_DPI)
                .map_err(|e| ExtractionError::Decode(format!("cannot render first PDF page: {e}")));
        }
        image::load_from_memory(bytes).map_err(|e| ExtractionError::Decode(e.to_string()))
    }
}

/// Normalize an already-decoded raster.
pub fn normalize_decoded(decoded: DynamicImage) -> NormalizedImage {
    let mut steps = vec!["Loaded image".to_string()];

    let gray = rgb_to_gray(&decoded.to_rgb8());
    steps.push("Grayscale conversion".to_string());

    let gray = guarded("Rotation correction", gray, |img| match ink_rotation_correction(&img) {
        Some(angle) => {
            debug!(angle, "Rotation correction");
            rotate_about_center(&img, angle)
        }
        None => img,
    });
    steps.push("Rotation correction".to_string());

    let denoised = guarded("Denoising", gray, |img| denoise(&img, DENOISE_STRENGTH));
    steps.push("Denoising".to_string());

    let binary = guarded("Adaptive threshold", denoised, |img| {
        adaptive_threshold_gaussian(&img, THRESHOLD_BLOCK_SIZE, THRESHOLD_OFFSET)
    });
    steps.push("Adaptive threshold".to_string());

    let deskewed = guarded("Deskew", binary, |img| {
        match hough_rotation_correction(&img, CANNY_LOW, CANNY_HIGH, HOUGH_VOTES) {
            Some(angle) => {
                debug!(angle, "Deskew");
                rotate_about_center(&img, angle)
            }
            None => img,
        }
    });
    steps.push("Deskew".to_string());

    let cropped = guarded("Border removal", deskewed, crop_to_content);
    steps.push("Border removal".to_string());

    NormalizedImage {
        image: cropped,
        steps,
    }
}

/// Run a step that must never take the pipeline down: a panic inside it is
/// logged and the input passes through untouched.
fn guarded(step: &str, input: GrayImage, f: impl FnOnce(GrayImage) -> GrayImage) -> GrayImage {
    let fallback = input.clone();
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(input))) {
        Ok(out) => out,
        Err(_) => {
            warn!(step, "Normalization step failed, keeping previous image");
            fallback
        }
    }
}

/// Encode a grayscale image as PNG bytes.
/// Default compression: images are transient, never archived.
pub fn encode_png(img: &GrayImage) -> Result<Vec<u8>, ExtractionError> {
    let dynamic = DynamicImage::ImageLuma8(img.clone());
    let mut cursor = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::pdfium::MockPdfReader;
    use image::{Luma, Rgb, RgbImage};

    fn normalizer() -> ImageNormalizer {
        ImageNormalizer::new(Arc::new(MockPdfReader::scanned(1)))
    }

    fn sample_png() -> Vec<u8> {
        let mut img = RgbImage::from_pixel(80, 60, Rgb([235, 235, 235]));
        for x in 10..70 {
            for y in 25..31 {
                img.put_pixel(x, y, Rgb([20, 20, 20]));
            }
        }
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    #[test]
    fn steps_are_logged_in_order() {
        let result = normalizer().normalize(&sample_png(), "image/png").unwrap();
        assert_eq!(
            result.steps,
            vec![
                "Loaded image",
                "Grayscale conversion",
                "Rotation correction",
                "Denoising",
                "Adaptive threshold",
                "Deskew",
                "Border removal",
            ]
        );
    }

    #[test]
    fn output_is_binary() {
        let result = normalizer().normalize(&sample_png(), "image/png").unwrap();
        assert!(result.image.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert!(result.image.width() > 0 && result.image.height() > 0);
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let err = normalizer().normalize(b"not an image at all", "image/png").unwrap_err();
        assert!(matches!(err, ExtractionError::Decode(_)));
    }

    #[test]
    fn pdf_uses_first_rendered_page() {
        let result = normalizer().normalize(b"%PDF-1.4", "application/pdf").unwrap();
        assert_eq!(result.steps.len(), 7);
    }

    #[test]
    fn unrenderable_pdf_is_a_decode_error() {
        let normalizer = ImageNormalizer::new(Arc::new(MockPdfReader::scanned(0)));
        let err = normalizer.normalize(b"%PDF-1.4", "application/pdf").unwrap_err();
        assert!(matches!(err, ExtractionError::Decode(_)));
    }

    #[test]
    fn guarded_step_survives_panic() {
        let img = GrayImage::from_pixel(4, 4, Luma([7]));
        let out = guarded("test", img.clone(), |_| panic!("kernel bug"));
        assert_eq!(out, img);
    }

    #[test]
    fn png_encoding_has_signature() {
        let png = encode_png(&GrayImage::new(3, 3)).unwrap();
        assert_eq!(&png[..4], &[0x89, 0x50, 0x4E, 0x47]);
    }
}

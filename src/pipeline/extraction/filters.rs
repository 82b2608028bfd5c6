//! Raster kernels used by the image normalizer.
//!
//! Pure Rust over `image::GrayImage`, no `imageproc` dependency. Each kernel
//! mirrors the behaviour of its usual document-scanning counterpart
//! (Gaussian adaptive threshold, Canny, range-weighted denoise).

use image::{GrayImage, Luma, RgbImage};

// ═══════════════════════════════════════════════════════════
// Color conversion
// ═══════════════════════════════════════════════════════════

/// Convert RGB image to grayscale using ITU-R BT.601 luminance.
pub fn rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    let (w, h) = (rgb.width(), rgb.height());
    let mut gray = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let p = rgb.get_pixel(x, y);
            let luma = (0.299 * p.0[0] as f32
                + 0.587 * p.0[1] as f32
                + 0.114 * p.0[2] as f32)
                .round()
                .clamp(0.0, 255.0) as u8;
            gray.put_pixel(x, y, Luma([luma]));
        }
    }
    gray
}

// ═══════════════════════════════════════════════════════════
// Denoising
// ═══════════════════════════════════════════════════════════

/// Spatial window radius of the denoiser (7x7 window).
const DENOISE_RADIUS: u32 = 3;

/// Edge-preserving denoise: every pixel becomes the range-weighted mean of its
/// 7x7 neighbourhood, with weight `exp(-(diff / h)^2)`.
///
/// `h` plays the same role as the filter strength of non-local means: larger
/// values smooth more, and differences well above `h` barely contribute, so
/// glyph edges survive.
pub fn denoise(img: &GrayImage, h: f32) -> GrayImage {
    let (w, ht) = (img.width(), img.height());
    let mut output = GrayImage::new(w, ht);
    if w == 0 || ht == 0 {
        return output;
    }

    // Weight per absolute intensity difference.
    let h_sq = (h * h).max(f32::EPSILON);
    let weights: Vec<f32> = (0..256)
        .map(|d| {
            let d = d as f32;
            (-(d * d) / h_sq).exp()
        })
        .collect();

    for y in 0..ht {
        let y_start = y.saturating_sub(DENOISE_RADIUS);
        let y_end = (y + DENOISE_RADIUS + 1).min(ht);
        for x in 0..w {
            let center = img.get_pixel(x, y).0[0];
            let x_start = x.saturating_sub(DENOISE_RADIUS);
            let x_end = (x + DENOISE_RADIUS + 1).min(w);

            let mut sum = 0.0f32;
            let mut weight_sum = 0.0f32;
            for ny in y_start..y_end {
                for nx in x_start..x_end {
                    let v = img.get_pixel(nx, ny).0[0];
                    let weight = weights[center.abs_diff(v) as usize];
                    sum += v as f32 * weight;
                    weight_sum += weight;
                }
            }

            let value = if weight_sum > 0.0 {
                (sum / weight_sum).round().clamp(0.0, 255.0) as u8
            } else {
                center
            };
            output.put_pixel(x, y, Luma([value]));
        }
    }

    output
}

// ═══════════════════════════════════════════════════════════
// Adaptive threshold
// ═══════════════════════════════════════════════════════════

/// Gaussian sigma for a given kernel size, as used when none is specified.
fn default_gaussian_sigma(block_size: u32) -> f32 {
    0.3 * ((block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

fn gaussian_kernel(block_size: u32) -> Vec<f32> {
    let sigma = default_gaussian_sigma(block_size);
    let half = (block_size / 2) as i32;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let raw: Vec<f32> = (-half..=half)
        .map(|i| (-((i * i) as f32) / two_sigma_sq).exp())
        .collect();
    let total: f32 = raw.iter().sum();
    raw.into_iter().map(|v| v / total).collect()
}

/// Separable Gaussian blur with replicated borders, kept in f32.
fn gaussian_blur_f32(img: &GrayImage, block_size: u32) -> Vec<f32> {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let kernel = gaussian_kernel(block_size);
    let half = (kernel.len() / 2) as i64;
    let clamp = |v: i64, max: i64| v.clamp(0, max - 1);

    let mut horizontal = vec![0.0f32; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = clamp(x + k as i64 - half, w);
                acc += img.get_pixel(sx as u32, y as u32).0[0] as f32 * weight;
            }
            horizontal[(y * w + x) as usize] = acc;
        }
    }

    let mut blurred = vec![0.0f32; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = clamp(y + k as i64 - half, h);
                acc += horizontal[(sy * w + x) as usize] * weight;
            }
            blurred[(y * w + x) as usize] = acc;
        }
    }
    blurred
}

/// Binarize against a Gaussian-weighted local mean over a `block_size` window.
/// A pixel becomes 255 when it is brighter than `mean - c`, else 0.
///
/// `block_size` must be odd; even values are bumped to the next odd size.
pub fn adaptive_threshold_gaussian(img: &GrayImage, block_size: u32, c: f32) -> GrayImage {
    let (w, h) = (img.width(), img.height());
    let mut output = GrayImage::new(w, h);
    if w == 0 || h == 0 {
        return output;
    }

    let block_size = if block_size % 2 == 0 { block_size + 1 } else { block_size.max(3) };
    let means = gaussian_blur_f32(img, block_size);

    for y in 0..h {
        for x in 0..w {
            let mean = means[(y * w + x) as usize].round();
            let v = img.get_pixel(x, y).0[0] as f32;
            let out = if v > mean - c { 255 } else { 0 };
            output.put_pixel(x, y, Luma([out]));
        }
    }
    output
}

// ═══════════════════════════════════════════════════════════
// Canny edge detection
// ═══════════════════════════════════════════════════════════

/// Canny edge map (255 = edge) with 3x3 Sobel gradients, L1 magnitude,
/// non-maximum suppression and hysteresis between `low` and `high`.
pub fn canny(img: &GrayImage, low: f32, high: f32) -> GrayImage {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let mut edges = GrayImage::new(w as u32, h as u32);
    if w < 3 || h < 3 {
        return edges;
    }

    let px = |x: usize, y: usize| img.get_pixel(x as u32, y as u32).0[0] as f32;
    let mut gx = vec![0.0f32; w * h];
    let mut gy = vec![0.0f32; w * h];
    let mut magnitude = vec![0.0f32; w * h];

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let dx = (px(x + 1, y - 1) + 2.0 * px(x + 1, y) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x - 1, y) + px(x - 1, y + 1));
            let dy = (px(x - 1, y + 1) + 2.0 * px(x, y + 1) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x, y - 1) + px(x + 1, y - 1));
            let i = y * w + x;
            gx[i] = dx;
            gy[i] = dy;
            magnitude[i] = dx.abs() + dy.abs();
        }
    }

    // 0 = suppressed, 1 = weak candidate, 2 = strong edge
    let mut class = vec![0u8; w * h];
    let tan_22_5 = 0.414_213_57f32;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = y * w + x;
            let m = magnitude[i];
            if m <= low {
                continue;
            }
            let (ax, ay) = (gx[i].abs(), gy[i].abs());
            let (a, b) = if ay <= ax * tan_22_5 {
                // Horizontal gradient: compare left/right
                (magnitude[i - 1], magnitude[i + 1])
            } else if ay > ax / tan_22_5 {
                // Vertical gradient: compare up/down
                (magnitude[i - w], magnitude[i + w])
            } else if (gx[i] > 0.0) == (gy[i] > 0.0) {
                (magnitude[i - w - 1], magnitude[i + w + 1])
            } else {
                (magnitude[i - w + 1], magnitude[i + w - 1])
            };
            if m > a && m >= b {
                class[i] = if m > high { 2 } else { 1 };
            }
        }
    }

    // Hysteresis: grow strong edges through 8-connected weak pixels.
    let mut stack: Vec<usize> = (0..w * h).filter(|&i| class[i] == 2).collect();
    while let Some(i) = stack.pop() {
        let (x, y) = (i % w, i / w);
        edges.put_pixel(x as u32, y as u32, Luma([255]));
        for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                let j = ny * w + nx;
                if class[j] == 1 {
                    class[j] = 2;
                    stack.push(j);
                }
            }
        }
    }

    edges
}

// ═══════════════════════════════════════════════════════════
// Geometry helpers
// ═══════════════════════════════════════════════════════════

/// Bounding box `(x, y, width, height)` of all non-zero pixels.
pub fn nonzero_bounding_box(img: &GrayImage) -> Option<(u32, u32, u32, u32)> {
    let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
    let (mut max_x, mut max_y) = (0u32, 0u32);
    let mut found = false;

    for (x, y, p) in img.enumerate_pixels() {
        if p.0[0] != 0 {
            found = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    found.then(|| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Crop to the non-zero bounding box; an all-zero image is returned unchanged.
pub fn crop_to_content(img: GrayImage) -> GrayImage {
    match nonzero_bounding_box(&img) {
        Some((x, y, w, h)) if (w, h) != img.dimensions() => {
            image::imageops::crop_imm(&img, x, y, w, h).to_image()
        }
        _ => img,
    }
}

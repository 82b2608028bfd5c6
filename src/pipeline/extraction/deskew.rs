//! Skew estimation and rotation.
//!
//! Two estimators feed the normalizer: a minimum-area bounding rectangle over
//! ink pixels (coarse rotation on the grayscale page) and a Hough transform over
//! Canny edges (fine deskew on the binarized page).

use image::{GrayImage, Luma};

use super::filters::canny;

/// Pixels darker than this count as ink for the bounding-rectangle estimate.
const INK_THRESHOLD: u8 = 128;

/// Rotations smaller than this (degrees) are skipped.
const MIN_ROTATION_DEG: f64 = 0.01;

// ═══════════════════════════════════════════════════════════
// Minimum-area rectangle
// ═══════════════════════════════════════════════════════════

/// Collect ink pixels as `(row, col)` points.
///
/// Only the leftmost and rightmost ink pixel of each row are kept: the convex
/// hull of those is the hull of the whole set.
fn ink_extremes(img: &GrayImage) -> Vec<(f64, f64)> {
    let mut points = Vec::new();
    for y in 0..img.height() {
        let mut first = None;
        let mut last = None;
        for x in 0..img.width() {
            if img.get_pixel(x, y).0[0] < INK_THRESHOLD {
                if first.is_none() {
                    first = Some(x);
                }
                last = Some(x);
            }
        }
        if let (Some(a), Some(b)) = (first, last) {
            points.push((y as f64, a as f64));
            if b != a {
                points.push((y as f64, b as f64));
            }
        }
    }
    points
}

fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Andrew's monotone chain. Returns the hull counter-clockwise, without the
/// closing point.
pub fn convex_hull(mut points: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    points.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    });
    points.dedup();
    if points.len() < 3 {
        return points;
    }

    let mut lower: Vec<(f64, f64)> = Vec::new();
    for &p in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<(f64, f64)> = Vec::new();
    for &p in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Angle of the minimum-area rectangle enclosing `points`, in degrees within
/// (-90, 0]. Rotating calipers over the convex hull edges.
pub fn min_area_rect_angle(points: Vec<(f64, f64)>) -> Option<f64> {
    let hull = convex_hull(points);
    if hull.len() < 3 {
        return None;
    }

    let mut best: Option<(f64, f64)> = None; // (area, edge angle in degrees)
    for i in 0..hull.len() {
        let p = hull[i];
        let q = hull[(i + 1) % hull.len()];
        let (dx, dy) = (q.0 - p.0, q.1 - p.1);
        let len = (dx * dx + dy * dy).sqrt();
        if len == 0.0 {
            continue;
        }
        let (ux, uy) = (dx / len, dy / len);

        let (mut min_u, mut max_u) = (f64::MAX, f64::MIN);
        let (mut min_v, mut max_v) = (f64::MAX, f64::MIN);
        for &(x, y) in &hull {
            let u = x * ux + y * uy;
            let v = -x * uy + y * ux;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }
        let area = (max_u - min_u) * (max_v - min_v);
        if best.map_or(true, |(a, _)| area < a) {
            best = Some((area, uy.atan2(ux).to_degrees()));
        }
    }

    best.map(|(_, edge_angle)| {
        let m = edge_angle.rem_euclid(90.0);
        if m.abs() < 1e-9 {
            0.0
        } else {
            m - 90.0
        }
    })
}

/// Rotation (degrees, counter-clockwise positive) that levels the ink of `img`.
///
/// The rectangle angle is folded the usual way: below -45 it becomes
/// `-(90 + angle)`, otherwise `-angle`.
pub fn ink_rotation_correction(img: &GrayImage) -> Option<f64> {
    let points = ink_extremes(img);
    if points.is_empty() {
        return None;
    }
    let angle = min_area_rect_angle(points)?;
    Some(if angle < -45.0 { -(90.0 + angle) } else { -angle })
}

// ═══════════════════════════════════════════════════════════
// Hough transform
// ═══════════════════════════════════════════════════════════

/// Standard Hough transform over non-zero pixels of an edge map.
///
/// Resolution is 1 px in rho and 1 degree in theta. Returns `(rho, theta)` of
/// every accumulator cell above `threshold` votes that is a local maximum
/// along both axes.
pub fn hough_lines(edges: &GrayImage, threshold: u32) -> Vec<(f64, f64)> {
    let (w, h) = (edges.width() as f64, edges.height() as f64);
    let num_theta = 180usize;
    let max_rho = (w * w + h * h).sqrt().ceil() as i64;
    let num_rho = (2 * max_rho + 1) as usize;

    let trig: Vec<(f64, f64)> = (0..num_theta)
        .map(|t| {
            let theta = (t as f64).to_radians();
            (theta.cos(), theta.sin())
        })
        .collect();

    let mut acc = vec![0u32; num_theta * num_rho];
    for (x, y, p) in edges.enumerate_pixels() {
        if p.0[0] == 0 {
            continue;
        }
        for (t, &(cos_t, sin_t)) in trig.iter().enumerate() {
            let rho = (x as f64 * cos_t + y as f64 * sin_t).round() as i64 + max_rho;
            acc[t * num_rho + rho as usize] += 1;
        }
    }

    let at = |t: usize, r: usize| acc[t * num_rho + r];
    let mut lines = Vec::new();
    for t in 0..num_theta {
        for r in 0..num_rho {
            let votes = at(t, r);
            if votes <= threshold {
                continue;
            }
            let left = if r > 0 { at(t, r - 1) } else { 0 };
            let right = if r + 1 < num_rho { at(t, r + 1) } else { 0 };
            let up = if t > 0 { at(t - 1, r) } else { 0 };
            let down = if t + 1 < num_theta { at(t + 1, r) } else { 0 };
            if votes > left && votes >= right && votes > up && votes >= down {
                lines.push(((r as i64 - max_rho) as f64, (t as f64).to_radians()));
            }
        }
    }
    lines
}

/// Fine deskew angle (degrees): the mean of `theta - 90°` over all Hough lines
/// of the Canny edge map. `None` when no line clears the vote threshold.
pub fn hough_rotation_correction(img: &GrayImage, low: f32, high: f32, votes: u32) -> Option<f64> {
    let edges = canny(img, low, high);
    let lines = hough_lines(&edges, votes);
    if lines.is_empty() {
        return None;
    }
    let mean = lines
        .iter()
        .map(|&(_, theta)| theta - std::f64::consts::FRAC_PI_2)
        .sum::<f64>()
        / lines.len() as f64;
    Some(mean.to_degrees())
}

// ═══════════════════════════════════════════════════════════
// Rotation
// ═══════════════════════════════════════════════════════════

/// Rotate about the image centre by `angle_deg` (counter-clockwise on screen),
/// keeping the original canvas. Uncovered pixels are filled with 0; sampling
/// is bilinear.
pub fn rotate_about_center(img: &GrayImage, angle_deg: f64) -> GrayImage {
    if angle_deg.abs() < MIN_ROTATION_DEG {
        return img.clone();
    }
    let (w, h) = (img.width(), img.height());
    let (cx, cy) = ((w / 2) as f64, (h / 2) as f64);
    let (sin_a, cos_a) = angle_deg.to_radians().sin_cos();
    let mut output = GrayImage::new(w, h);

    for y in 0..h {
        for x in 0..w {
            // Inverse of the forward map: rotate the destination back onto the source.
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let sx = cos_a * dx - sin_a * dy + cx;
            let sy = sin_a * dx + cos_a * dy + cy;
            if let Some(v) = sample_bilinear(img, sx, sy) {
                output.put_pixel(x, y, Luma([v]));
            }
        }
    }
    output
}

fn sample_bilinear(img: &GrayImage, x: f64, y: f64) -> Option<u8> {
    let (w, h) = (img.width() as f64, img.height() as f64);
    if x < 0.0 || y < 0.0 || x > w - 1.0 || y > h - 1.0 {
        return None;
    }
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let x1 = (x0 + 1).min(img.width() - 1);
    let y1 = (y0 + 1).min(img.height() - 1);
    let (fx, fy) = (x - x0 as f64, y - y0 as f64);

    let p = |px: u32, py: u32| img.get_pixel(px, py).0[0] as f64;
    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    Some((top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// White page with a dark bar tilted `angle_deg` counter-clockwise on screen.
    fn tilted_bar(angle_deg: f64) -> GrayImage {
        let (w, h) = (240u32, 240u32);
        let mut img = GrayImage::from_pixel(w, h, Luma([255]));
        let (sin_a, cos_a) = angle_deg.to_radians().sin_cos();
        let (cx, cy) = (120.0, 120.0);
        for y in 0..h {
            for x in 0..w {
                let dx = x as f64 - cx;
                let dy = y as f64 - cy;
                // Coordinates in the bar frame (y grows downwards on screen).
                let along = dx * cos_a - dy * sin_a;
                let across = dx * sin_a + dy * cos_a;
                if along.abs() <= 90.0 && across.abs() <= 12.0 {
                    img.put_pixel(x, y, Luma([0]));
                }
            }
        }
        img
    }

    #[test]
    fn hull_of_square_has_four_corners() {
        let points = vec![(0.0, 0.0), (0.0, 2.0), (2.0, 0.0), (2.0, 2.0), (1.0, 1.0)];
        assert_eq!(convex_hull(points).len(), 4);
    }

    #[test]
    fn axis_aligned_rectangle_needs_no_correction() {
        let correction = ink_rotation_correction(&tilted_bar(0.0)).unwrap();
        assert!(correction.abs() < 0.5, "got {correction}");
    }

    #[test]
    fn counter_clockwise_tilt_is_corrected_clockwise() {
        let correction = ink_rotation_correction(&tilted_bar(6.0)).unwrap();
        assert!((correction + 6.0).abs() < 1.0, "got {correction}");
    }

    #[test]
    fn clockwise_tilt_is_corrected_counter_clockwise() {
        let correction = ink_rotation_correction(&tilted_bar(-6.0)).unwrap();
        assert!((correction - 6.0).abs() < 1.0, "got {correction}");
    }

    #[test]
    fn rotating_by_correction_levels_the_bar() {
        let img = tilted_bar(8.0);
        let correction = ink_rotation_correction(&img).unwrap();
        // Fill the uncovered corners white so they do not count as ink.
        let mut rotated = rotate_about_center(&img, correction);
        let reference = rotate_about_center(&GrayImage::from_pixel(240, 240, Luma([255])), correction);
        for (x, y, p) in reference.enumerate_pixels() {
            if p.0[0] == 0 {
                rotated.put_pixel(x, y, Luma([255]));
            }
        }
        let residual = ink_rotation_correction(&rotated).unwrap();
        assert!(residual.abs() < 1.0, "residual {residual}");
    }

    #[test]
    fn blank_page_has_no_ink_estimate() {
        let img = GrayImage::from_pixel(50, 50, Luma([255]));
        assert!(ink_rotation_correction(&img).is_none());
    }

    #[test]
    fn zero_rotation_is_identity() {
        let img = tilted_bar(3.0);
        assert_eq!(rotate_about_center(&img, 0.0), img);
    }

    #[test]
    fn quarter_turn_moves_corner_pixel() {
        let mut img = GrayImage::new(5, 5);
        img.put_pixel(4, 2, Luma([255]));
        let rotated = rotate_about_center(&img, 90.0);
        // Right of centre goes to above centre for a counter-clockwise turn.
        assert_eq!(rotated.get_pixel(2, 0).0[0], 255);
    }

    #[test]
    fn hough_finds_horizontal_line() {
        let mut edges = GrayImage::new(300, 50);
        for x in 0..300 {
            edges.put_pixel(x, 25, Luma([255]));
        }
        let lines = hough_lines(&edges, 200);
        assert!(!lines.is_empty());
        assert!(lines
            .iter()
            .any(|&(rho, theta)| (theta - std::f64::consts::FRAC_PI_2).abs() < 1e-6 && (rho - 25.0).abs() < 0.5));
    }

    #[test]
    fn hough_below_threshold_yields_nothing() {
        let mut edges = GrayImage::new(100, 20);
        for x in 0..100 {
            edges.put_pixel(x, 10, Luma([255]));
        }
        assert!(hough_lines(&edges, 200).is_empty());
    }

    #[test]
    fn hough_correction_none_on_small_content() {
        let img = GrayImage::from_pixel(60, 60, Luma([255]));
        assert!(hough_rotation_correction(&img, 50.0, 150.0, 200).is_none());
    }
}

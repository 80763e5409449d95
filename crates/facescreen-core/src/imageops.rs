//! Grayscale image operations used by detection and feature analysis.
//!
//! Everything works on `image::GrayImage` buffers and allocates its own
//! output, so concurrent callers never share scratch space.

use crate::types::FaceRegion;
use image::{GrayImage, RgbImage};

/// tan(22.5°), sector boundary for non-maximum suppression.
const TAN_22_5: f32 = 0.414_213_57;

/// Convert RGB to 8-bit luma using ITU-R BT.601 weights.
pub fn to_grayscale(rgb: &RgbImage) -> GrayImage {
    let (w, h) = rgb.dimensions();
    let mut gray = GrayImage::new(w, h);
    for (src, dst) in rgb.pixels().zip(gray.pixels_mut()) {
        let [r, g, b] = src.0;
        let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        dst.0[0] = y.round().clamp(0.0, 255.0) as u8;
    }
    gray
}

/// Global histogram equalization.
///
/// The darkest populated bin maps to 0 and the cumulative distribution of the
/// remaining bins is stretched over 0–255. A single-valued image is returned
/// unchanged.
pub fn equalize_histogram(gray: &GrayImage) -> GrayImage {
    let total = gray.as_raw().len() as u32;
    if total == 0 {
        return gray.clone();
    }

    let mut hist = [0u32; 256];
    for &p in gray.as_raw() {
        hist[p as usize] += 1;
    }

    let first = hist.iter().position(|&c| c > 0).unwrap_or(0);
    if hist[first] == total {
        return gray.clone();
    }

    let scale = 255.0 / (total - hist[first]) as f32;
    let mut lut = [0u8; 256];
    let mut cumulative = 0u32;
    for i in (first + 1)..256 {
        cumulative += hist[i];
        lut[i] = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }

    let data = gray.as_raw().iter().map(|&p| lut[p as usize]).collect();
    GrayImage::from_raw(gray.width(), gray.height(), data)
        .unwrap_or_else(|| gray.clone())
}

/// Source taps `(i0, i1, frac)` for destination index `dst` along one axis.
pub(crate) fn bilinear_taps(dst: usize, inv_scale: f32, src_len: usize) -> (usize, usize, f32) {
    let src = ((dst as f32 + 0.5) * inv_scale - 0.5).max(0.0);
    let i0 = (src.floor() as usize).min(src_len - 1);
    let i1 = (i0 + 1).min(src_len - 1);
    let frac = (src - src.floor()).clamp(0.0, 1.0);
    (i0, i1, frac)
}

/// Resize with bilinear interpolation (pixel-centre aligned).
pub fn resize_bilinear(gray: &GrayImage, new_w: u32, new_h: u32) -> GrayImage {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let (nw, nh) = (new_w as usize, new_h as usize);
    if w == 0 || h == 0 || nw == 0 || nh == 0 {
        return GrayImage::new(new_w, new_h);
    }

    let src = gray.as_raw();
    let inv_x = w as f32 / nw as f32;
    let inv_y = h as f32 / nh as f32;
    let x_taps: Vec<_> = (0..nw).map(|x| bilinear_taps(x, inv_x, w)).collect();

    let mut out = vec![0u8; nw * nh];
    for y in 0..nh {
        let (y0, y1, fy) = bilinear_taps(y, inv_y, h);
        for (x, &(x0, x1, fx)) in x_taps.iter().enumerate() {
            let tl = src[y0 * w + x0] as f32;
            let tr = src[y0 * w + x1] as f32;
            let bl = src[y1 * w + x0] as f32;
            let br = src[y1 * w + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            out[y * nw + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    GrayImage::from_raw(new_w, new_h, out).unwrap_or_else(|| GrayImage::new(new_w, new_h))
}

/// Crop the part of `region` that lies inside the image.
pub fn crop(gray: &GrayImage, region: &FaceRegion) -> Option<GrayImage> {
    let (x, y, w, h) = region.clamp_to(gray.width(), gray.height())?;
    Some(image::imageops::crop_imm(gray, x, y, w, h).to_image())
}

/// Mirror index into `0..n` without repeating the edge pixel (OpenCV REFLECT_101).
fn reflect101(i: i64, n: i64) -> usize {
    if n == 1 {
        return 0;
    }
    let mut i = i;
    if i < 0 {
        i = -i;
    }
    if i >= n {
        i = 2 * n - 2 - i;
    }
    i.clamp(0, n - 1) as usize
}

fn replicate(i: i64, n: i64) -> usize {
    i.clamp(0, n - 1) as usize
}

/// 3×3 Sobel derivatives with the given border policy.
fn sobel_with(gray: &GrayImage, border: fn(i64, i64) -> usize) -> (Vec<f32>, Vec<f32>) {
    let (w, h) = (gray.width() as i64, gray.height() as i64);
    let src = gray.as_raw();
    let mut gx = vec![0f32; (w * h) as usize];
    let mut gy = vec![0f32; (w * h) as usize];

    let px = |x: i64, y: i64| src[border(y, h) * w as usize + border(x, w)] as f32;

    for y in 0..h {
        for x in 0..w {
            let tl = px(x - 1, y - 1);
            let tc = px(x, y - 1);
            let tr = px(x + 1, y - 1);
            let ml = px(x - 1, y);
            let mr = px(x + 1, y);
            let bl = px(x - 1, y + 1);
            let bc = px(x, y + 1);
            let br = px(x + 1, y + 1);

            let idx = (y * w + x) as usize;
            gx[idx] = (tr + 2.0 * mr + br) - (tl + 2.0 * ml + bl);
            gy[idx] = (bl + 2.0 * bc + br) - (tl + 2.0 * tc + tr);
        }
    }

    (gx, gy)
}

/// Horizontal and vertical 3×3 Sobel derivatives (reflected borders).
pub fn sobel(gray: &GrayImage) -> (Vec<f32>, Vec<f32>) {
    sobel_with(gray, reflect101)
}

/// Canny edge map with L1 gradient magnitude.
///
/// Returns one flag per pixel, row-major.
pub fn canny(gray: &GrayImage, low: f32, high: f32) -> Vec<bool> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let (gx, gy) = sobel_with(gray, replicate);
    let mag: Vec<f32> = gx.iter().zip(&gy).map(|(dx, dy)| dx.abs() + dy.abs()).collect();
    let at = |x: i64, y: i64| -> f32 {
        if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
            0.0
        } else {
            mag[y as usize * w + x as usize]
        }
    };

    // 0 = suppressed, 1 = weak candidate, 2 = strong edge
    let mut class = vec![0u8; w * h];
    let mut stack = Vec::new();

    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let idx = y as usize * w + x as usize;
            let m = mag[idx];
            if m <= low {
                continue;
            }

            let dx = gx[idx];
            let dy = gy[idx];
            let xs = dx.abs();
            let ys = dy.abs();
            let tg22x = xs * TAN_22_5;

            let is_max = if ys < tg22x {
                m > at(x - 1, y) && m >= at(x + 1, y)
            } else {
                let tg67x = tg22x + 2.0 * xs;
                if ys > tg67x {
                    m > at(x, y - 1) && m >= at(x, y + 1)
                } else {
                    let s = if (dx < 0.0) != (dy < 0.0) { -1 } else { 1 };
                    m > at(x - s, y - 1) && m > at(x + s, y + 1)
                }
            };

            if !is_max {
                continue;
            }
            if m > high {
                class[idx] = 2;
                stack.push((x, y));
            } else {
                class[idx] = 1;
            }
        }
    }

    // Hysteresis: promote weak pixels 8-connected to a strong one.
    while let Some((x, y)) = stack.pop() {
        for ny in (y - 1)..=(y + 1) {
            for nx in (x - 1)..=(x + 1) {
                if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                    continue;
                }
                let n = ny as usize * w + nx as usize;
                if class[n] == 1 {
                    class[n] = 2;
                    stack.push((nx, ny));
                }
            }
        }
    }

    class.into_iter().map(|c| c == 2).collect()
}

/// Inverse binary threshold: pixels at or below `thresh` become foreground.
pub fn threshold_inv(gray: &GrayImage, thresh: u8) -> Vec<bool> {
    gray.as_raw().iter().map(|&p| p <= thresh).collect()
}

/// A connected foreground region.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub area: usize,
    pub centroid_x: f32,
}

/// Largest 8-connected foreground region of `mask`.
///
/// Regions one pixel wide or tall enclose no area and are ignored.
pub fn largest_blob(mask: &[bool], width: u32, height: u32) -> Option<Blob> {
    let (w, h) = (width as usize, height as usize);
    if mask.len() != w * h {
        return None;
    }

    let mut visited = vec![false; w * h];
    let mut best: Option<Blob> = None;
    let mut stack = Vec::new();

    for start in 0..w * h {
        if !mask[start] || visited[start] {
            continue;
        }

        visited[start] = true;
        stack.push(start);

        let mut area = 0usize;
        let mut sum_x = 0u64;
        let (mut min_x, mut max_x) = (usize::MAX, 0usize);
        let (mut min_y, mut max_y) = (usize::MAX, 0usize);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            area += 1;
            sum_x += x as u64;
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let n = ny * w + nx;
                    if mask[n] && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        if max_x == min_x || max_y == min_y {
            continue;
        }

        if best.as_ref().map_or(true, |b| area > b.area) {
            best = Some(Blob {
                area,
                centroid_x: sum_x as f32 / area as f32,
            });
        }
    }

    best
}

/// Population mean and variance of pixel intensities.
pub fn mean_variance(gray: &GrayImage) -> (f64, f64) {
    let data = gray.as_raw();
    if data.is_empty() {
        return (0.0, 0.0);
    }
    let n = data.len() as f64;
    let mean = data.iter().map(|&p| p as f64).sum::<f64>() / n;
    let var = data.iter().map(|&p| (p as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean, var)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_grayscale_weights() {
        let rgb = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
        let gray = to_grayscale(&rgb);
        assert_eq!(gray.get_pixel(0, 0).0[0], 76);

        let white = RgbImage::from_pixel(1, 1, Rgb([255, 255, 255]));
        assert_eq!(to_grayscale(&white).get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn test_equalize_stretches_range() {
        let gray = GrayImage::from_fn(16, 16, |x, _| Luma([100 + (x % 4) as u8]));
        let eq = equalize_histogram(&gray);
        let min = *eq.as_raw().iter().min().unwrap();
        let max = *eq.as_raw().iter().max().unwrap();
        assert_eq!(min, 0);
        assert_eq!(max, 255);
    }

    #[test]
    fn test_equalize_uniform_unchanged() {
        let gray = GrayImage::from_pixel(8, 8, Luma([42]));
        assert_eq!(equalize_histogram(&gray), gray);
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let gray = GrayImage::from_pixel(100, 80, Luma([128]));
        let resized = resize_bilinear(&gray, 37, 51);
        assert_eq!(resized.dimensions(), (37, 51));
        assert!(resized.as_raw().iter().all(|&p| p == 128));
    }

    #[test]
    fn test_crop_clamps() {
        let gray = GrayImage::from_fn(10, 10, |x, y| Luma([(x + 10 * y) as u8]));
        let c = crop(&gray, &FaceRegion::new(-3, 5, 6, 20)).unwrap();
        assert_eq!(c.dimensions(), (3, 5));
        assert_eq!(c.get_pixel(0, 0).0[0], 50);
        assert!(crop(&gray, &FaceRegion::new(20, 20, 5, 5)).is_none());
    }

    #[test]
    fn test_sobel_horizontal_ramp() {
        let gray = GrayImage::from_fn(5, 5, |x, _| Luma([(x * 10) as u8]));
        let (gx, gy) = sobel(&gray);
        // Interior: (10 + 20 + 10) * 2 = 80
        assert_eq!(gx[2 * 5 + 2], 80.0);
        assert_eq!(gy[2 * 5 + 2], 0.0);
    }

    #[test]
    fn test_canny_step_edge() {
        let gray = GrayImage::from_fn(20, 20, |x, _| Luma([if x < 10 { 0 } else { 200 }]));
        let edges = canny(&gray, 30.0, 100.0);
        let count = edges.iter().filter(|&&e| e).count();
        assert!(count >= 20, "expected a vertical edge line, got {count} pixels");
        // Flat areas far from the step have no edges.
        assert!(!edges[5 * 20 + 2]);
        assert!(!edges[5 * 20 + 17]);
    }

    #[test]
    fn test_canny_flat_image_has_no_edges() {
        let gray = GrayImage::from_pixel(10, 10, Luma([90]));
        assert!(canny(&gray, 30.0, 100.0).iter().all(|&e| !e));
    }

    #[test]
    fn test_largest_blob_centroid() {
        // 10x6 mask with a 3x3 blob at x=1..4 and a 2x2 blob at x=7..9
        let (w, h) = (10u32, 6u32);
        let mut mask = vec![false; 60];
        for y in 1..4 {
            for x in 1..4 {
                mask[y * 10 + x] = true;
            }
        }
        for y in 1..3 {
            for x in 7..9 {
                mask[y * 10 + x] = true;
            }
        }
        let blob = largest_blob(&mask, w, h).unwrap();
        assert_eq!(blob.area, 9);
        assert!((blob.centroid_x - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_largest_blob_ignores_lines() {
        let mut mask = vec![false; 25];
        for x in 0..5 {
            mask[2 * 5 + x] = true;
        }
        assert!(largest_blob(&mask, 5, 5).is_none());
    }

    #[test]
    fn test_threshold_inverse() {
        let gray = GrayImage::from_raw(3, 1, vec![10, 50, 51]).unwrap();
        assert_eq!(threshold_inv(&gray, 50), vec![true, true, false]);
    }

    #[test]
    fn test_mean_variance() {
        let gray = GrayImage::from_raw(2, 1, vec![0, 100]).unwrap();
        let (mean, var) = mean_variance(&gray);
        assert!((mean - 50.0).abs() < 1e-9);
        assert!((var - 2500.0).abs() < 1e-9);
    }
}

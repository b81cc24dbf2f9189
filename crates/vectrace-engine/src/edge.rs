//! Edge detection.
//!
//! Two independent detectors run over the source and their binary maps
//! are merged by union:
//!
//! 1. **Canny** on composited luminance: Sobel gradients, non-maximum
//!    suppression, hysteresis. Sensitive to brightness steps.
//! 2. **Color boundaries**: a pixel is an edge when its composited RGB
//!    differs from its right or bottom neighbour by more than a
//!    threshold. Catches boundaries between colors of equal luminance,
//!    which Canny cannot see.
//!
//! Binary maps use 255 for edge pixels and 0 for background.

use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::filter::{filter_clamped, gaussian_blur_f32};
use imageproc::kernel;

use crate::source::SourceImage;

/// Minimum allowed hysteresis threshold.
///
/// A zero low threshold turns every pixel with any gradient into a
/// candidate edge and floods the map.
pub const MIN_THRESHOLD: f32 = 1.0;
const _: () = assert!(MIN_THRESHOLD > 0.0);

/// Sobel gradient field of a grayscale image.
#[derive(Debug, Clone)]
pub struct Gradients {
    width: u32,
    height: u32,
    gx: Vec<i16>,
    gy: Vec<i16>,
}

impl Gradients {
    /// Compute Sobel gradients, optionally after a Gaussian blur.
    #[must_use]
    pub fn compute(luma: &GrayImage, blur_sigma: f32) -> Self {
        let blurred;
        let input = if blur_sigma > 0.0 {
            blurred = gaussian_blur_f32(luma, blur_sigma);
            &blurred
        } else {
            luma
        };
        let gx: Image<Luma<i16>> = filter_clamped(input, kernel::SOBEL_HORIZONTAL_3X3);
        let gy: Image<Luma<i16>> = filter_clamped(input, kernel::SOBEL_VERTICAL_3X3);
        Self {
            width: luma.width(),
            height: luma.height(),
            gx: gx.into_raw(),
            gy: gy.into_raw(),
        }
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Gradient vector at a pixel.
    #[must_use]
    pub fn at(&self, x: u32, y: u32) -> (f32, f32) {
        let i = self.index(x, y);
        (f32::from(self.gx[i]), f32::from(self.gy[i]))
    }

    /// Gradient magnitude at a pixel.
    #[must_use]
    pub fn magnitude(&self, x: u32, y: u32) -> f32 {
        let (gx, gy) = self.at(x, y);
        gx.hypot(gy)
    }

    /// Per-pixel edge strength scaled into `0..=255`.
    ///
    /// A full black-to-white step saturates the scale.
    #[must_use]
    pub fn strength_map(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let v = (self.magnitude(x, y) / 4.0).round().clamp(0.0, 255.0) as u8;
            Luma([v])
        })
    }
}

/// Canny edge detection on precomputed gradients.
///
/// Both thresholds are clamped to at least [`MIN_THRESHOLD`] and the low
/// threshold to at most the high one.
#[must_use = "returns the binary edge map"]
pub fn canny(gradients: &Gradients, low_threshold: f32, high_threshold: f32) -> GrayImage {
    let high = high_threshold.max(MIN_THRESHOLD);
    let low = low_threshold.max(MIN_THRESHOLD).min(high);
    let thinned = non_maximum_suppression(gradients);
    hysteresis(&thinned, gradients.width, gradients.height, low, high)
}

/// Keep only pixels whose magnitude is a local maximum across the edge.
fn non_maximum_suppression(g: &Gradients) -> Vec<f32> {
    let (w, h) = (g.width as usize, g.height as usize);
    let mut out = vec![0.0_f32; w * h];
    if w < 3 || h < 3 {
        return out;
    }
    let magnitude: Vec<f32> = g
        .gx
        .iter()
        .zip(&g.gy)
        .map(|(&gx, &gy)| f32::from(gx).hypot(f32::from(gy)))
        .collect();

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = y * w + x;
            let m = magnitude[i];
            if m <= 0.0 {
                continue;
            }
            let mut angle = f32::from(g.gy[i])
                .atan2(f32::from(g.gx[i]))
                .to_degrees();
            if angle < 0.0 {
                angle += 180.0;
            }
            // Neighbours along the gradient direction (y grows downward).
            let (a, b) = if !(22.5..157.5).contains(&angle) {
                (i - 1, i + 1)
            } else if angle < 67.5 {
                (i - w - 1, i + w + 1)
            } else if angle < 112.5 {
                (i - w, i + w)
            } else {
                (i - w + 1, i + w - 1)
            };
            if m >= magnitude[a] && m >= magnitude[b] {
                out[i] = m;
            }
        }
    }
    out
}

/// Hysteresis thresholding with 8-connected, bounds-checked growth.
fn hysteresis(thinned: &[f32], width: u32, height: u32, low: f32, high: f32) -> GrayImage {
    let mut out = GrayImage::new(width, height);
    let w = width as usize;
    let mut stack: Vec<(u32, u32)> = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let i = y as usize * w + x as usize;
            if thinned[i] < high || out.get_pixel(x, y).0[0] != 0 {
                continue;
            }
            out.put_pixel(x, y, Luma([255]));
            stack.push((x, y));
            while let Some((cx, cy)) = stack.pop() {
                for (nx, ny) in neighbours8(cx, cy, width, height) {
                    let ni = ny as usize * w + nx as usize;
                    if thinned[ni] >= low && out.get_pixel(nx, ny).0[0] == 0 {
                        out.put_pixel(nx, ny, Luma([255]));
                        stack.push((nx, ny));
                    }
                }
            }
        }
    }
    out
}

/// In-bounds 8-neighbourhood of a pixel.
pub(crate) fn neighbours8(
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> impl Iterator<Item = (u32, u32)> {
    const OFFSETS: [(i64, i64); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (-1, 0),
        (1, 0),
        (-1, 1),
        (0, 1),
        (1, 1),
    ];
    OFFSETS.into_iter().filter_map(move |(dx, dy)| {
        let nx = u32::try_from(i64::from(x) + dx).ok()?;
        let ny = u32::try_from(i64::from(y) + dy).ok()?;
        (nx < width && ny < height).then_some((nx, ny))
    })
}

/// Mark pixels whose composited color differs from the right or bottom
/// neighbour by more than `threshold` (sum of absolute RGB differences).
#[must_use = "returns the binary color boundary map"]
pub fn color_boundaries(source: &SourceImage, threshold: u32) -> GrayImage {
    let (w, h) = (source.width(), source.height());
    let composited: Vec<[u8; 3]> = source
        .rgba()
        .pixels()
        .map(|p| crate::types::Color::from(*p).over_white())
        .collect();
    let at = |x: u32, y: u32| composited[y as usize * w as usize + x as usize];
    let diff = |a: [u8; 3], b: [u8; 3]| -> u32 {
        a.iter()
            .zip(&b)
            .map(|(&p, &q)| u32::from(p.abs_diff(q)))
            .sum()
    };

    GrayImage::from_fn(w, h, |x, y| {
        let here = at(x, y);
        let right = x + 1 < w && diff(here, at(x + 1, y)) > threshold;
        let below = y + 1 < h && diff(here, at(x, y + 1)) > threshold;
        Luma([if right || below { 255 } else { 0 }])
    })
}

/// Pixel-wise union (maximum) of two binary maps of equal size.
#[must_use = "returns the merged edge map"]
pub fn union(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        Luma([a.get_pixel(x, y).0[0].max(b.get_pixel(x, y).0[0])])
    })
}

/// Count edge pixels (value == 255) in a binary map.
pub(crate) fn count_edge_pixels(image: &GrayImage) -> u64 {
    image
        .pixels()
        .map(|p| u64::from(u8::from(p.0[0] == 255)))
        .sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::source::PixelFormat;

    /// 20x20 image with a sharp vertical boundary at x = 10.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(20, 20, |x, _y| {
            if x < 10 { Luma([0]) } else { Luma([255]) }
        })
    }

    #[test]
    fn blank_image_produces_no_edges() {
        let img = GrayImage::from_pixel(20, 20, Luma([128]));
        let edges = canny(&Gradients::compute(&img, 1.0), 50.0, 150.0);
        assert_eq!(edges.dimensions(), (20, 20));
        assert_eq!(count_edge_pixels(&edges), 0);
    }

    #[test]
    fn sharp_edge_detected_near_boundary() {
        let edges = canny(&Gradients::compute(&sharp_edge_image(), 1.0), 50.0, 150.0);
        assert!(count_edge_pixels(&edges) > 0);
        for (x, _y, p) in edges.enumerate_pixels() {
            if p.0[0] == 255 {
                assert!((7..=12).contains(&x), "unexpected edge at x={x}");
            }
        }
    }

    #[test]
    fn edges_touching_the_border_do_not_panic() {
        // Gradient along the first row and column exercises neighbour
        // lookups at x = 0 and y = 0.
        let img = GrayImage::from_fn(8, 8, |x, y| Luma([if x == 0 || y == 0 { 255 } else { 0 }]));
        let edges = canny(&Gradients::compute(&img, 0.0), 1.0, 10.0);
        assert_eq!(edges.dimensions(), (8, 8));
    }

    #[test]
    fn low_above_high_is_clamped() {
        let g = Gradients::compute(&sharp_edge_image(), 1.0);
        assert_eq!(canny(&g, 200.0, 100.0), canny(&g, 100.0, 100.0));
        assert_eq!(canny(&g, 0.0, 150.0), canny(&g, MIN_THRESHOLD, 150.0));
    }

    #[test]
    fn strength_saturates_on_full_step() {
        let g = Gradients::compute(&sharp_edge_image(), 0.0);
        let strength = g.strength_map();
        assert_eq!(strength.get_pixel(10, 10).0[0], 255);
        assert_eq!(strength.get_pixel(2, 10).0[0], 0);
    }

    #[test]
    fn color_boundary_sees_isoluminant_change() {
        // Red and a green of (nearly) equal luminance side by side.
        let mut data = Vec::new();
        for _y in 0..4 {
            for x in 0..8 {
                if x < 4 {
                    data.extend_from_slice(&[200, 0, 0]);
                } else {
                    data.extend_from_slice(&[0, 102, 0]);
                }
            }
        }
        let source = SourceImage::from_raw(8, 4, PixelFormat::Rgb8, &data).unwrap();
        let luma = source.luma_over_white();
        assert!(luma.get_pixel(0, 0).0[0].abs_diff(luma.get_pixel(7, 0).0[0]) <= 2);

        let boundaries = color_boundaries(&source, 96);
        for y in 0..4 {
            assert_eq!(boundaries.get_pixel(3, y).0[0], 255);
            assert_eq!(boundaries.get_pixel(0, y).0[0], 0);
        }
    }

    #[test]
    fn union_takes_maximum() {
        let mut a = GrayImage::new(3, 1);
        let mut b = GrayImage::new(3, 1);
        a.put_pixel(0, 0, Luma([255]));
        b.put_pixel(2, 0, Luma([255]));
        let u = union(&a, &b);
        assert_eq!(u.as_raw(), &vec![255, 0, 255]);
    }

    #[test]
    fn neighbours_are_bounds_checked() {
        assert_eq!(neighbours8(0, 0, 5, 5).count(), 3);
        assert_eq!(neighbours8(2, 2, 5, 5).count(), 8);
        assert_eq!(neighbours8(4, 4, 5, 5).count(), 3);
    }
}

//! Quality assessment: how closely a rendering of the elements matches
//! the source.
//!
//! Both images are compared at a reduced working resolution. The score
//! blends a windowed structural-similarity term on luminance with a
//! per-pixel color fidelity term, minus a saturating penalty on element
//! count.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::config::QualityConfig;
use crate::element::VectorElement;
use crate::render::{render, resample_source, scaled_dimensions, working_scale};
use crate::source::{SourceImage, luma};
use crate::types::Color;

/// SSIM window edge, in working-resolution pixels.
const WINDOW: u32 = 8;

/// SSIM stabilizers for 8-bit data, `(0.01 L)^2` and `(0.03 L)^2`.
const C1: f64 = 6.5025;
const C2: f64 = 58.5225;

/// Result of one assessment, every field in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Combined score.
    pub score: f64,
    /// Mean windowed SSIM of the luminance channels.
    pub structural_similarity: f64,
    /// `1 - mean absolute RGB difference`.
    pub color_fidelity: f64,
    /// Amount subtracted for element count.
    pub element_penalty: f64,
}

impl QualityScore {
    /// Whether the score meets `target`.
    #[must_use]
    pub fn meets(&self, target: f64) -> bool {
        self.score >= target
    }
}

/// Score `elements` (drawn over `background`) against `source`.
#[must_use]
pub fn assess(
    source: &SourceImage,
    elements: &[VectorElement],
    background: Option<Color>,
    config: &QualityConfig,
) -> QualityScore {
    let canvas = source.dimensions();
    let scale = working_scale(canvas, config.working_resolution);
    let reference = resample_source(source, scaled_dimensions(canvas, scale));
    let rendered = render(
        elements.iter().map(VectorElement::geometry),
        background,
        canvas,
        scale,
    );

    let structural_similarity = ssim(&reference, &rendered);
    let color_fidelity = 1.0 - mean_abs_error(&reference, &rendered) / 255.0;
    let element_penalty = element_penalty(elements.len(), config);
    let weight = config.structural_weight.clamp(0.0, 1.0);
    let blended = weight.mul_add(structural_similarity, (1.0 - weight) * color_fidelity);
    let score = (blended - element_penalty).clamp(0.0, 1.0);

    tracing::debug!(
        score,
        structural_similarity,
        color_fidelity,
        element_penalty,
        elements = elements.len(),
        "quality assessed"
    );
    QualityScore {
        score,
        structural_similarity,
        color_fidelity,
        element_penalty,
    }
}

/// `max * n / (n + scale)`: grows with element count, never reaches the
/// maximum.
fn element_penalty(count: usize, config: &QualityConfig) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let n = count as f64;
    let scale = config.element_penalty_scale.max(f64::EPSILON);
    config.max_element_penalty * n / (n + scale)
}

/// Mean absolute per-channel difference in `0..=255`.
///
/// Images of different sizes compare as maximally different.
#[must_use]
pub fn mean_abs_error(a: &RgbImage, b: &RgbImage) -> f64 {
    if a.dimensions() != b.dimensions() || a.is_empty() {
        return 255.0;
    }
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| u64::from(x.abs_diff(y)))
        .sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = total as f64 / a.as_raw().len() as f64;
    mean
}

/// Mean SSIM over non-overlapping windows of the luminance channels,
/// clamped into `[0, 1]`. Partial windows at the right and bottom edges
/// are included.
fn ssim(a: &RgbImage, b: &RgbImage) -> f64 {
    if a.dimensions() != b.dimensions() {
        return 0.0;
    }
    let (w, h) = a.dimensions();
    let lum = |img: &RgbImage, x: u32, y: u32| {
        let p = img.get_pixel(x, y).0;
        f64::from(luma(p[0], p[1], p[2]))
    };

    let mut total = 0.0;
    let mut windows = 0_u32;
    for wy in (0..h).step_by(WINDOW as usize) {
        for wx in (0..w).step_by(WINDOW as usize) {
            let (mut sa, mut sb, mut saa, mut sbb, mut sab, mut n) =
                (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
            for y in wy..(wy + WINDOW).min(h) {
                for x in wx..(wx + WINDOW).min(w) {
                    let (va, vb) = (lum(a, x, y), lum(b, x, y));
                    sa += va;
                    sb += vb;
                    saa += va * va;
                    sbb += vb * vb;
                    sab += va * vb;
                    n += 1.0;
                }
            }
            let (ma, mb) = (sa / n, sb / n);
            let var_a = ma.mul_add(-ma, saa / n);
            let var_b = mb.mul_add(-mb, sbb / n);
            let cov = ma.mul_add(-mb, sab / n);
            let numerator = (2.0 * ma).mul_add(mb, C1) * 2.0f64.mul_add(cov, C2);
            let denominator = ma.mul_add(ma, mb.mul_add(mb, C1)) * (var_a + var_b + C2);
            total += numerator / denominator;
            windows += 1;
        }
    }
    if windows == 0 {
        return 0.0;
    }
    (total / f64::from(windows)).clamp(0.0, 1.0)
}

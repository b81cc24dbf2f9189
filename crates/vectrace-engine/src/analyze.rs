//! Content analysis: edge maps, dominant colors, and content-type
//! classification.
//!
//! Pure and deterministic. Everything downstream reads the resulting
//! [`ContentMetadata`] and never recomputes it.

use std::collections::BTreeMap;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::config::AnalyzerConfig;
use crate::edge::{self, Gradients};
use crate::source::SourceImage;
use crate::types::{Color, Dimensions};

/// Confidence reported for a fully uniform image.
pub const UNIFORM_CONFIDENCE: f64 = 0.2;

/// Gradient magnitude (unblurred Sobel) at or above which a non-edge
/// pixel counts as part of a smooth gradient.
const SMOOTH_MAGNITUDE: f32 = 8.0;

/// Quantization key shared by every pixel with alpha below half.
const TRANSPARENT_KEY: u16 = 1 << 12;

/// Broad content classes that drive strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    /// Dense, high-frequency strokes (lettering, line art).
    TextDominant,
    /// Flat fills bounded by clean edges (logos, icons).
    Geometric,
    /// Smooth tonal ramps with few hard edges.
    Gradient,
    /// Several of the above, or no clear winner.
    Mixed,
}

/// A quantized color and the share of pixels it covers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DominantColor {
    /// Mean color of the pixels in the bucket.
    pub color: Color,
    /// Fraction of all pixels, in `(0, 1]`.
    pub coverage: f64,
}

/// Statistics the classification is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContentStats {
    /// Fraction of pixels on the binary edge map.
    pub edge_density: f64,
    /// Dominant colors at or above the significance coverage.
    pub color_count: usize,
    /// Fraction of non-edge pixels with a gentle but non-zero gradient.
    pub smooth_fraction: f64,
    /// Edge on/off transitions per scanline pixel.
    pub spatial_frequency: f64,
    /// The whole image is one color.
    pub uniform: bool,
}

/// Everything the strategies need to know about the source.
#[derive(Debug, Clone)]
pub struct ContentMetadata {
    pub dimensions: Dimensions,
    /// Binary edge map (255 = edge), union of Canny and color boundaries.
    pub edges: GrayImage,
    /// Per-pixel edge strength in `0..=255`.
    pub edge_strength: GrayImage,
    /// Gradients of the blurred luminance (used for Hough voting).
    pub gradients: Gradients,
    /// Ranked by coverage, then by quantization key.
    pub dominant_colors: Vec<DominantColor>,
    /// Opaque color dominating the image border, if any.
    pub background: Option<Color>,
    pub content_type: ContentType,
    /// Confidence of the classification, in `[0, 1]`.
    pub confidence: f64,
    pub stats: ContentStats,
}

impl ContentMetadata {
    /// Mean color of the most common bucket, or white.
    #[must_use]
    pub fn primary_color(&self) -> Color {
        self.dominant_colors
            .first()
            .map_or(Color::WHITE, |d| d.color)
    }
}

/// Analyze a source image.
#[must_use]
pub fn analyze(source: &SourceImage, config: &AnalyzerConfig) -> ContentMetadata {
    let dims = source.dimensions();
    let luma = source.luma_over_white();

    let gradients = Gradients::compute(&luma, config.blur_sigma);
    let canny = edge::canny(&gradients, config.canny_low, config.canny_high);
    let boundaries = edge::color_boundaries(source, config.color_edge_threshold);
    let edges = edge::union(&canny, &boundaries);
    let edge_strength = gradients.strength_map();

    let buckets = quantize(source.rgba().pixels().map(|p| Color::from(*p)));
    let total = dims.pixel_count().max(1);
    let dominant_colors = rank_colors(&buckets, total, config.max_colors);
    let background = detect_background(source, config.background_border_fraction);

    let edge_pixels = edge::count_edge_pixels(&edges);
    let uniform = edge_pixels == 0 && buckets.len() == 1;

    let raw = Gradients::compute(&luma, 0.0);
    let stats = ContentStats {
        edge_density: ratio(edge_pixels, total),
        color_count: dominant_colors
            .iter()
            .filter(|d| d.coverage >= config.significant_color_coverage)
            .count(),
        smooth_fraction: smooth_fraction(&raw, &edges, config.canny_low),
        spatial_frequency: spatial_frequency(&edges),
        uniform,
    };

    let (content_type, confidence) = if uniform {
        (ContentType::Geometric, UNIFORM_CONFIDENCE)
    } else {
        classify(&stats, config.tie_margin)
    };

    tracing::debug!(
        ?content_type,
        confidence,
        edge_density = stats.edge_density,
        color_count = stats.color_count,
        smooth_fraction = stats.smooth_fraction,
        spatial_frequency = stats.spatial_frequency,
        "content analyzed"
    );

    ContentMetadata {
        dimensions: dims,
        edges,
        edge_strength,
        gradients,
        dominant_colors,
        background: if uniform { None } else { background },
        content_type,
        confidence,
        stats,
    }
}

/// Score each class and pick the best; near-ties resolve to `Mixed`.
fn classify(stats: &ContentStats, tie_margin: f64) -> (ContentType, f64) {
    let structure = unit(stats.edge_density / 0.01);
    let smooth = unit((stats.smooth_fraction - 0.05) / 0.25);
    #[allow(clippy::cast_precision_loss)]
    let colorful = unit((stats.color_count as f64 - 6.0) / 10.0);
    let busy = unit((stats.spatial_frequency - 0.05) / 0.10);

    let scores = [
        (ContentType::TextDominant, structure * busy * (1.0 - smooth)),
        (
            ContentType::Geometric,
            structure * (1.0 - busy) * (1.0 - smooth) * 0.5f64.mul_add(-colorful, 1.0),
        ),
        (
            ContentType::Gradient,
            smooth.max(colorful) * 0.5f64.mul_add(-structure, 1.0),
        ),
        (ContentType::Mixed, structure * smooth),
    ];

    let (best_type, best) = scores
        .iter()
        .copied()
        .fold((ContentType::Mixed, f64::NEG_INFINITY), |acc, s| {
            if s.1 > acc.1 { s } else { acc }
        });
    let contenders = scores
        .iter()
        .filter(|(_, score)| best - score <= tie_margin)
        .count();
    if contenders > 1 {
        (ContentType::Mixed, best)
    } else {
        (best_type, best)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    count: u64,
    sum: [u64; 4],
}

impl Bucket {
    fn add(&mut self, c: Color) {
        self.count += 1;
        for (s, v) in self.sum.iter_mut().zip([c.r, c.g, c.b, c.a]) {
            *s += u64::from(v);
        }
    }

    fn mean(&self) -> Color {
        let n = self.count.max(1);
        let ch = |i: usize| u8::try_from(self.sum[i] / n).unwrap_or(u8::MAX);
        Color::rgba(ch(0), ch(1), ch(2), ch(3))
    }
}

/// Quantize to 4 bits per channel; transparent pixels share one bucket.
fn quantize(pixels: impl Iterator<Item = Color>) -> BTreeMap<u16, Bucket> {
    let mut buckets: BTreeMap<u16, Bucket> = BTreeMap::new();
    for c in pixels {
        buckets.entry(bucket_key(c)).or_default().add(c);
    }
    buckets
}

fn bucket_key(c: Color) -> u16 {
    if !c.is_opaque() {
        return TRANSPARENT_KEY;
    }
    (u16::from(c.r >> 4) << 8) | (u16::from(c.g >> 4) << 4) | u16::from(c.b >> 4)
}

fn rank_colors(buckets: &BTreeMap<u16, Bucket>, total: u64, limit: usize) -> Vec<DominantColor> {
    let mut ranked: Vec<(&u16, &Bucket)> = buckets.iter().collect();
    ranked.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(_, bucket)| DominantColor {
            color: bucket.mean(),
            coverage: ratio(bucket.count, total),
        })
        .collect()
}

/// Dominant opaque bucket along the image border.
fn detect_background(source: &SourceImage, min_fraction: f64) -> Option<Color> {
    let (w, h) = (source.width(), source.height());
    let border = (0..w)
        .flat_map(|x| [(x, 0), (x, h - 1)])
        .chain((0..h).flat_map(|y| [(0, y), (w - 1, y)]))
        .map(|(x, y)| source.color_at(x, y));
    let buckets = quantize(border);
    let total: u64 = buckets.values().map(|b| b.count).sum();
    let (key, bucket) = buckets
        .iter()
        .max_by(|a, b| a.1.count.cmp(&b.1.count).then(b.0.cmp(a.0)))?;
    if *key == TRANSPARENT_KEY || ratio(bucket.count, total) < min_fraction {
        return None;
    }
    Some(bucket.mean())
}

/// Share of non-edge pixels whose unblurred gradient is gentle but
/// non-zero (ramps rather than flat fills or hard steps).
fn smooth_fraction(raw: &Gradients, edges: &GrayImage, hard: f32) -> f64 {
    let mut smooth = 0_u64;
    let mut total = 0_u64;
    for (x, y, p) in edges.enumerate_pixels() {
        total += 1;
        if p.0[0] != 0 {
            continue;
        }
        let m = raw.magnitude(x, y);
        if (SMOOTH_MAGNITUDE..hard).contains(&m) {
            smooth += 1;
        }
    }
    ratio(smooth, total)
}

/// Horizontal edge on/off transitions per pixel.
fn spatial_frequency(edges: &GrayImage) -> f64 {
    let (w, h) = edges.dimensions();
    if w < 2 {
        return 0.0;
    }
    let mut transitions = 0_u64;
    for y in 0..h {
        for x in 0..w - 1 {
            if edges.get_pixel(x, y).0[0] != edges.get_pixel(x + 1, y).0[0] {
                transitions += 1;
            }
        }
    }
    ratio(transitions, u64::from(w - 1) * u64::from(h))
}

#[allow(clippy::cast_precision_loss)]
fn ratio(n: u64, d: u64) -> f64 {
    if d == 0 { 0.0 } else { n as f64 / d as f64 }
}

fn unit(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;

    fn source(img: RgbaImage) -> SourceImage {
        SourceImage::from_rgba(img).unwrap()
    }

    fn disk_on_transparent() -> SourceImage {
        source(RgbaImage::from_fn(120, 120, |x, y| {
            let dx = f64::from(x) + 0.5 - 60.0;
            let dy = f64::from(y) + 0.5 - 60.0;
            if dx.hypot(dy) <= 40.0 {
                Rgba([20, 40, 200, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        }))
    }

    #[test]
    fn uniform_image_is_low_confidence_geometric() {
        let meta = analyze(
            &source(RgbaImage::from_pixel(50, 40, Rgba([10, 200, 30, 255]))),
            &AnalyzerConfig::default(),
        );
        assert_eq!(meta.content_type, ContentType::Geometric);
        assert!((meta.confidence - UNIFORM_CONFIDENCE).abs() < f64::EPSILON);
        assert!(meta.stats.uniform);
        assert!(meta.background.is_none());
        assert_eq!(meta.dominant_colors.len(), 1);
        assert!((meta.dominant_colors[0].coverage - 1.0).abs() < f64::EPSILON);
        assert_eq!(meta.primary_color(), Color::rgba(10, 200, 30, 255));
    }

    #[test]
    fn disk_is_geometric() {
        let meta = analyze(&disk_on_transparent(), &AnalyzerConfig::default());
        assert_eq!(meta.content_type, ContentType::Geometric);
        assert!(meta.confidence > 0.5);
        assert!(!meta.stats.uniform);
        assert!(meta.stats.edge_density > 0.0);
        assert!(meta.background.is_none(), "transparent border is no background");
    }

    #[test]
    fn horizontal_ramp_is_gradient() {
        let img = RgbaImage::from_fn(100, 60, |x, _y| {
            let v = u8::try_from(x * 255 / 99).unwrap();
            Rgba([v, v, v, 255])
        });
        let meta = analyze(&source(img), &AnalyzerConfig::default());
        assert_eq!(meta.content_type, ContentType::Gradient);
        assert!(meta.stats.smooth_fraction > 0.5);
    }

    #[test]
    fn dense_stripes_are_text_dominant() {
        // 2px dark strokes every 6px across the whole image.
        let img = RgbaImage::from_fn(120, 60, |x, _y| {
            if x % 6 < 2 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let meta = analyze(&source(img), &AnalyzerConfig::default());
        assert_eq!(meta.content_type, ContentType::TextDominant);
        assert!(meta.stats.spatial_frequency > 0.15);
    }

    #[test]
    fn ramp_beside_shape_is_mixed() {
        let img = RgbaImage::from_fn(160, 80, |x, y| {
            if x < 80 {
                let v = u8::try_from(x * 3).unwrap();
                Rgba([v, v, v, 255])
            } else if (100..140).contains(&x) && (20..60).contains(&y) {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let meta = analyze(&source(img), &AnalyzerConfig::default());
        assert_eq!(meta.content_type, ContentType::Mixed);
    }

    #[test]
    fn near_tie_resolves_to_mixed() {
        let stats = ContentStats {
            edge_density: 0.02,
            color_count: 2,
            smooth_fraction: 0.0,
            spatial_frequency: 0.10,
            uniform: false,
        };
        // busy = 0.5 puts text and geometric at exactly the same score.
        let (kind, confidence) = classify(&stats, 0.05);
        assert_eq!(kind, ContentType::Mixed);
        assert!((confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn background_detected_from_border() {
        let img = RgbaImage::from_fn(40, 40, |x, y| {
            if (10..30).contains(&x) && (10..30).contains(&y) {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([250, 250, 250, 255])
            }
        });
        let meta = analyze(&source(img), &AnalyzerConfig::default());
        assert_eq!(meta.background, Some(Color::rgba(250, 250, 250, 255)));
    }

    #[test]
    fn dominant_colors_ranked_by_coverage() {
        let img = RgbaImage::from_fn(10, 10, |x, _y| {
            if x < 7 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let meta = analyze(&source(img), &AnalyzerConfig::default());
        assert_eq!(meta.dominant_colors.len(), 2);
        assert_eq!(meta.dominant_colors[0].color, Color::rgba(255, 0, 0, 255));
        assert!((meta.dominant_colors[0].coverage - 0.7).abs() < 1e-9);
    }

    #[test]
    fn transparent_pixels_share_one_bucket() {
        let pixels = [Color::rgba(1, 2, 3, 0), Color::rgba(200, 100, 50, 10)];
        let buckets = quantize(pixels.into_iter());
        assert_eq!(buckets.len(), 1);
        assert!(buckets.contains_key(&TRANSPARENT_KEY));
    }

    #[test]
    fn analysis_is_deterministic() {
        let img = disk_on_transparent();
        let a = analyze(&img, &AnalyzerConfig::default());
        let b = analyze(&img, &AnalyzerConfig::default());
        assert_eq!(a.edges, b.edges);
        assert_eq!(a.dominant_colors, b.dominant_colors);
        assert_eq!(a.stats, b.stats);
        assert_eq!(a.content_type, b.content_type);
    }
}

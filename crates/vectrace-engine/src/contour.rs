//! Contour extraction from the binary edge map.
//!
//! Edge pixels form bands a few pixels wide around every boundary. The
//! detector and the tracer both consume the outer border of each band
//! (an ordered ring) and the detector additionally needs every pixel of
//! the band for fitting, grouped by 8-connected component.

use image::{GrayImage, Luma};
use imageproc::contours::BorderType;
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::types::{BoundingBox, Point};

/// Selects which contour tracing algorithm to use.
///
/// Additional variants (e.g. marching squares) can be added without
/// changing the strategy parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContourTracerKind {
    /// Suzuki-Abe border following via `imageproc::contours::find_contours`.
    #[default]
    BorderFollowing,
}

/// Trait for contour tracing strategies.
///
/// Input: a binary edge map (255 = edge).
/// Output: the outer border of every edge band as a closed ring of
/// pixel centers, in raster order of the ring's first pixel.
pub trait ContourTracer {
    fn trace(&self, edges: &GrayImage) -> Vec<EdgeRing>;
}

impl ContourTracer for ContourTracerKind {
    fn trace(&self, edges: &GrayImage) -> Vec<EdgeRing> {
        match *self {
            Self::BorderFollowing => trace_border_following(edges),
        }
    }
}

/// Outer border of one edge band.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRing {
    /// Pixel centers in border order; the first point is not repeated.
    pub points: Vec<Point>,
    /// First border pixel, used to look up the band's component.
    pub seed: (u32, u32),
}

impl EdgeRing {
    #[must_use]
    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(&self.points)
    }

    /// Closed perimeter length.
    #[must_use]
    pub fn perimeter(&self) -> f64 {
        match (self.points.first(), self.points.last()) {
            (Some(&first), Some(&last)) => {
                let open: f64 = self
                    .points
                    .windows(2)
                    .map(|w| w[0].distance(w[1]))
                    .sum();
                open + last.distance(first)
            }
            _ => 0.0,
        }
    }

    /// Shoelace area of the ring.
    #[must_use]
    pub fn area(&self) -> f64 {
        crate::simplify::signed_area(&self.points).abs()
    }
}

fn trace_border_following(edges: &GrayImage) -> Vec<EdgeRing> {
    let contours: Vec<imageproc::contours::Contour<u32>> =
        imageproc::contours::find_contours(edges);

    contours
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.points.len() >= 2)
        .filter_map(|c| {
            let seed = c.points.first().map(|p| (p.x, p.y))?;
            let points = c.points.into_iter().map(|p| pixel_center(p.x, p.y)).collect();
            Some(EdgeRing { points, seed })
        })
        .collect()
}

/// Center of the pixel at column `x`, row `y`.
#[must_use]
pub fn pixel_center(x: u32, y: u32) -> Point {
    Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5)
}

/// Edge pixels grouped by 8-connected component.
#[derive(Debug, Clone)]
pub struct EdgeComponents {
    labels: image::ImageBuffer<Luma<u32>, Vec<u32>>,
    /// Pixel centers per component; index is `label - 1`.
    members: Vec<Vec<Point>>,
}

impl EdgeComponents {
    /// Label the edge map.
    #[must_use]
    pub fn label(edges: &GrayImage) -> Self {
        let labels = connected_components(edges, Connectivity::Eight, Luma([0u8]));
        let mut members: Vec<Vec<Point>> = Vec::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let Some(index) = (label.0[0] as usize).checked_sub(1) else {
                continue;
            };
            if members.len() <= index {
                members.resize_with(index + 1, Vec::new);
            }
            members[index].push(pixel_center(x, y));
        }
        Self { labels, members }
    }

    /// Pixels of the component containing `(x, y)`, if it is an edge
    /// pixel.
    #[must_use]
    pub fn component_at(&self, x: u32, y: u32) -> Option<&[Point]> {
        let label = self.labels.get_pixel_checked(x, y)?.0[0];
        let index = (label as usize).checked_sub(1)?;
        self.members.get(index).map(Vec::as_slice)
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Whether any edge pixel lies within `radius` pixels (Chebyshev) of `p`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn edge_near(edges: &GrayImage, p: Point, radius: u32) -> bool {
    let (cx, cy) = (p.x.floor() as i64, p.y.floor() as i64);
    let r = i64::from(radius);
    let (w, h) = (i64::from(edges.width()), i64::from(edges.height()));
    for y in (cy - r).max(0)..=(cy + r).min(h - 1) {
        for x in (cx - r).max(0)..=(cx + r).min(w - 1) {
            if edges.get_pixel(x as u32, y as u32).0[0] != 0 {
                return true;
            }
        }
    }
    false
}

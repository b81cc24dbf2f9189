//! Shared types for the vectrace engine.

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage` so downstream crates can reference the
/// normalized source buffer without depending on `image` directly.
pub use image::RgbaImage;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Translate by `(dx, dy)`.
    #[must_use]
    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Length of the longer side in pixels.
    #[must_use]
    pub fn longest_side(self) -> u32 {
        self.width.max(self.height)
    }
}

/// An 8-bit RGBA color (straight, not premultiplied alpha).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    /// Opaque white, the implicit paper color behind transparent pixels.
    pub const WHITE: Self = Self::rgba(255, 255, 255, 255);
    /// Opaque black.
    pub const BLACK: Self = Self::rgba(0, 0, 0, 255);

    /// Create a color from its channels.
    #[must_use]
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Alpha at or above half coverage.
    #[must_use]
    pub const fn is_opaque(self) -> bool {
        self.a >= 128
    }

    /// Composite this color over opaque white, returning RGB.
    #[must_use]
    pub fn over_white(self) -> [u8; 3] {
        let a = u16::from(self.a);
        let blend = |c: u8| {
            let v = (u16::from(c) * a + 255 * (255 - a) + 127) / 255;
            #[allow(clippy::cast_possible_truncation)]
            let v = v as u8;
            v
        };
        [blend(self.r), blend(self.g), blend(self.b)]
    }
}

impl From<image::Rgba<u8>> for Color {
    fn from(p: image::Rgba<u8>) -> Self {
        Self::rgba(p.0[0], p.0[1], p.0[2], p.0[3])
    }
}

/// Axis-aligned bounding region used for overlap tests.
///
/// Coordinates are continuous pixel coordinates: a pixel at column `x`
/// spans `x..x + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a box from two corners (order-independent).
    #[must_use]
    pub fn new(a: Point, b: Point) -> Self {
        Self {
            min_x: a.x.min(b.x),
            min_y: a.y.min(b.y),
            max_x: a.x.max(b.x),
            max_y: a.y.max(b.y),
        }
    }

    /// The box covering the whole canvas.
    #[must_use]
    pub fn canvas(dimensions: Dimensions) -> Self {
        Self {
            min_x: 0.0,
            min_y: 0.0,
            max_x: f64::from(dimensions.width),
            max_y: f64::from(dimensions.height),
        }
    }

    /// Smallest box containing all points, or `None` for an empty set.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        Some(iter.fold(Self::new(first, first), |acc, p| Self {
            min_x: acc.min_x.min(p.x),
            min_y: acc.min_y.min(p.y),
            max_x: acc.max_x.max(p.x),
            max_y: acc.max_y.max(p.y),
        }))
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Smallest box containing both boxes.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Area of the intersection of two boxes (zero when disjoint).
    #[must_use]
    pub fn intersection_area(&self, other: &Self) -> f64 {
        let w = self.max_x.min(other.max_x) - self.min_x.max(other.min_x);
        let h = self.max_y.min(other.max_y) - self.min_y.max(other.min_y);
        if w <= 0.0 || h <= 0.0 { 0.0 } else { w * h }
    }

    /// Intersection area as a fraction of the smaller box's area.
    ///
    /// Returns 0.0 when either box has no area.
    #[must_use]
    pub fn overlap_fraction(&self, other: &Self) -> f64 {
        let smaller = self.area().min(other.area());
        if smaller <= f64::EPSILON {
            return 0.0;
        }
        (self.intersection_area(other) / smaller).min(1.0)
    }

    /// Clip to the canvas and grow degenerate boxes to at least one
    /// pixel on each axis (as far as the canvas allows).
    #[must_use]
    pub fn fit_to_canvas(&self, dimensions: Dimensions) -> Self {
        let w = f64::from(dimensions.width);
        let h = f64::from(dimensions.height);
        let (min_x, max_x) = fit_axis(self.min_x, self.max_x, w);
        let (min_y, max_y) = fit_axis(self.min_y, self.max_y, h);
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Whether the box lies within the canvas bounds.
    #[must_use]
    pub fn is_within(&self, dimensions: Dimensions) -> bool {
        self.min_x >= 0.0
            && self.min_y >= 0.0
            && self.max_x <= f64::from(dimensions.width)
            && self.max_y <= f64::from(dimensions.height)
            && self.min_x <= self.max_x
            && self.min_y <= self.max_y
    }
}

/// Clamp one axis interval into `0..=limit` with a minimum extent of 1.
fn fit_axis(lo: f64, hi: f64, limit: f64) -> (f64, f64) {
    let mut lo = lo.clamp(0.0, limit);
    let mut hi = hi.clamp(0.0, limit);
    let min_extent = limit.min(1.0);
    if hi - lo < min_extent {
        let mid = (lo + hi) / 2.0;
        lo = (mid - min_extent / 2.0).clamp(0.0, limit - min_extent);
        hi = lo + min_extent;
    }
    (lo, hi)
}

/// Errors surfaced to callers of the engine.
///
/// Everything else (strategy timeouts, degenerate geometry inside one
/// strategy) is recovered inside the orchestrator and only visible in
/// logs and metrics.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum EngineError {
    /// The input buffer is empty, has zero dimensions, or does not match
    /// the declared layout.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Engine configuration is out of range.
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Every strategy finished without producing a single element.
    #[error("no vector elements were produced")]
    NoElementsProduced,
}

/// Failures inside one strategy run.
///
/// Never returned to callers: the orchestrator logs them and carries on
/// with the remaining strategies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    /// The run used its whole slice without producing anything usable.
    #[error("{strategy} exceeded its {slice:?} time slice")]
    Timeout {
        strategy: &'static str,
        slice: std::time::Duration,
    },

    /// Unexpected numeric condition (degenerate or non-finite geometry).
    #[error("internal strategy error: {0}")]
    Internal(String),
}

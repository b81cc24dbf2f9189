//! Vector elements: fitted primitives and traced paths.
//!
//! Elements are immutable once created. Stages that change geometry
//! (refinement, fusion) build new elements instead of mutating.

use serde::{Deserialize, Serialize};

use crate::types::{BoundingBox, Color, Dimensions, Point, StrategyError};

/// Which strategy produced an element or result.
///
/// Closed set: adding a strategy means adding a variant here and a row
/// in the orchestrator's dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Circle / rectangle / polygon fitting.
    PrimitiveDetection,
    /// Contour extraction and curve simplification.
    ClassicalTracing,
    /// Local parameter refinement against the source image.
    Refinement,
}

impl StrategyKind {
    /// Short stable name for logs and reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PrimitiveDetection => "primitives",
            Self::ClassicalTracing => "tracing",
            Self::Refinement => "refinement",
        }
    }
}

/// Where an element came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Strategy that created the element.
    pub strategy: StrategyKind,
    /// Position of the element in that strategy's output.
    pub ordinal: usize,
    /// Whether the refiner has adjusted the geometry since creation.
    pub refined: bool,
}

impl Provenance {
    #[must_use]
    pub const fn new(strategy: StrategyKind, ordinal: usize) -> Self {
        Self {
            strategy,
            ordinal,
            refined: false,
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.strategy.name(), self.ordinal)?;
        if self.refined {
            write!(f, "+refined")?;
        }
        Ok(())
    }
}

/// Parametric shape kinds, ordered by parameter count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Circle,
    Rectangle,
    Polygon,
}

/// Geometry of a fitted primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveShape {
    Circle {
        center: Point,
        radius: f64,
    },
    /// Possibly rotated rectangle; `angle` is in radians, clockwise in
    /// image coordinates, applied about `center`.
    Rectangle {
        center: Point,
        width: f64,
        height: f64,
        angle: f64,
    },
    Polygon {
        vertices: Vec<Point>,
    },
}

impl PrimitiveShape {
    #[must_use]
    pub const fn kind(&self) -> PrimitiveKind {
        match self {
            Self::Circle { .. } => PrimitiveKind::Circle,
            Self::Rectangle { .. } => PrimitiveKind::Rectangle,
            Self::Polygon { .. } => PrimitiveKind::Polygon,
        }
    }

    /// Corner points of a rectangle, or the vertices of a polygon.
    /// Empty for circles.
    #[must_use]
    pub fn outline(&self) -> Vec<Point> {
        match self {
            Self::Circle { .. } => Vec::new(),
            Self::Rectangle {
                center,
                width,
                height,
                angle,
            } => rectangle_corners(*center, *width, *height, *angle).to_vec(),
            Self::Polygon { vertices } => vertices.clone(),
        }
    }

    /// Unclipped bounding box.
    #[must_use]
    pub fn raw_bounds(&self) -> Option<BoundingBox> {
        match self {
            Self::Circle { center, radius } => Some(BoundingBox::new(
                center.offset(-radius, -radius),
                center.offset(*radius, *radius),
            )),
            Self::Rectangle { .. } | Self::Polygon { .. } => {
                BoundingBox::from_points(&self.outline())
            }
        }
    }
}

/// Corners of a rotated rectangle in drawing order.
#[must_use]
pub fn rectangle_corners(center: Point, width: f64, height: f64, angle: f64) -> [Point; 4] {
    let (sin, cos) = angle.sin_cos();
    let hw = width / 2.0;
    let hh = height / 2.0;
    let corner = |dx: f64, dy: f64| {
        Point::new(
            center.x + dx.mul_add(cos, -(dy * sin)),
            center.y + dx.mul_add(sin, dy * cos),
        )
    };
    [
        corner(-hw, -hh),
        corner(hw, -hh),
        corner(hw, hh),
        corner(-hw, hh),
    ]
}

/// A fitted primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Primitive {
    pub shape: PrimitiveShape,
    pub fill: Color,
}

/// Fill rule for (compound) paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FillRule {
    NonZero,
    #[default]
    EvenOdd,
}

/// Stroke settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub color: Color,
    pub width: f64,
}

/// Paint style of a path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathStyle {
    pub fill: Option<Color>,
    pub stroke: Option<Stroke>,
    pub fill_rule: FillRule,
}

impl PathStyle {
    #[must_use]
    pub const fn filled(color: Color) -> Self {
        Self {
            fill: Some(color),
            stroke: None,
            fill_rule: FillRule::EvenOdd,
        }
    }

    #[must_use]
    pub const fn stroked(color: Color, width: f64) -> Self {
        Self {
            fill: None,
            stroke: Some(Stroke { color, width }),
            fill_rule: FillRule::EvenOdd,
        }
    }
}

/// One drawing command after the subpath's start point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Segment {
    Line(Point),
    Cubic { ctrl1: Point, ctrl2: Point, to: Point },
}

impl Segment {
    /// End point of the segment.
    #[must_use]
    pub const fn end(&self) -> Point {
        match *self {
            Self::Line(p) | Self::Cubic { to: p, .. } => p,
        }
    }
}

/// A connected run of segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subpath {
    pub start: Point,
    pub segments: Vec<Segment>,
    pub closed: bool,
}

impl Subpath {
    /// Build a straight-line subpath through `points`.
    ///
    /// Returns `None` for an empty slice.
    #[must_use]
    pub fn from_points(points: &[Point], closed: bool) -> Option<Self> {
        let (&start, rest) = points.split_first()?;
        Some(Self {
            start,
            segments: rest.iter().copied().map(Segment::Line).collect(),
            closed,
        })
    }

    /// All points including control points.
    pub fn control_points(&self) -> impl Iterator<Item = Point> + '_ {
        std::iter::once(self.start).chain(self.segments.iter().flat_map(|s| {
            let points = match *s {
                Segment::Line(p) => [Some(p), None, None],
                Segment::Cubic { ctrl1, ctrl2, to } => [Some(ctrl1), Some(ctrl2), Some(to)],
            };
            points.into_iter().flatten()
        }))
    }

    /// Number of anchor points (start plus one per segment).
    #[must_use]
    pub fn anchor_count(&self) -> usize {
        1 + self.segments.len()
    }

    /// Translate every point.
    #[must_use]
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self {
            start: self.start.offset(dx, dy),
            segments: self
                .segments
                .iter()
                .map(|s| match *s {
                    Segment::Line(p) => Segment::Line(p.offset(dx, dy)),
                    Segment::Cubic { ctrl1, ctrl2, to } => Segment::Cubic {
                        ctrl1: ctrl1.offset(dx, dy),
                        ctrl2: ctrl2.offset(dx, dy),
                        to: to.offset(dx, dy),
                    },
                })
                .collect(),
            closed: self.closed,
        }
    }
}

/// A traced path: one or more subpaths sharing a style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathElement {
    pub subpaths: Vec<Subpath>,
    pub style: PathStyle,
}

impl PathElement {
    /// Unclipped bounding box over all points and control points.
    #[must_use]
    pub fn raw_bounds(&self) -> Option<BoundingBox> {
        let points: Vec<Point> = self
            .subpaths
            .iter()
            .flat_map(Subpath::control_points)
            .collect();
        let bounds = BoundingBox::from_points(&points)?;
        let pad = self.style.stroke.map_or(0.0, |s| s.width / 2.0);
        Some(BoundingBox {
            min_x: bounds.min_x - pad,
            min_y: bounds.min_y - pad,
            max_x: bounds.max_x + pad,
            max_y: bounds.max_y + pad,
        })
    }

    /// Total number of anchor points.
    #[must_use]
    pub fn anchor_count(&self) -> usize {
        self.subpaths.iter().map(Subpath::anchor_count).sum()
    }
}

/// Geometry and style of an element, without bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementGeometry {
    Primitive(Primitive),
    Path(PathElement),
}

/// A vector element with confidence, bounding region, and provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorElement {
    geometry: ElementGeometry,
    confidence: f64,
    bounds: BoundingBox,
    provenance: Provenance,
}

impl VectorElement {
    /// Create an element, clamping confidence into `[0, 1]` and the
    /// bounding region into the canvas.
    ///
    /// Returns `None` when the geometry has no points.
    #[must_use]
    pub fn new(
        geometry: ElementGeometry,
        confidence: f64,
        provenance: Provenance,
        canvas: Dimensions,
    ) -> Option<Self> {
        let raw = match &geometry {
            ElementGeometry::Primitive(p) => p.shape.raw_bounds(),
            ElementGeometry::Path(p) => p.raw_bounds(),
        }?;
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Some(Self {
            geometry,
            confidence,
            bounds: raw.fit_to_canvas(canvas),
            provenance,
        })
    }

    /// Same element with new geometry, marked as refined.
    #[must_use]
    pub fn with_geometry(&self, geometry: ElementGeometry, canvas: Dimensions) -> Option<Self> {
        let mut provenance = self.provenance;
        provenance.refined = true;
        Self::new(geometry, self.confidence, provenance, canvas)
    }

    #[must_use]
    pub const fn geometry(&self) -> &ElementGeometry {
        &self.geometry
    }

    #[must_use]
    pub const fn confidence(&self) -> f64 {
        self.confidence
    }

    #[must_use]
    pub const fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    #[must_use]
    pub const fn provenance(&self) -> Provenance {
        self.provenance
    }

    #[must_use]
    pub const fn is_primitive(&self) -> bool {
        matches!(self.geometry, ElementGeometry::Primitive(_))
    }

    /// Primitive kind, if this element is a primitive.
    #[must_use]
    pub const fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match &self.geometry {
            ElementGeometry::Primitive(p) => Some(p.shape.kind()),
            ElementGeometry::Path(_) => None,
        }
    }
}

/// Elements produced by one strategy run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyOutput {
    pub elements: Vec<VectorElement>,
    /// The run stopped at its deadline and the elements are partial.
    pub timed_out: bool,
}

/// Reject geometry with non-finite coordinates.
///
/// # Errors
///
/// Returns [`StrategyError::Internal`] naming the offending element.
pub fn check_finite(geometry: &ElementGeometry) -> Result<(), StrategyError> {
    let finite = |p: Point| p.x.is_finite() && p.y.is_finite();
    let ok = match geometry {
        ElementGeometry::Primitive(p) => match &p.shape {
            PrimitiveShape::Circle { center, radius } => finite(*center) && radius.is_finite(),
            PrimitiveShape::Rectangle {
                center,
                width,
                height,
                angle,
            } => finite(*center) && width.is_finite() && height.is_finite() && angle.is_finite(),
            PrimitiveShape::Polygon { vertices } => vertices.iter().copied().all(finite),
        },
        ElementGeometry::Path(path) => path
            .subpaths
            .iter()
            .flat_map(Subpath::control_points)
            .all(finite),
    };
    if ok {
        Ok(())
    } else {
        Err(StrategyError::Internal(format!(
            "non-finite coordinates in {geometry:?}"
        )))
    }
}

//! Classical tracing: contours from the edge map, simplified into
//! filled or stroked paths.
//!
//! Contours whose boxes overlap heavily (a shape and the holes or
//! details nested inside it) are grouped into one compound path filled
//! with the even-odd rule. Gentle runs of the simplified outline are
//! replaced with cubic curves.

use std::collections::BTreeMap;

use geo::{Contains, LineString};
use petgraph::unionfind::UnionFind;

use crate::analyze::ContentMetadata;
use crate::budget::Deadline;
use crate::config::TracerParams;
use crate::contour::{ContourTracer, ContourTracerKind, EdgeRing};
use crate::element::{
    ElementGeometry, PathElement, PathStyle, Provenance, Segment, StrategyKind, StrategyOutput,
    Subpath, VectorElement, check_finite,
};
use crate::simplify::{ring_distance, simplify_closed, turning_angle};
use crate::source::SourceImage;
use crate::spatial::BoxIndex;
use crate::types::{BoundingBox, Color, Point, StrategyError};

/// Confidence of a path traced without any simplification loss.
const BASE_CONFIDENCE: f64 = 0.9;

/// Contours with less area per unit of perimeter than this are strokes.
const THIN_RATIO: f64 = 3.0;

/// Pixels sampled when estimating a fill color.
const FILL_SAMPLES: u32 = 2_500;

/// Pixels kept away from the outline when sampling fills.
const FILL_MARGIN: f64 = 1.5;

/// Trace the edge map into path elements, largest first.
///
/// The deadline is checked between groups once one element exists.
///
/// # Errors
///
/// Returns [`StrategyError::Internal`] if a simplified outline has
/// non-finite coordinates.
pub fn trace(
    source: &SourceImage,
    content: &ContentMetadata,
    params: &TracerParams,
    deadline: Deadline,
) -> Result<StrategyOutput, StrategyError> {
    let canvas = content.dimensions;
    let contours: Vec<Contour> = ContourTracerKind::BorderFollowing
        .trace(&content.edges)
        .into_iter()
        .filter_map(|ring| Contour::new(ring, params.min_area))
        .collect();

    let mut groups = group_contours(&contours, params.group_overlap);
    groups.sort_by(|a, b| {
        let area = |g: &[usize]| g.iter().map(|&i| contours[i].area).fold(0.0, f64::max);
        area(b).total_cmp(&area(a)).then(a[0].cmp(&b[0]))
    });

    let background = content.background.unwrap_or(Color::WHITE);
    let mut elements = Vec::with_capacity(groups.len());
    let mut timed_out = false;
    for group in &groups {
        if !elements.is_empty() && deadline.expired() {
            timed_out = true;
            break;
        }
        let members: Vec<&Contour> = group.iter().map(|&i| &contours[i]).collect();
        let Some((geometry, residual)) = trace_group(source, &members, params, background) else {
            continue;
        };
        check_finite(&geometry)?;
        let loss = residual / (2.0 * params.tolerance.max(f64::EPSILON));
        let confidence = BASE_CONFIDENCE * (1.0 - loss);
        if let Some(element) = VectorElement::new(
            geometry,
            confidence,
            Provenance::new(StrategyKind::ClassicalTracing, elements.len()),
            canvas,
        ) {
            elements.push(element);
        }
    }

    tracing::debug!(
        contours = contours.len(),
        groups = groups.len(),
        emitted = elements.len(),
        timed_out,
        "classical tracing finished"
    );
    Ok(StrategyOutput {
        elements,
        timed_out,
    })
}

/// An outer contour that passed the area filter.
#[derive(Debug, Clone)]
struct Contour {
    points: Vec<Point>,
    bounds: BoundingBox,
    area: f64,
    thin: bool,
}

impl Contour {
    fn new(ring: EdgeRing, min_area: f64) -> Option<Self> {
        if ring.points.len() < 3 {
            return None;
        }
        let bounds = ring.bounds()?;
        let enclosed = ring.area();
        let thin = enclosed < THIN_RATIO * ring.perimeter();
        // A stroke encloses almost nothing; judge it by its extent.
        let area = if thin { bounds.area() } else { enclosed };
        if area < min_area {
            return None;
        }
        Some(Self {
            points: ring.points,
            bounds,
            area,
            thin,
        })
    }
}

/// Union contours whose boxes overlap by more than `threshold`, and
/// repeat over the merged boxes until nothing changes.
///
/// Each group lists member indices ascending; groups are ordered by
/// their first member.
fn group_contours(contours: &[Contour], threshold: f64) -> Vec<Vec<usize>> {
    let n = contours.len();
    let mut uf = UnionFind::<usize>::new(n);
    let mut boxes: BTreeMap<usize, BoundingBox> =
        contours.iter().map(|c| c.bounds).enumerate().collect();

    loop {
        let index = BoxIndex::bulk_load(boxes.iter().map(|(&id, &b)| (id, b)));
        let mut merged = false;
        for (&id, bounds) in &boxes {
            for other in index.candidates(bounds) {
                if other <= id {
                    continue;
                }
                let Some(other_bounds) = boxes.get(&other) else {
                    continue;
                };
                if bounds.overlap_fraction(other_bounds) > threshold {
                    merged |= uf.union(id, other);
                }
            }
        }
        if !merged {
            break;
        }
        // One box per root, covering all members.
        boxes.clear();
        for (i, contour) in contours.iter().enumerate() {
            boxes
                .entry(uf.find_mut(i))
                .and_modify(|b| *b = b.union(&contour.bounds))
                .or_insert(contour.bounds);
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..n {
        groups.entry(uf.find_mut(i)).or_default().push(i);
    }
    let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
    groups.sort_by_key(|g| g[0]);
    groups
}

/// Build the path for one group and report its mean simplification
/// residual.
fn trace_group(
    source: &SourceImage,
    members: &[&Contour],
    params: &TracerParams,
    background: Color,
) -> Option<(ElementGeometry, f64)> {
    let mut members = members.to_vec();
    members.sort_by(|a, b| b.area.total_cmp(&a.area));
    let primary = *members.first()?;

    let mut rings: Vec<Vec<Point>> = Vec::with_capacity(members.len());
    let mut residual_sum = 0.0;
    let mut weight = 0.0;
    for contour in &members {
        let simplified = simplify_closed(&contour.points, params.tolerance);
        if simplified.points.len() < 3 {
            continue;
        }
        #[allow(clippy::cast_precision_loss)]
        let w = contour.points.len() as f64;
        residual_sum += simplified.mean_residual * w;
        weight += w;
        rings.push(simplified.points);
    }
    if rings.is_empty() {
        return None;
    }
    let residual = residual_sum / weight;

    let corner = params.curvature_threshold_degrees.to_radians();
    let subpaths: Vec<Subpath> = rings
        .iter()
        .filter_map(|ring| {
            if params.smooth_curves {
                smooth_subpath(ring, corner)
            } else {
                Subpath::from_points(ring, true)
            }
        })
        .collect();

    let style = if primary.thin {
        PathStyle::stroked(ink_color(source, &rings, background), params.stroke_width)
    } else {
        PathStyle::filled(fill_color(source, primary.bounds, &rings, background))
    };
    Some((ElementGeometry::Path(PathElement { subpaths, style }), residual))
}

/// Closed subpath through `ring` where runs between smooth vertices
/// become Catmull-Rom cubics.
fn smooth_subpath(ring: &[Point], corner_turn: f64) -> Option<Subpath> {
    let n = ring.len();
    if n < 3 {
        return Subpath::from_points(ring, true);
    }
    let at = |i: usize| ring[i % n];
    let smooth: Vec<bool> = (0..n)
        .map(|i| turning_angle(at(i + n - 1), at(i), at(i + 1)) < corner_turn)
        .collect();

    let segments = (0..n)
        .map(|i| {
            let (a, b) = (at(i), at(i + 1));
            if smooth[i] && smooth[(i + 1) % n] {
                let (prev, next) = (at(i + n - 1), at(i + 2));
                Segment::Cubic {
                    ctrl1: a.offset((b.x - prev.x) / 6.0, (b.y - prev.y) / 6.0),
                    ctrl2: b.offset(-(next.x - a.x) / 6.0, -(next.y - a.y) / 6.0),
                    to: b,
                }
            } else {
                Segment::Line(b)
            }
        })
        .collect();
    Some(Subpath {
        start: ring[0],
        segments,
        closed: true,
    })
}

/// Even-odd membership test over a set of rings.
struct EvenOdd {
    polygons: Vec<geo::Polygon<f64>>,
}

impl EvenOdd {
    fn new(rings: &[Vec<Point>]) -> Self {
        let polygons = rings
            .iter()
            .map(|ring| {
                geo::Polygon::new(
                    LineString::from(ring.iter().map(|p| (p.x, p.y)).collect::<Vec<_>>()),
                    vec![],
                )
            })
            .collect();
        Self { polygons }
    }

    fn contains(&self, p: Point) -> bool {
        let point = geo::Point::new(p.x, p.y);
        self.polygons.iter().filter(|poly| poly.contains(&point)).count() % 2 == 1
    }
}

/// Mean source color inside the compound region, away from outlines.
fn fill_color(
    source: &SourceImage,
    bounds: BoundingBox,
    rings: &[Vec<Point>],
    background: Color,
) -> Color {
    let region = EvenOdd::new(rings);
    let away = |p: Point| rings.iter().all(|r| ring_distance(p, r) >= FILL_MARGIN);
    source
        .mean_color_where(&bounds, FILL_SAMPLES, |p| region.contains(p) && away(p))
        .or_else(|| source.mean_color_where(&bounds, FILL_SAMPLES, |p| region.contains(p)))
        .unwrap_or(background)
}

/// The color inside the outline that stands out most from the
/// background.
fn ink_color(source: &SourceImage, rings: &[Vec<Point>], background: Color) -> Color {
    let Some(bounds) = BoundingBox::from_points(rings.iter().flatten()) else {
        return Color::BLACK;
    };
    let clipped = bounds.fit_to_canvas(source.dimensions());
    let region = EvenOdd::new(&rings[..1]);
    let mut best: Option<(u32, Color)> = None;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (x0, y0, x1, y1) = (
        clipped.min_x.floor() as u32,
        clipped.min_y.floor() as u32,
        (clipped.max_x.ceil() as u32).min(source.width()),
        (clipped.max_y.ceil() as u32).min(source.height()),
    );
    for y in y0..y1 {
        for x in x0..x1 {
            let p = Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5);
            if !region.contains(p) && ring_distance(p, &rings[0]) > 1.0 {
                continue;
            }
            let color = source.color_at(x, y);
            let score = contrast(color, background);
            if best.is_none_or(|(s, _)| score > s) {
                best = Some((score, color));
            }
        }
    }
    best.map_or(Color::BLACK, |(_, c)| c)
}

/// Sum of channel differences after compositing over white.
fn contrast(a: Color, b: Color) -> u32 {
    a.over_white()
        .iter()
        .zip(b.over_white())
        .map(|(&x, y)| u32::from(x.abs_diff(y)))
        .sum()
}

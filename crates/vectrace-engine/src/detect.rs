//! Primitive detection: circles, rectangles, and polygons fitted to
//! edge bands.
//!
//! Every outer edge band is a candidate region. Three independent fits
//! run per band and each yields a confidence in `[0, 1]`:
//!
//! - **Circle**: gradient-direction Hough voting for the center, refined
//!   by an algebraic least-squares fit; radius is the median distance
//!   of band pixels. Confidence is angular coverage x radial fit x
//!   bounding-box roundness.
//! - **Rectangle**: Douglas-Peucker corners gate a minimum rotated
//!   rectangle over the band pixels. Confidence is outline coverage x
//!   fit x right-angle score.
//! - **Polygon**: Douglas-Peucker vertices, inset to the band center
//!   line. Confidence is outline coverage x fit x vertex-count factor.
//!
//! The last factor of each product is cheap and bounds the whole
//! product from above, so it is checked against the threshold before
//! the expensive part runs.

use std::f64::consts::{FRAC_PI_2, TAU};

use geo::{Contains, LineString, MinimumRotatedRect, MultiPoint};

use crate::analyze::ContentMetadata;
use crate::budget::Deadline;
use crate::config::DetectorParams;
use crate::contour::{ContourTracer, ContourTracerKind, EdgeComponents, EdgeRing, edge_near};
use crate::edge::Gradients;
use crate::element::{
    ElementGeometry, Primitive, PrimitiveShape, Provenance, StrategyKind, StrategyOutput,
    VectorElement, check_finite, rectangle_corners,
};
use crate::simplify::{
    drop_collinear, ring_distance, segment_distance, signed_area, simplify_closed,
    turning_angle,
};
use crate::source::SourceImage;
use crate::types::{BoundingBox, Color, Point, StrategyError};

/// Angular samples used to measure circle coverage.
const COVERAGE_SAMPLES: u32 = 64;

/// Vertices turning less than this (radians) are not corners.
const MIN_CORNER_TURN: f64 = 20.0 * std::f64::consts::PI / 180.0;

/// Hough work above this many votes is subsampled.
const MAX_VOTES: usize = 2_000_000;

/// Hough accumulators above this many cells are skipped in favor of the
/// algebraic fit alone.
const MAX_ACCUMULATOR_CELLS: usize = 4_000_000;

/// Band pixels used when measuring fit residuals.
const MAX_FIT_PIXELS: usize = 2_000;

/// Pixels sampled when estimating a fill color.
const FILL_SAMPLES: u32 = 2_500;

/// Detect primitives.
///
/// Only candidates at or above `params.confidence_threshold` are
/// returned. The deadline is checked between bands once at least one
/// candidate has been accepted.
///
/// # Errors
///
/// Returns [`StrategyError::Internal`] if a fitted shape has non-finite
/// parameters.
pub fn detect(
    source: &SourceImage,
    content: &ContentMetadata,
    params: &DetectorParams,
    deadline: Deadline,
) -> Result<StrategyOutput, StrategyError> {
    let canvas = content.dimensions;
    if content.stats.uniform || content.stats.edge_density <= 0.0 {
        return Ok(edgeless_canvas(source, content));
    }

    let rings = ContourTracerKind::BorderFollowing.trace(&content.edges);
    let components = EdgeComponents::label(&content.edges);
    let threshold = params.confidence_threshold;
    let min_extent = params.min_size.min(2.0 * params.min_radius);

    let mut candidates: Vec<Candidate> = Vec::new();
    let mut timed_out = false;
    for (chain, ring) in rings.iter().enumerate() {
        if !candidates.is_empty() && deadline.expired() {
            timed_out = true;
            break;
        }
        let Some(band) = Band::new(ring, &components) else {
            continue;
        };
        if band.bounds.width().max(band.bounds.height()) < min_extent {
            continue;
        }

        let fits = [
            fit_circle(&band, content, params, threshold),
            fit_rectangle(&band, &content.edges, params, threshold),
            fit_polygon(&band, &content.edges, params, threshold),
        ];
        for (shape, confidence) in fits.into_iter().flatten() {
            if confidence < threshold {
                continue;
            }
            let Some(bounds) = shape.raw_bounds() else {
                continue;
            };
            tracing::trace!(chain, kind = ?shape.kind(), confidence, "primitive candidate");
            candidates.push(Candidate {
                bounds: bounds.fit_to_canvas(canvas),
                shape,
                confidence,
                chain,
            });
        }
    }

    let candidate_count = candidates.len();
    let accepted = merge(candidates, params);
    let mut elements = Vec::with_capacity(accepted.len());
    for (ordinal, candidate) in accepted.into_iter().enumerate() {
        let fill = fill_color(source, &candidate.shape);
        let geometry = ElementGeometry::Primitive(Primitive {
            shape: candidate.shape,
            fill,
        });
        check_finite(&geometry)?;
        if let Some(element) = VectorElement::new(
            geometry,
            candidate.confidence,
            Provenance::new(StrategyKind::PrimitiveDetection, ordinal),
            canvas,
        ) {
            elements.push(element);
        }
    }

    tracing::debug!(
        bands = rings.len(),
        candidates = candidate_count,
        emitted = elements.len(),
        timed_out,
        "primitive detection finished"
    );
    Ok(StrategyOutput {
        elements,
        timed_out,
    })
}

/// An image without edges is one canvas-sized rectangle.
///
/// A flat image is filled with its only color at full confidence. A
/// soft ramp or near-identical tones get the mean color, with
/// confidence lowered by the share of smoothly varying pixels.
fn edgeless_canvas(source: &SourceImage, content: &ContentMetadata) -> StrategyOutput {
    let canvas = content.dimensions;
    let (w, h) = (f64::from(canvas.width), f64::from(canvas.height));
    let (fill, confidence) = if content.stats.uniform {
        (content.primary_color(), 1.0)
    } else {
        let mean = source
            .mean_color_where(&BoundingBox::canvas(canvas), FILL_SAMPLES, |_| true)
            .unwrap_or_else(|| content.primary_color());
        (mean, 0.5f64.mul_add(-content.stats.smooth_fraction, 1.0))
    };
    let geometry = ElementGeometry::Primitive(Primitive {
        shape: PrimitiveShape::Rectangle {
            center: Point::new(w / 2.0, h / 2.0),
            width: w,
            height: h,
            angle: 0.0,
        },
        fill,
    });
    let elements = VectorElement::new(
        geometry,
        confidence,
        Provenance::new(StrategyKind::PrimitiveDetection, 0),
        canvas,
    )
    .into_iter()
    .collect();
    StrategyOutput {
        elements,
        timed_out: false,
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    shape: PrimitiveShape,
    confidence: f64,
    bounds: BoundingBox,
    chain: usize,
}

/// Greedy merge in descending confidence.
///
/// A candidate overlapping an accepted one is dropped, unless it is a
/// simpler kind within the preference margin, in which case it takes
/// the accepted candidate's place.
fn merge(mut candidates: Vec<Candidate>, params: &DetectorParams) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.shape.kind().cmp(&b.shape.kind()))
            .then(a.chain.cmp(&b.chain))
    });

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let overlapping = kept
            .iter()
            .position(|k| k.bounds.overlap_fraction(&candidate.bounds) > params.merge_overlap);
        match overlapping {
            None => kept.push(candidate),
            Some(i) => {
                let incumbent = &kept[i];
                if candidate.shape.kind() < incumbent.shape.kind()
                    && incumbent.confidence - candidate.confidence <= params.kind_preference_margin
                {
                    tracing::trace!(
                        from = ?incumbent.shape.kind(),
                        to = ?candidate.shape.kind(),
                        "simpler primitive preferred"
                    );
                    kept[i] = candidate;
                }
            }
        }
    }
    kept
}

/// One edge band: its outer ring plus all of its pixels.
struct Band<'a> {
    ring: &'a EdgeRing,
    pixels: &'a [Point],
    bounds: BoundingBox,
    perimeter: f64,
    /// Half the band width; the true boundary runs along the band's
    /// center line.
    half_thickness: f64,
}

impl<'a> Band<'a> {
    fn new(ring: &'a EdgeRing, components: &'a EdgeComponents) -> Option<Self> {
        let pixels = components.component_at(ring.seed.0, ring.seed.1)?;
        if pixels.len() < 8 {
            return None;
        }
        let bounds = BoundingBox::from_points(pixels)?;
        let perimeter = ring.perimeter().max(1.0);
        #[allow(clippy::cast_precision_loss)]
        let thickness = (pixels.len() as f64 / perimeter).clamp(1.0, 4.0);
        Some(Self {
            ring,
            pixels,
            bounds,
            perimeter,
            half_thickness: thickness / 2.0,
        })
    }

    /// Subset of pixels used for residual statistics.
    fn fit_pixels(&self) -> impl Iterator<Item = Point> + '_ {
        let stride = self.pixels.len().div_ceil(MAX_FIT_PIXELS).max(1);
        self.pixels.iter().copied().step_by(stride)
    }

    /// Window (in pixels) within which an outline point counts as
    /// supported by the edge map.
    fn support_window(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let window = (self.half_thickness + 1.0).ceil() as u32;
        window
    }

    fn corners(&self) -> Vec<Point> {
        let tolerance = (0.015 * self.perimeter).max(1.5);
        drop_collinear(
            &simplify_closed(&self.ring.points, tolerance).points,
            MIN_CORNER_TURN,
        )
    }
}

fn fit_circle(
    band: &Band<'_>,
    content: &ContentMetadata,
    params: &DetectorParams,
    threshold: f64,
) -> Option<(PrimitiveShape, f64)> {
    let (w, h) = (band.bounds.width(), band.bounds.height());
    let longest = w.max(h);
    if longest <= 0.0 {
        return None;
    }
    let roundness = w.min(h) / longest;
    if roundness < threshold {
        return None;
    }
    let r_hi = params.max_radius.min(longest / 2.0 + 2.0);
    if r_hi < params.min_radius {
        return None;
    }

    let algebraic = kasa_center(band.pixels);
    let voted = hough_center(band, &content.gradients, params.min_radius, r_hi);
    let mut center = voted.or(algebraic)?;
    let mut radius = median_distance(band.pixels, center)?;
    if let Some(refined) = algebraic
        && refined.distance(center) <= (0.1 * radius).max(2.0)
    {
        center = refined;
        radius = median_distance(band.pixels, center)?;
    }
    if !(params.min_radius..=params.max_radius).contains(&radius) {
        return None;
    }

    let mut residuals: Vec<f64> = band
        .fit_pixels()
        .map(|p| (p.distance(center) - radius).abs())
        .collect();
    let fit = fit_score(quantile(&mut residuals, 0.9), band.half_thickness, radius);

    let window = band.support_window();
    let hits = (0..COVERAGE_SAMPLES)
        .filter(|&k| {
            let theta = TAU * f64::from(k) / f64::from(COVERAGE_SAMPLES);
            let p = Point::new(
                radius.mul_add(theta.cos(), center.x),
                radius.mul_add(theta.sin(), center.y),
            );
            edge_near(&content.edges, p, window)
        })
        .count();
    #[allow(clippy::cast_precision_loss)]
    let coverage = hits as f64 / f64::from(COVERAGE_SAMPLES);

    Some((
        PrimitiveShape::Circle { center, radius },
        coverage * fit * roundness,
    ))
}

fn fit_rectangle(
    band: &Band<'_>,
    edges: &image::GrayImage,
    params: &DetectorParams,
    threshold: f64,
) -> Option<(PrimitiveShape, f64)> {
    let corners = band.corners();
    if corners.len() != 4 {
        return None;
    }
    let right = right_angle_score(&corners);
    if right < threshold {
        return None;
    }

    let (center, width, height, angle) = min_rotated_rect(band.pixels)?;
    let shrink = 2.0f64.mul_add(band.half_thickness, -1.0);
    let (width, height) = (width - shrink, height - shrink);
    if width.min(height) < params.min_size {
        return None;
    }
    let outline = rectangle_corners(center, width, height, angle);
    let fit = outline_fit(band, &outline, (width * height).sqrt() / 2.0);
    let coverage = outline_coverage(edges, &outline, band.support_window());
    Some((
        PrimitiveShape::Rectangle {
            center,
            width,
            height,
            angle,
        },
        coverage * fit * right,
    ))
}

fn fit_polygon(
    band: &Band<'_>,
    edges: &image::GrayImage,
    params: &DetectorParams,
    threshold: f64,
) -> Option<(PrimitiveShape, f64)> {
    let corners = band.corners();
    let n = corners.len();
    if !(3..=params.max_polygon_vertices).contains(&n) {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let vertex_factor = 0.02f64.mul_add(-((n - 3) as f64), 1.0);
    if vertex_factor < threshold {
        return None;
    }

    let margin = 4.0f64.mul_add(band.half_thickness, 1.0);
    let vertices = fit_sides(&corners, band.fit_pixels(), margin)
        .unwrap_or_else(|| inset_polygon(&corners, band.half_thickness - 0.5));
    let bounds = BoundingBox::from_points(&vertices)?;
    if bounds.width().max(bounds.height()) < params.min_size {
        return None;
    }
    let area = signed_area(&vertices).abs();
    if area <= 0.0 {
        return None;
    }
    let fit = outline_fit(band, &vertices, area.sqrt() / 2.0);
    let coverage = outline_coverage(edges, &vertices, band.support_window());
    Some((
        PrimitiveShape::Polygon { vertices },
        coverage * fit * vertex_factor,
    ))
}

/// Refit every side as the orthogonal regression line through the band
/// pixels nearest to it, away from both of its corners, and intersect
/// neighbouring sides.
///
/// Corners from simplification sit on outer border pixels and tilt the
/// sides on stair-stepped diagonals; the refit follows the band center
/// line instead. `None` when a side has fewer than two supporting
/// pixels.
fn fit_sides(
    corners: &[Point],
    pixels: impl Iterator<Item = Point>,
    margin: f64,
) -> Option<Vec<Point>> {
    let n = corners.len();
    let side = |i: usize| (corners[i], corners[(i + 1) % n]);
    let mut support: Vec<Vec<Point>> = vec![Vec::new(); n];
    for p in pixels {
        let (nearest, _) = (0..n)
            .map(|i| {
                let (a, b) = side(i);
                (i, segment_distance(p, a, b))
            })
            .min_by(|x, y| x.1.total_cmp(&y.1))?;
        let (a, b) = side(nearest);
        if p.distance(a) >= margin && p.distance(b) >= margin {
            support[nearest].push(p);
        }
    }
    let lines = support
        .iter()
        .map(|points| principal_line(points))
        .collect::<Option<Vec<_>>>()?;
    Some(
        (0..n)
            .map(|i| {
                let (p, r) = lines[(i + n - 1) % n];
                let (q, s) = lines[i];
                line_intersection(p, r, q, s)
                    .filter(|v| v.distance(corners[i]) <= 2.0 * margin)
                    .unwrap_or(corners[i])
            })
            .collect(),
    )
}

/// Centroid and unit direction of the best-fit line through `points`.
fn principal_line(points: &[Point]) -> Option<(Point, (f64, f64))> {
    if points.len() < 2 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let my = points.iter().map(|p| p.y).sum::<f64>() / n;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in points {
        let (u, v) = (p.x - mx, p.y - my);
        sxx += u * u;
        syy += v * v;
        sxy += u * v;
    }
    let angle = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    Some((Point::new(mx, my), (angle.cos(), angle.sin())))
}

/// Intersection of two lines given as point and direction.
fn line_intersection(p: Point, r: (f64, f64), q: Point, s: (f64, f64)) -> Option<Point> {
    let denom = r.0.mul_add(s.1, -(r.1 * s.0));
    if denom.abs() < 1e-6 {
        return None;
    }
    let t = (q.x - p.x).mul_add(s.1, -((q.y - p.y) * s.0)) / denom;
    Some(Point::new(t.mul_add(r.0, p.x), t.mul_add(r.1, p.y)))
}

/// Vote for circle centers along each band pixel's gradient direction.
fn hough_center(band: &Band<'_>, gradients: &Gradients, r_lo: f64, r_hi: f64) -> Option<Point> {
    const MARGIN: f64 = 2.0;
    let ox = (band.bounds.min_x - MARGIN).floor();
    let oy = (band.bounds.min_y - MARGIN).floor();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let cols = ((band.bounds.max_x + MARGIN).ceil() - ox) as usize + 1;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rows = ((band.bounds.max_y + MARGIN).ceil() - oy) as usize + 1;
    if cols.saturating_mul(rows) > MAX_ACCUMULATOR_CELLS {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let steps = (r_hi - r_lo).floor() as usize + 1;
    let stride = (band.pixels.len().saturating_mul(steps) / MAX_VOTES).max(1);

    let mut acc = vec![0_u32; cols * rows];
    for p in band.pixels.iter().step_by(stride) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (gx, gy) = gradients.at(p.x as u32, p.y as u32);
        let magnitude = gx.hypot(gy);
        if magnitude <= 0.0 {
            continue;
        }
        let (ux, uy) = (f64::from(gx / magnitude), f64::from(gy / magnitude));
        for step in 0..steps {
            #[allow(clippy::cast_precision_loss)]
            let r = r_lo + step as f64;
            for signed in [-r, r] {
                let cx = signed.mul_add(ux, p.x) - ox;
                let cy = signed.mul_add(uy, p.y) - oy;
                if cx < 0.0 || cy < 0.0 {
                    continue;
                }
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let (i, j) = (cx as usize, cy as usize);
                if i < cols && j < rows {
                    acc[j * cols + i] += 1;
                }
            }
        }
    }

    let (best, votes) = acc
        .iter()
        .enumerate()
        .fold((0, 0), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) });
    if votes == 0 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let center = Point::new(
        ox + (best % cols) as f64 + 0.5,
        oy + (best / cols) as f64 + 0.5,
    );
    Some(center)
}

/// Algebraic (Kasa) circle center over centered coordinates.
fn kasa_center(points: &[Point]) -> Option<Point> {
    if points.len() < 3 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let my = points.iter().map(|p| p.y).sum::<f64>() / n;

    let (mut suu, mut svv, mut suv) = (0.0, 0.0, 0.0);
    let (mut suuu, mut svvv, mut suvv, mut svuu) = (0.0, 0.0, 0.0, 0.0);
    for p in points {
        let (u, v) = (p.x - mx, p.y - my);
        suu += u * u;
        svv += v * v;
        suv += u * v;
        suuu += u * u * u;
        svvv += v * v * v;
        suvv += u * v * v;
        svuu += v * u * u;
    }
    let det = suu.mul_add(svv, -(suv * suv));
    if det.abs() < 1e-9 {
        return None;
    }
    let bu = 0.5 * (suuu + suvv);
    let bv = 0.5 * (svvv + svuu);
    let uc = bu.mul_add(svv, -(bv * suv)) / det;
    let vc = bv.mul_add(suu, -(bu * suv)) / det;
    Some(Point::new(mx + uc, my + vc))
}

fn median_distance(points: &[Point], center: Point) -> Option<f64> {
    let mut distances: Vec<f64> = points.iter().map(|p| p.distance(center)).collect();
    if distances.is_empty() {
        return None;
    }
    Some(quantile(&mut distances, 0.5))
}

/// Value at fraction `q` of the sorted data (nearest rank).
fn quantile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let index = ((values.len() - 1) as f64 * q).round() as usize;
    values[index.min(values.len() - 1)]
}

/// Map a residual quantile to `[0, 1]`.
///
/// Spread up to the band half-width is expected and free; beyond it the
/// score falls off relative to the shape size.
fn fit_score(residual: f64, half_thickness: f64, size: f64) -> f64 {
    let excess = (residual - half_thickness).max(0.0);
    1.0 - (excess / 0.05f64.mul_add(size, 0.25)).min(1.0)
}

fn outline_fit(band: &Band<'_>, outline: &[Point], size: f64) -> f64 {
    let mut residuals: Vec<f64> = band
        .fit_pixels()
        .map(|p| ring_distance(p, outline))
        .collect();
    fit_score(quantile(&mut residuals, 0.9), band.half_thickness, size)
}

/// Fraction of evenly spaced outline samples with edge support.
fn outline_coverage(edges: &image::GrayImage, outline: &[Point], window: u32) -> f64 {
    let edges_iter = || outline.iter().zip(outline.iter().cycle().skip(1));
    let total: f64 = edges_iter().map(|(a, b)| a.distance(*b)).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let step = total / f64::from(COVERAGE_SAMPLES);
    let mut hits = 0_u32;
    let mut target = step / 2.0;
    let mut walked = 0.0;
    for (&a, &b) in edges_iter() {
        let len = a.distance(b);
        while target < walked + len && len > 0.0 {
            let t = (target - walked) / len;
            let p = Point::new(t.mul_add(b.x - a.x, a.x), t.mul_add(b.y - a.y, a.y));
            if edge_near(edges, p, window) {
                hits += 1;
            }
            target += step;
        }
        walked += len;
    }
    f64::from(hits) / f64::from(COVERAGE_SAMPLES)
}

/// `1` for four right angles, falling off quadratically with the worst
/// corner's deviation.
fn right_angle_score(corners: &[Point]) -> f64 {
    let n = corners.len();
    let worst = (0..n)
        .map(|i| {
            let turn = turning_angle(corners[(i + n - 1) % n], corners[i], corners[(i + 1) % n]);
            (turn - FRAC_PI_2).abs() / FRAC_PI_2
        })
        .fold(0.0, f64::max);
    1.0 - worst.min(1.0).powi(2)
}

/// Minimum-area rotated rectangle as `(center, width, height, angle)`
/// with the angle normalized into `(-PI/4, PI/4]`.
fn min_rotated_rect(points: &[Point]) -> Option<(Point, f64, f64, f64)> {
    let cloud: MultiPoint<f64> = points
        .iter()
        .map(|p| geo::Point::new(p.x, p.y))
        .collect();
    let rect = cloud.minimum_rotated_rect()?;
    let corners: Vec<Point> = rect
        .exterior()
        .coords()
        .take(4)
        .map(|c| Point::new(c.x, c.y))
        .collect();
    let [a, b, _, d] = corners.as_slice() else {
        return None;
    };
    let center = Point::new(
        corners.iter().map(|p| p.x).sum::<f64>() / 4.0,
        corners.iter().map(|p| p.y).sum::<f64>() / 4.0,
    );
    let mut width = a.distance(*b);
    let mut height = a.distance(*d);
    let mut angle = (b.y - a.y).atan2(b.x - a.x);
    while angle > std::f64::consts::FRAC_PI_4 {
        angle -= FRAC_PI_2;
        std::mem::swap(&mut width, &mut height);
    }
    while angle <= -std::f64::consts::FRAC_PI_4 {
        angle += FRAC_PI_2;
        std::mem::swap(&mut width, &mut height);
    }
    if angle.abs() < 1e-9 {
        angle = 0.0;
    }
    Some((center, width, height, angle))
}

/// Move every edge of a simple polygon inward by `distance`.
fn inset_polygon(vertices: &[Point], distance: f64) -> Vec<Point> {
    let n = vertices.len();
    if distance <= 0.0 || n < 3 {
        return vertices.to_vec();
    }
    let orientation = signed_area(vertices).signum();
    let inward = |a: Point, b: Point| {
        let (dx, dy) = (b.x - a.x, b.y - a.y);
        let len = dx.hypot(dy).max(f64::EPSILON);
        (orientation * -dy / len, orientation * dx / len)
    };
    (0..n)
        .map(|i| {
            let (prev, cur, next) = (vertices[(i + n - 1) % n], vertices[i], vertices[(i + 1) % n]);
            let (n1x, n1y) = inward(prev, cur);
            let (n2x, n2y) = inward(cur, next);
            let p = prev.offset(n1x * distance, n1y * distance);
            let q = cur.offset(n2x * distance, n2y * distance);
            let (rx, ry) = (cur.x - prev.x, cur.y - prev.y);
            let (sx, sy) = (next.x - cur.x, next.y - cur.y);
            let denom = rx.mul_add(sy, -(ry * sx));
            if denom.abs() < 1e-9 {
                return cur.offset((n1x + n2x) / 2.0 * distance, (n1y + n2y) / 2.0 * distance);
            }
            let t = (q.x - p.x).mul_add(sy, -((q.y - p.y) * sx)) / denom;
            Point::new(t.mul_add(rx, p.x), t.mul_add(ry, p.y))
        })
        .collect()
}

/// Mean source color well inside the shape, falling back to the whole
/// interior and then to the pixel at its center.
fn fill_color(source: &SourceImage, shape: &PrimitiveShape) -> Color {
    const MARGIN: f64 = 1.5;
    let Some(bounds) = shape.raw_bounds() else {
        return Color::BLACK;
    };
    let sample = |margin: f64| match shape {
        PrimitiveShape::Circle { center, radius } => {
            source.mean_color_where(&bounds, FILL_SAMPLES, |p| {
                p.distance(*center) <= radius - margin
            })
        }
        PrimitiveShape::Rectangle { .. } | PrimitiveShape::Polygon { .. } => {
            let outline = shape.outline();
            let polygon = geo::Polygon::new(
                LineString::from(outline.iter().map(|p| (p.x, p.y)).collect::<Vec<_>>()),
                vec![],
            );
            source.mean_color_where(&bounds, FILL_SAMPLES, |p| {
                polygon.contains(&geo::Point::new(p.x, p.y)) && ring_distance(p, &outline) >= margin
            })
        }
    };
    sample(MARGIN).or_else(|| sample(0.0)).unwrap_or_else(|| {
        let c = bounds.fit_to_canvas(source.dimensions()).center();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (x, y) = (
            (c.x as u32).min(source.width() - 1),
            (c.y as u32).min(source.height() - 1),
        );
        source.color_at(x, y)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::analyze::analyze;
    use crate::config::AnalyzerConfig;
    use crate::types::Dimensions;

    fn run(img: RgbaImage, params: &DetectorParams) -> StrategyOutput {
        let source = SourceImage::from_rgba(img).unwrap();
        let content = analyze(&source, &AnalyzerConfig::default());
        detect(&source, &content, params, Deadline::none()).unwrap()
    }

    fn disk(size: u32, cx: f64, cy: f64, r: f64) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            let d = (f64::from(x) + 0.5 - cx).hypot(f64::from(y) + 0.5 - cy);
            if d <= r {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }

    fn square(size: u32, lo: u32, hi: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            if (lo..hi).contains(&x) && (lo..hi).contains(&y) {
                Rgba([200, 30, 30, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        })
    }

    #[test]
    fn detects_single_circle() {
        let out = run(disk(120, 60.0, 60.0, 40.0), &DetectorParams::default());
        assert_eq!(out.elements.len(), 1);
        let e = &out.elements[0];
        let ElementGeometry::Primitive(p) = e.geometry() else {
            unreachable!("expected primitive");
        };
        let PrimitiveShape::Circle { center, radius } = p.shape else {
            unreachable!("expected circle, got {:?}", p.shape);
        };
        assert!(center.distance(Point::new(60.0, 60.0)) < 1.5, "{center:?}");
        assert!((radius - 40.0).abs() < 1.5, "{radius}");
        assert!(e.confidence() > 0.9, "{}", e.confidence());
        assert_eq!(p.fill, Color::BLACK);
    }

    #[test]
    fn detects_axis_aligned_square_as_rectangle() {
        let out = run(square(80, 20, 60), &DetectorParams::default());
        assert_eq!(out.elements.len(), 1);
        let ElementGeometry::Primitive(p) = out.elements[0].geometry() else {
            unreachable!("expected primitive");
        };
        let PrimitiveShape::Rectangle {
            center,
            width,
            height,
            angle,
        } = p.shape
        else {
            unreachable!("expected rectangle, got {:?}", p.shape);
        };
        assert!(center.distance(Point::new(40.0, 40.0)) < 1.0);
        assert!((width - 40.0).abs() < 1.5 && (height - 40.0).abs() < 1.5);
        assert!(angle.abs() < 0.05);
        assert_eq!(p.fill, Color::rgba(200, 30, 30, 255));
    }

    #[test]
    fn detects_triangle_as_polygon() {
        let img = RgbaImage::from_fn(100, 100, |x, y| {
            // Right triangle with legs along x = 20 and y = 80.
            let (fx, fy) = (f64::from(x) + 0.5, f64::from(y) + 0.5);
            if fx >= 20.0 && fy <= 80.0 && fy >= fx {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let out = run(img, &DetectorParams::default());
        assert_eq!(out.elements.len(), 1);
        let e = &out.elements[0];
        assert_eq!(e.primitive_kind(), Some(crate::element::PrimitiveKind::Polygon));
        assert!(e.confidence() > 0.9, "{}", e.confidence());
        let ElementGeometry::Primitive(p) = e.geometry() else {
            unreachable!("expected primitive");
        };
        let PrimitiveShape::Polygon { vertices } = &p.shape else {
            unreachable!("expected polygon, got {:?}", p.shape);
        };
        for corner in [Point::new(20.0, 20.0), Point::new(80.0, 80.0), Point::new(20.0, 80.0)] {
            let nearest = vertices
                .iter()
                .map(|v| v.distance(corner))
                .fold(f64::INFINITY, f64::min);
            assert!(nearest < 1.5, "{corner:?} not matched by {vertices:?}");
        }
    }

    #[test]
    fn isosceles_triangle_is_confident_polygon() {
        // Apex (50, 15), base along y = 85 from x = 15 to x = 85.
        let img = RgbaImage::from_fn(100, 100, |x, y| {
            let (fx, fy) = (f64::from(x) + 0.5, f64::from(y) + 0.5);
            let half = (fy - 15.0) / 70.0 * 35.0;
            if (15.0..=85.0).contains(&fy) && (fx - 50.0).abs() <= half {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let out = run(img, &DetectorParams::default());
        assert_eq!(out.elements.len(), 1);
        let e = &out.elements[0];
        assert_eq!(e.primitive_kind(), Some(crate::element::PrimitiveKind::Polygon));
        assert!(e.confidence() > 0.9, "{}", e.confidence());
    }

    #[test]
    fn fitted_sides_follow_band_center() {
        // Two-pixel band around the square (10, 10)-(30, 30), with corners
        // taken one pixel off the true outline.
        let pixels: Vec<Point> = (0..40)
            .flat_map(|i| {
                let t = f64::from(i) / 2.0 + 10.0;
                [
                    Point::new(t, 9.5),
                    Point::new(t, 10.5),
                    Point::new(30.5, t),
                    Point::new(29.5, t),
                    Point::new(t, 30.5),
                    Point::new(t, 29.5),
                    Point::new(9.5, t),
                    Point::new(10.5, t),
                ]
            })
            .collect();
        let corners = [
            Point::new(9.0, 11.0),
            Point::new(31.0, 9.0),
            Point::new(31.0, 31.0),
            Point::new(9.0, 30.0),
        ];
        let fitted = fit_sides(&corners, pixels.into_iter(), 3.0).unwrap();
        let expected = [
            Point::new(10.0, 10.0),
            Point::new(30.0, 10.0),
            Point::new(30.0, 30.0),
            Point::new(10.0, 30.0),
        ];
        for (got, want) in fitted.iter().zip(expected) {
            assert!(got.distance(want) < 1e-6, "{got:?} vs {want:?}");
        }
    }

    #[test]
    fn unsupported_side_falls_back() {
        let corners = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 10.0),
        ];
        let pixels = vec![Point::new(5.0, 0.0), Point::new(6.0, 0.0)];
        assert!(fit_sides(&corners, pixels.into_iter(), 1.0).is_none());
    }

    #[test]
    fn uniform_image_yields_canvas_rectangle() {
        let out = run(
            RgbaImage::from_pixel(30, 20, Rgba([9, 9, 9, 255])),
            &DetectorParams::default(),
        );
        assert_eq!(out.elements.len(), 1);
        let e = &out.elements[0];
        assert!((e.confidence() - 1.0).abs() < f64::EPSILON);
        assert_eq!(*e.bounds(), BoundingBox::canvas(Dimensions { width: 30, height: 20 }));
    }

    #[test]
    fn edgeless_ramp_yields_canvas_rectangle() {
        let ramp = RgbaImage::from_fn(100, 100, |x, _| {
            let v = u8::try_from(100 + x * 40 / 99).unwrap();
            Rgba([v, v, v, 255])
        });
        let source = SourceImage::from_rgba(ramp.clone()).unwrap();
        let content = analyze(&source, &AnalyzerConfig::default());
        assert!(!content.stats.uniform);
        assert!(content.stats.edge_density.abs() < f64::EPSILON);

        let out = run(ramp, &DetectorParams::default());
        assert_eq!(out.elements.len(), 1);
        let e = &out.elements[0];
        assert_eq!(*e.bounds(), BoundingBox::canvas(Dimensions { width: 100, height: 100 }));
        let ElementGeometry::Primitive(p) = e.geometry() else {
            unreachable!("expected primitive");
        };
        assert!((115..=125).contains(&p.fill.r), "{:?}", p.fill);
    }

    #[test]
    fn near_identical_tones_yield_canvas_rectangle() {
        let img = RgbaImage::from_fn(60, 40, |x, _| {
            if x < 30 {
                Rgba([127, 127, 127, 255])
            } else {
                Rgba([128, 128, 128, 255])
            }
        });
        let out = run(img, &DetectorParams::default());
        assert_eq!(out.elements.len(), 1);
        assert_eq!(
            out.elements[0].primitive_kind(),
            Some(crate::element::PrimitiveKind::Rectangle)
        );
    }

    #[test]
    fn raising_threshold_never_adds_primitives() {
        let img = RgbaImage::from_fn(160, 100, |x, y| {
            let d = (f64::from(x) + 0.5 - 40.0).hypot(f64::from(y) + 0.5 - 50.0);
            let in_square = (90..140).contains(&x) && (25..75).contains(&y);
            if d <= 25.0 || in_square {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let mut previous = usize::MAX;
        for threshold in [0.0, 0.3, 0.5, 0.7, 0.9, 0.99, 1.0] {
            let params = DetectorParams {
                confidence_threshold: threshold,
                ..DetectorParams::default()
            };
            let count = run(img.clone(), &params).elements.len();
            assert!(count <= previous, "threshold {threshold}: {count} > {previous}");
            previous = count;
        }
    }

    #[test]
    fn merge_prefers_simpler_kind_within_margin() {
        let bounds = BoundingBox::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        let polygon = Candidate {
            shape: PrimitiveShape::Polygon {
                vertices: vec![
                    Point::new(0.0, 0.0),
                    Point::new(10.0, 0.0),
                    Point::new(10.0, 10.0),
                    Point::new(0.0, 10.0),
                ],
            },
            confidence: 0.95,
            bounds,
            chain: 0,
        };
        let rect = Candidate {
            shape: PrimitiveShape::Rectangle {
                center: Point::new(5.0, 5.0),
                width: 10.0,
                height: 10.0,
                angle: 0.0,
            },
            confidence: 0.92,
            bounds,
            chain: 0,
        };
        let kept = merge(vec![polygon.clone(), rect], &DetectorParams::default());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].shape.kind(), crate::element::PrimitiveKind::Rectangle);

        let far_rect = Candidate {
            confidence: 0.5,
            ..kept[0].clone()
        };
        let kept = merge(vec![polygon, far_rect], &DetectorParams::default());
        assert_eq!(kept[0].shape.kind(), crate::element::PrimitiveKind::Polygon);
    }

    #[test]
    fn kasa_recovers_exact_circle() {
        let points: Vec<Point> = (0..36)
            .map(|k| {
                let t = f64::from(k) * TAU / 36.0;
                Point::new(12.0f64.mul_add(t.cos(), 30.0), 12.0f64.mul_add(t.sin(), -7.0))
            })
            .collect();
        let center = kasa_center(&points).unwrap();
        assert!(center.distance(Point::new(30.0, -7.0)) < 1e-6);
    }

    #[test]
    fn inset_square_moves_edges_inward() {
        let square = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        let inset = inset_polygon(&square, 1.0);
        assert!(inset[0].distance(Point::new(1.0, 1.0)) < 1e-9);
        assert!(inset[2].distance(Point::new(9.0, 9.0)) < 1e-9);
        // Orientation does not matter.
        let reversed: Vec<Point> = square.iter().rev().copied().collect();
        let inset = inset_polygon(&reversed, 1.0);
        assert!(inset[0].distance(Point::new(1.0, 9.0)) < 1e-9);
    }

    #[test]
    fn right_angles_score_one() {
        let square = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!((right_angle_score(&square) - 1.0).abs() < 1e-12);
        let skewed = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(15.0, 10.0),
            Point::new(5.0, 10.0),
        ];
        assert!(right_angle_score(&skewed) < 0.95);
    }

    #[test]
    fn quantile_nearest_rank() {
        let mut v = vec![5.0, 1.0, 3.0, 2.0, 4.0];
        assert!((quantile(&mut v, 0.5) - 3.0).abs() < f64::EPSILON);
        assert!((quantile(&mut v, 1.0) - 5.0).abs() < f64::EPSILON);
        assert!(quantile(&mut [], 0.5).abs() < f64::EPSILON);
    }
}

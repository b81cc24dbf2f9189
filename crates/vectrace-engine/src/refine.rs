//! Selective refinement by finite-difference gradient descent.
//!
//! The largest elements expose their parameters (circle center and
//! radius, rectangle center, size and angle, polygon vertices, path
//! translation). Each iteration estimates the gradient of the mean
//! absolute render error per element with central differences and takes
//! a normalized step with backtracking. The refined set is committed
//! only when the total error went down; otherwise the input comes back
//! unchanged.

use image::RgbImage;

use crate::budget::Deadline;
use crate::config::RefinerConfig;
use crate::element::{ElementGeometry, PathElement, Primitive, PrimitiveShape, VectorElement};
use crate::quality::mean_abs_error;
use crate::render::{render, resample_source, scaled_dimensions, working_scale};
use crate::source::SourceImage;
use crate::types::{Color, Dimensions, Point, StrategyError};

/// Angle parameters move in steps of this many radians per unit.
const ANGLE_UNIT: f64 = 0.05;

/// Backtracking halvings tried before giving up on a step.
const MAX_HALVINGS: u32 = 4;

/// Smallest radius or side length a refined primitive may take.
const MIN_EXTENT: f64 = 0.5;

/// Outcome of one refinement pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Refinement {
    /// Refined elements, or the input unchanged when nothing improved.
    pub elements: Vec<VectorElement>,
    /// Mean absolute error (`0..=255`) of the input.
    pub error_before: f64,
    /// Mean absolute error of `elements`.
    pub error_after: f64,
    pub improved: bool,
    /// The deadline stopped the pass early.
    pub timed_out: bool,
}

/// Refine `elements` against `source`.
///
/// # Errors
///
/// Returns [`StrategyError::Timeout`] when the deadline expires before
/// any improvement was found; callers keep their input in that case.
pub fn refine(
    source: &SourceImage,
    elements: &[VectorElement],
    background: Option<Color>,
    config: &RefinerConfig,
    deadline: Deadline,
) -> Result<Refinement, StrategyError> {
    let canvas = source.dimensions();
    let scale = working_scale(canvas, config.working_resolution);
    let target = Target {
        reference: resample_source(source, scaled_dimensions(canvas, scale)),
        background,
        canvas,
        scale,
    };

    let mut geometries: Vec<ElementGeometry> =
        elements.iter().map(|e| e.geometry().clone()).collect();
    let error_before = target.error(&geometries);
    let mut error = error_before;
    let selected = largest(elements, config.max_elements);

    // Half a working pixel, expressed in source pixels.
    let nudge = 0.5 / scale;
    let mut timed_out = false;
    'outer: for iteration in 0..config.iterations {
        let mut moved = false;
        for &index in &selected {
            if deadline.expired() {
                timed_out = true;
                break 'outer;
            }
            let original = &elements[index];
            let Some(step) = descend(&target, &mut geometries, index, original, nudge, config)
            else {
                continue;
            };
            error = step;
            moved = true;
        }
        tracing::trace!(iteration, error, "refinement iteration");
        if !moved {
            break;
        }
    }

    let improved = error < error_before;
    if !improved {
        if timed_out {
            return Err(StrategyError::Timeout {
                strategy: "refinement",
                slice: config.time_slice,
            });
        }
        return Ok(Refinement {
            elements: elements.to_vec(),
            error_before,
            error_after: error_before,
            improved: false,
            timed_out,
        });
    }

    let refined = elements
        .iter()
        .zip(geometries)
        .map(|(element, geometry)| {
            if *element.geometry() == geometry {
                element.clone()
            } else {
                element
                    .with_geometry(geometry, canvas)
                    .unwrap_or_else(|| element.clone())
            }
        })
        .collect();
    tracing::debug!(error_before, error_after = error, timed_out, "refinement committed");
    Ok(Refinement {
        elements: refined,
        error_before,
        error_after: error,
        improved: true,
        timed_out,
    })
}

/// Reference raster and how to draw candidates for comparison.
struct Target {
    reference: RgbImage,
    background: Option<Color>,
    canvas: Dimensions,
    scale: f64,
}

impl Target {
    fn error(&self, geometries: &[ElementGeometry]) -> f64 {
        let rendered = render(geometries, self.background, self.canvas, self.scale);
        mean_abs_error(&self.reference, &rendered)
    }

    /// Error with element `index` replaced by `candidate`.
    fn error_with(
        &self,
        geometries: &mut [ElementGeometry],
        index: usize,
        candidate: ElementGeometry,
    ) -> f64 {
        let previous = std::mem::replace(&mut geometries[index], candidate);
        let error = self.error(geometries);
        geometries[index] = previous;
        error
    }
}

/// One gradient step on element `index`. Returns the new total error
/// when the step was accepted.
fn descend(
    target: &Target,
    geometries: &mut [ElementGeometry],
    index: usize,
    original: &VectorElement,
    nudge: f64,
    config: &RefinerConfig,
) -> Option<f64> {
    let current = geometries[index].clone();
    let (values, units) = parameters(&current, original.geometry())?;
    let base_error = target.error(geometries);

    let mut gradient = vec![0.0; values.len()];
    for k in 0..values.len() {
        let h = nudge * units[k];
        let mut plus = values.clone();
        plus[k] += h;
        let mut minus = values.clone();
        minus[k] -= h;
        let (Some(gp), Some(gm)) = (
            with_parameters(&current, original.geometry(), &plus),
            with_parameters(&current, original.geometry(), &minus),
        ) else {
            continue;
        };
        let ep = target.error_with(geometries, index, gp);
        let em = target.error_with(geometries, index, gm);
        // Gradient in parameter units.
        gradient[k] = (ep - em) / (2.0 * nudge);
    }
    let norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
    if norm <= f64::EPSILON {
        return None;
    }

    let mut step = config.initial_step;
    for _ in 0..=MAX_HALVINGS {
        let moved: Vec<f64> = values
            .iter()
            .zip(&gradient)
            .zip(&units)
            .map(|((v, g), u)| v - step * g / norm * u)
            .collect();
        if let Some(candidate) = with_parameters(&current, original.geometry(), &moved) {
            let error = target.error_with(geometries, index, candidate.clone());
            if error < base_error {
                geometries[index] = candidate;
                return Some(error);
            }
        }
        step /= 2.0;
    }
    None
}

/// Indices of the `limit` elements with the largest boxes.
fn largest(elements: &[VectorElement], limit: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..elements.len()).collect();
    order.sort_by(|&a, &b| {
        elements[b]
            .bounds()
            .area()
            .total_cmp(&elements[a].bounds().area())
            .then(a.cmp(&b))
    });
    order.truncate(limit);
    order
}

/// Parameter vector of `current` and the size of one unit per entry.
///
/// Paths are parameterized by their translation from `original`.
fn parameters(current: &ElementGeometry, original: &ElementGeometry) -> Option<(Vec<f64>, Vec<f64>)> {
    match current {
        ElementGeometry::Primitive(p) => Some(match &p.shape {
            PrimitiveShape::Circle { center, radius } => {
                (vec![center.x, center.y, *radius], vec![1.0; 3])
            }
            PrimitiveShape::Rectangle {
                center,
                width,
                height,
                angle,
            } => (
                vec![center.x, center.y, *width, *height, *angle],
                vec![1.0, 1.0, 1.0, 1.0, ANGLE_UNIT],
            ),
            PrimitiveShape::Polygon { vertices } => (
                vertices.iter().flat_map(|v| [v.x, v.y]).collect(),
                vec![1.0; vertices.len() * 2],
            ),
        }),
        ElementGeometry::Path(path) => {
            let ElementGeometry::Path(base) = original else {
                return None;
            };
            let (dx, dy) = path_offset(base, path)?;
            Some((vec![dx, dy], vec![1.0, 1.0]))
        }
    }
}

/// Geometry of the same shape as `current` with `values` applied.
fn with_parameters(
    current: &ElementGeometry,
    original: &ElementGeometry,
    values: &[f64],
) -> Option<ElementGeometry> {
    match current {
        ElementGeometry::Primitive(p) => {
            let shape = match (&p.shape, values) {
                (PrimitiveShape::Circle { .. }, &[cx, cy, r]) => PrimitiveShape::Circle {
                    center: Point::new(cx, cy),
                    radius: r.max(MIN_EXTENT),
                },
                (PrimitiveShape::Rectangle { .. }, &[cx, cy, w, h, angle]) => {
                    PrimitiveShape::Rectangle {
                        center: Point::new(cx, cy),
                        width: w.max(MIN_EXTENT),
                        height: h.max(MIN_EXTENT),
                        angle,
                    }
                }
                (PrimitiveShape::Polygon { vertices }, flat) if flat.len() == vertices.len() * 2 => {
                    PrimitiveShape::Polygon {
                        vertices: flat.chunks_exact(2).map(|c| Point::new(c[0], c[1])).collect(),
                    }
                }
                _ => return None,
            };
            Some(ElementGeometry::Primitive(Primitive {
                shape,
                fill: p.fill,
            }))
        }
        ElementGeometry::Path(_) => {
            let (ElementGeometry::Path(base), &[dx, dy]) = (original, values) else {
                return None;
            };
            Some(ElementGeometry::Path(PathElement {
                subpaths: base.subpaths.iter().map(|s| s.translated(dx, dy)).collect(),
                style: base.style,
            }))
        }
    }
}

/// Translation between two copies of the same path.
fn path_offset(base: &PathElement, moved: &PathElement) -> Option<(f64, f64)> {
    let a = base.subpaths.first()?.start;
    let b = moved.subpaths.first()?.start;
    Some((b.x - a.x, b.y - a.y))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::element::{PathStyle, Provenance, StrategyKind, Subpath};

    fn disk_source() -> SourceImage {
        SourceImage::from_rgba(RgbaImage::from_fn(64, 64, |x, y| {
            let d = (f64::from(x) + 0.5 - 32.0).hypot(f64::from(y) + 0.5 - 32.0);
            if d <= 15.0 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        }))
        .unwrap()
    }

    fn element(shape: PrimitiveShape) -> VectorElement {
        VectorElement::new(
            ElementGeometry::Primitive(Primitive {
                shape,
                fill: Color::BLACK,
            }),
            0.8,
            Provenance::new(StrategyKind::PrimitiveDetection, 0),
            Dimensions {
                width: 64,
                height: 64,
            },
        )
        .unwrap()
    }

    #[test]
    fn misplaced_circle_moves_toward_the_disk() {
        let source = disk_source();
        let start = element(PrimitiveShape::Circle {
            center: Point::new(36.0, 32.0),
            radius: 15.0,
        });
        let out = refine(
            &source,
            &[start],
            None,
            &RefinerConfig::default(),
            Deadline::none(),
        )
        .unwrap();
        assert!(out.improved);
        assert!(out.error_after < out.error_before);
        let ElementGeometry::Primitive(p) = out.elements[0].geometry() else {
            unreachable!("refinement keeps the element kind");
        };
        let PrimitiveShape::Circle { center, .. } = p.shape else {
            unreachable!("refinement keeps the primitive kind");
        };
        assert!(center.distance(Point::new(32.0, 32.0)) < 4.0);
        assert!(out.elements[0].provenance().refined);
    }

    #[test]
    fn perfect_fit_is_returned_unchanged() {
        let source = SourceImage::from_rgba(RgbaImage::from_fn(32, 32, |x, y| {
            if (8..24).contains(&x) && (8..24).contains(&y) {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        }))
        .unwrap();
        let exact = element(PrimitiveShape::Rectangle {
            center: Point::new(16.0, 16.0),
            width: 16.0,
            height: 16.0,
            angle: 0.0,
        });
        let out = refine(
            &source,
            std::slice::from_ref(&exact),
            None,
            &RefinerConfig::default(),
            Deadline::none(),
        )
        .unwrap();
        assert!(!out.improved);
        assert_eq!(out.elements, vec![exact]);
        assert!(out.error_before < 0.01);
    }

    #[test]
    fn expired_deadline_without_progress_times_out() {
        let source = disk_source();
        let start = element(PrimitiveShape::Circle {
            center: Point::new(36.0, 32.0),
            radius: 15.0,
        });
        let result = refine(
            &source,
            &[start],
            None,
            &RefinerConfig::default(),
            Deadline::after(Duration::ZERO),
        );
        assert!(matches!(result, Err(StrategyError::Timeout { .. })));
    }

    #[test]
    fn path_parameters_are_a_translation() {
        let sub = Subpath::from_points(
            &[
                Point::new(1.0, 1.0),
                Point::new(5.0, 1.0),
                Point::new(5.0, 5.0),
            ],
            true,
        )
        .unwrap();
        let base = ElementGeometry::Path(PathElement {
            subpaths: vec![sub],
            style: PathStyle::filled(Color::BLACK),
        });
        let (values, _) = parameters(&base, &base).unwrap();
        assert_eq!(values, vec![0.0, 0.0]);
        let moved = with_parameters(&base, &base, &[2.0, -1.0]).unwrap();
        let (values, _) = parameters(&moved, &base).unwrap();
        assert_eq!(values, vec![2.0, -1.0]);
    }

    #[test]
    fn largest_respects_limit_and_order() {
        let small = element(PrimitiveShape::Circle {
            center: Point::new(10.0, 10.0),
            radius: 2.0,
        });
        let big = element(PrimitiveShape::Circle {
            center: Point::new(30.0, 30.0),
            radius: 10.0,
        });
        assert_eq!(largest(&[small.clone(), big.clone()], 1), vec![1]);
        assert_eq!(largest(&[small, big], 5), vec![1, 0]);
    }
}

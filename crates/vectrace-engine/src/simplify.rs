//! Path simplification using the Ramer-Douglas-Peucker algorithm.
//!
//! Reduces point count in closed rings by removing points that are
//! within a given tolerance of the line between their neighbors. Both
//! the tracer (contour paths) and the primitive detector (corner
//! finding) build on it.

use crate::types::Point;

/// Simplified ring plus how far the dropped points were from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Simplified {
    pub points: Vec<Point>,
    /// Mean distance from every input point to the simplified outline.
    pub mean_residual: f64,
    /// Largest such distance.
    pub max_residual: f64,
}

/// Simplify a closed ring (first point not repeated at the end).
///
/// The ring is split at the point farthest from the start so both
/// halves are simplified as open runs; both split points are kept.
#[must_use = "returns the simplified ring"]
pub fn simplify_closed(ring: &[Point], tolerance: f64) -> Simplified {
    if ring.len() < 4 {
        return Simplified {
            points: ring.to_vec(),
            mean_residual: 0.0,
            max_residual: 0.0,
        };
    }
    let start = ring[0];
    let far = ring
        .iter()
        .enumerate()
        .skip(1)
        .fold((1, 0.0), |(best, best_d), (i, p)| {
            let d = p.distance_squared(start);
            if d > best_d { (i, d) } else { (best, best_d) }
        })
        .0;

    // Close the ring so the second half ends back at the start.
    let mut closed = ring.to_vec();
    closed.push(start);
    let mut kept = vec![false; closed.len()];
    kept[0] = true;
    kept[far] = true;
    kept[closed.len() - 1] = true;
    rdp_recurse(&closed, 0, far, tolerance, &mut kept);
    rdp_recurse(&closed, far, closed.len() - 1, tolerance, &mut kept);
    collect(&closed, &kept)
}

/// Gather kept points and residuals of the dropped ones.
///
/// The final point (a repeat of the first) is left out of the output
/// but still used to measure residuals.
fn collect(points: &[Point], kept: &[bool]) -> Simplified {
    let anchors: Vec<usize> = (0..points.len()).filter(|&i| kept[i]).collect();
    let mut total = 0.0;
    let mut max_residual = 0.0_f64;
    for pair in anchors.windows(2) {
        let (a, b) = (points[pair[0]], points[pair[1]]);
        for &p in &points[pair[0] + 1..pair[1]] {
            let d = segment_distance(p, a, b);
            total += d;
            max_residual = max_residual.max(d);
        }
    }
    let end = anchors.len().saturating_sub(1);
    #[allow(clippy::cast_precision_loss)]
    let mean_residual = total / points.len() as f64;
    Simplified {
        points: anchors[..end].iter().map(|&i| points[i]).collect(),
        mean_residual,
        max_residual,
    }
}

/// Recursive step of the Ramer-Douglas-Peucker algorithm.
///
/// Finds the point between `start` and `end` that is farthest from the
/// line segment between them. If that distance exceeds `tolerance`, the
/// point is kept and both sub-segments are processed recursively.
fn rdp_recurse(points: &[Point], start: usize, end: usize, tolerance: f64, kept: &mut [bool]) {
    if end <= start + 1 {
        return;
    }

    let mut max_dist = 0.0;
    let mut max_idx = start;

    for i in (start + 1)..end {
        let d = perpendicular_distance(points[i], points[start], points[end]);
        if d > max_dist {
            max_dist = d;
            max_idx = i;
        }
    }

    if max_dist > tolerance {
        kept[max_idx] = true;
        rdp_recurse(points, start, max_idx, tolerance, kept);
        rdp_recurse(points, max_idx, end, tolerance, kept);
    }
}

/// Perpendicular distance from point `p` to the line defined by `a` and `b`.
///
/// When `a` and `b` coincide, returns the distance from `p` to `a`.
pub(crate) fn perpendicular_distance(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length_sq = dx.mul_add(dx, dy * dy);

    if length_sq == 0.0 {
        return p.distance(a);
    }

    let cross = dx.mul_add(a.y - p.y, -(dy * (a.x - p.x)));
    cross.abs() / length_sq.sqrt()
}

/// Distance from `p` to the closed segment `a`-`b`.
pub(crate) fn segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length_sq = dx.mul_add(dx, dy * dy);
    if length_sq == 0.0 {
        return p.distance(a);
    }
    let t = ((p.x - a.x).mul_add(dx, (p.y - a.y) * dy) / length_sq).clamp(0.0, 1.0);
    p.distance(Point::new(t.mul_add(dx, a.x), t.mul_add(dy, a.y)))
}

/// Shoelace area of a closed ring; positive when the vertices turn
/// counter-clockwise in a y-up frame.
pub(crate) fn signed_area(vertices: &[Point]) -> f64 {
    let n = vertices.len();
    (0..n)
        .map(|i| {
            let (a, b) = (vertices[i], vertices[(i + 1) % n]);
            a.x.mul_add(b.y, -(b.x * a.y))
        })
        .sum::<f64>()
        / 2.0
}

/// Distance from `p` to the nearest edge of a closed polygon.
pub(crate) fn ring_distance(p: Point, ring: &[Point]) -> f64 {
    ring.iter()
        .zip(ring.iter().cycle().skip(1))
        .map(|(&a, &b)| segment_distance(p, a, b))
        .fold(f64::INFINITY, f64::min)
}

/// Direction change at `cur`, in radians (`0` = straight on, `PI` =
/// full reversal).
#[must_use]
pub fn turning_angle(prev: Point, cur: Point, next: Point) -> f64 {
    let (ax, ay) = (cur.x - prev.x, cur.y - prev.y);
    let (bx, by) = (next.x - cur.x, next.y - cur.y);
    let cross = ax.mul_add(by, -(ay * bx));
    let dot = ax.mul_add(bx, ay * by);
    cross.atan2(dot).abs()
}

/// Remove ring vertices that turn by less than `min_turn` radians.
///
/// Rings that would drop below three vertices are returned unchanged.
#[must_use]
pub fn drop_collinear(ring: &[Point], min_turn: f64) -> Vec<Point> {
    let mut out = ring.to_vec();
    loop {
        let n = out.len();
        if n <= 3 {
            return out;
        }
        let flattest = (0..n)
            .map(|i| (i, turning_angle(out[(i + n - 1) % n], out[i], out[(i + 1) % n])))
            .filter(|&(_, angle)| angle < min_turn)
            .min_by(|a, b| a.1.total_cmp(&b.1));
        match flattest {
            Some((i, _)) => {
                out.remove(i);
            }
            None => return out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Square ring traced with one point per unit along each side.
    fn square_ring(side: i32) -> Vec<Point> {
        let mut ring = Vec::new();
        for i in 0..side {
            ring.push(Point::new(f64::from(i), 0.0));
        }
        for i in 0..side {
            ring.push(Point::new(f64::from(side), f64::from(i)));
        }
        for i in 0..side {
            ring.push(Point::new(f64::from(side - i), f64::from(side)));
        }
        for i in 0..side {
            ring.push(Point::new(0.0, f64::from(side - i)));
        }
        ring
    }

    #[test]
    fn closed_square_keeps_four_corners() {
        let result = simplify_closed(&square_ring(10), 0.5);
        assert_eq!(result.points.len(), 4);
        assert!(result.points.contains(&Point::new(0.0, 0.0)));
        assert!(result.points.contains(&Point::new(10.0, 10.0)));
        assert!(result.mean_residual.abs() < 1e-12);
    }

    #[test]
    fn residuals_measure_dropped_points() {
        let mut ring = square_ring(10);
        ring[5] = Point::new(5.0, -0.5);
        let result = simplify_closed(&ring, 1.0);
        assert_eq!(result.points.len(), 4);
        assert!(!result.points.contains(&Point::new(5.0, -0.5)));
        assert!((result.max_residual - 0.5).abs() < 1e-12);
        assert!((result.mean_residual - 0.5 / 41.0).abs() < 1e-12);
    }

    #[test]
    fn turning_angle_of_right_corner() {
        let angle = turning_angle(
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
        );
        assert!((angle - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        let straight = turning_angle(
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(2.0, 0.0),
        );
        assert!(straight.abs() < 1e-12);
    }

    #[test]
    fn drop_collinear_removes_mid_edge_vertex() {
        let ring = vec![
            Point::new(5.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
            Point::new(0.0, 0.0),
        ];
        let cleaned = drop_collinear(&ring, 0.2);
        assert_eq!(cleaned.len(), 4);
        assert!(!cleaned.contains(&Point::new(5.0, 0.0)));
    }

    #[test]
    fn signed_area_follows_orientation() {
        let square = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!((signed_area(&square) - 100.0).abs() < 1e-9);
        let reversed: Vec<Point> = square.iter().rev().copied().collect();
        assert!((signed_area(&reversed) + 100.0).abs() < 1e-9);
        assert!(signed_area(&square[..2]).abs() < f64::EPSILON);
    }

    #[test]
    fn ring_distance_to_nearest_edge() {
        let ring = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!((ring_distance(Point::new(5.0, 2.0), &ring) - 2.0).abs() < 1e-12);
        assert!((ring_distance(Point::new(12.0, 5.0), &ring) - 2.0).abs() < 1e-12);
    }
}

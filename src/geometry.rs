//!
//! # Oas21 Geometry Helpers
//!
//! [Vec2] plus the small set of geometry routines the format layer leans on:
//! circle/ellipse tessellation for OASIS `CIRCLE` records, path-to-polygon
//! tessellation for paths that cannot be emitted as native path records,
//! and polygon fracturing against the GDSII `XY` point limit.
//!

use std::ops::{Mul, Neg};

use derive_more::{Add, AddAssign, Sub, SubAssign};
use serde::{Deserialize, Serialize};

use crate::data::{EndType, PathElement, Polygon};

/// # Spatial Point / Vector
/// Coordinate in (x, y) layout-space, denoted in the owning [Library](crate::Library)'s
/// user units.
#[derive(
    Add, AddAssign, Sub, SubAssign, Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize,
)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}
impl Vec2 {
    /// Create a new [Vec2]
    pub fn new(x: f64, y: f64) -> Self {
        Vec2 { x, y }
    }
    /// The origin
    pub fn zero() -> Self {
        Vec2 { x: 0.0, y: 0.0 }
    }
    /// Euclidean length
    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
    /// Counter-clockwise perpendicular
    pub fn ortho(&self) -> Self {
        Vec2 {
            x: -self.y,
            y: self.x,
        }
    }
    /// Cross-product z-component
    pub fn cross(&self, other: Vec2) -> f64 {
        self.x * other.y - self.y * other.x
    }
}
impl Mul<f64> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f64) -> Vec2 {
        Vec2 {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}
impl Neg for Vec2 {
    type Output = Vec2;
    fn neg(self) -> Vec2 {
        Vec2 {
            x: -self.x,
            y: -self.y,
        }
    }
}

/// Number of segments needed to approximate an arc of `angle` radians at
/// `radius` within `tolerance`, never fewer than three.
fn arc_num_points(angle: f64, radius: f64, tolerance: f64) -> usize {
    // Sagitta of a chord subtending 2θ is r (1 - cos θ)
    let tolerance = tolerance.min(radius);
    let theta = (1.0 - tolerance / radius).acos();
    let count = if theta > 0.0 {
        (angle.abs() / (2.0 * theta)).ceil() as usize
    } else {
        3
    };
    count.max(3)
}

/// Tessellate a full or partial (and optionally annular) ellipse into a [Polygon].
///
/// With equal angles the whole perimeter is produced; otherwise the slice from
/// `initial_angle` to `final_angle`. A positive inner radius produces a ring
/// section; a partial non-annular slice closes through the center.
#[allow(clippy::too_many_arguments)]
pub fn ellipse(
    center: Vec2,
    radius_x: f64,
    radius_y: f64,
    inner_radius_x: f64,
    inner_radius_y: f64,
    initial_angle: f64,
    final_angle: f64,
    tolerance: f64,
    layer: u32,
    datatype: u32,
) -> Polygon {
    use std::f64::consts::TAU;
    let full = initial_angle == final_angle;
    let (a0, a1) = if full {
        (0.0, TAU)
    } else {
        (initial_angle, final_angle)
    };
    let span = a1 - a0;
    let num = arc_num_points(span, radius_x.max(radius_y), tolerance);
    let mut points = Vec::with_capacity(num + 2);
    // Full perimeters skip the repeated seam vertex
    let last = if full { num - 1 } else { num };
    for i in 0..=last {
        let angle = a0 + span * i as f64 / num as f64;
        points.push(center + Vec2::new(radius_x * angle.cos(), radius_y * angle.sin()));
    }
    if inner_radius_x > 0.0 && inner_radius_y > 0.0 {
        let num = arc_num_points(span, inner_radius_x.max(inner_radius_y), tolerance);
        let last = if full { num - 1 } else { num };
        for i in (0..=last).rev() {
            let angle = a0 + span * i as f64 / num as f64;
            points.push(
                center + Vec2::new(inner_radius_x * angle.cos(), inner_radius_y * angle.sin()),
            );
        }
    } else if !full {
        points.push(center);
    }
    Polygon {
        points,
        layer,
        datatype,
        ..Default::default()
    }
}

/// Intersection parameter of the line `p + t·dp` with the line `q + u·dq`,
/// or `None` when the two are (near-)parallel.
fn line_intersection(p: Vec2, dp: Vec2, q: Vec2, dq: Vec2) -> Option<Vec2> {
    let den = dp.cross(dq);
    if den.abs() < 1e-12 * (dp.length() * dq.length()).max(1e-300) {
        return None;
    }
    let t = (q - p).cross(dq) / den;
    Some(p + dp * t)
}

/// One offset side of a path spine: the spine displaced perpendicular by
/// `offset`, with miter joins (falling back to a bevel at near-parallel joins).
fn offset_polyline(spine: &[Vec2], widths: &[Vec2], side: f64) -> Vec<Vec2> {
    let mut result = Vec::with_capacity(spine.len());
    let num = spine.len();
    for i in 0..num {
        let half_width = widths.get(i).or_else(|| widths.last()).copied();
        let half_width = half_width.unwrap_or_default();
        let shift = side * half_width.x + half_width.y;
        if i == 0 {
            let dir = spine[1] - spine[0];
            let normal = dir.ortho() * (1.0 / dir.length());
            result.push(spine[0] + normal * shift);
        } else if i == num - 1 {
            let dir = spine[num - 1] - spine[num - 2];
            let normal = dir.ortho() * (1.0 / dir.length());
            result.push(spine[num - 1] + normal * shift);
        } else {
            let din = spine[i] - spine[i - 1];
            let dout = spine[i + 1] - spine[i];
            let nin = din.ortho() * (1.0 / din.length());
            let nout = dout.ortho() * (1.0 / dout.length());
            match line_intersection(
                spine[i - 1] + nin * shift,
                din,
                spine[i] + nout * shift,
                dout,
            ) {
                Some(pt) => result.push(pt),
                None => {
                    // Bevel join
                    result.push(spine[i] + nin * shift);
                    result.push(spine[i] + nout * shift);
                }
            }
        }
    }
    result
}

/// Tessellate one [PathElement] of a path spine into a boundary [Polygon].
/// Used for paths whose `gdsii_path` flag is off and therefore have no
/// native record representation.
pub fn path_to_polygon(spine: &[Vec2], element: &PathElement, tolerance: f64) -> Option<Polygon> {
    if spine.len() < 2 {
        return None;
    }
    let widths = &element.half_width_and_offset;
    let mut spine = spine.to_vec();
    let first_hw = widths.first().copied().unwrap_or_default().x;
    let last_hw = widths.last().copied().unwrap_or_default().x;
    // End extensions displace the spine ends along their own directions
    let (ext0, ext1) = match element.end_type {
        EndType::Flush | EndType::Round => (0.0, 0.0),
        EndType::HalfWidth => (first_hw, last_hw),
        EndType::Extended => (element.end_extensions.x, element.end_extensions.y),
    };
    let num = spine.len();
    if ext0 != 0.0 {
        let dir = spine[0] - spine[1];
        spine[0] += dir * (ext0 / dir.length());
    }
    if ext1 != 0.0 {
        let dir = spine[num - 1] - spine[num - 2];
        spine[num - 1] += dir * (ext1 / dir.length());
    }
    let left = offset_polyline(&spine, widths, 1.0);
    let right = offset_polyline(&spine, widths, -1.0);
    let mut points = left;
    if element.end_type == EndType::Round {
        append_round_cap(&mut points, spine[num - 1], spine[num - 1] - spine[num - 2], last_hw, tolerance);
    }
    points.extend(right.into_iter().rev());
    if element.end_type == EndType::Round {
        append_round_cap(&mut points, spine[0], spine[0] - spine[1], first_hw, tolerance);
    }
    Some(Polygon {
        points,
        layer: element.layer,
        datatype: element.datatype,
        ..Default::default()
    })
}

/// Append a semicircular end-cap centered at `center`, bulging along `direction`.
fn append_round_cap(
    points: &mut Vec<Vec2>,
    center: Vec2,
    direction: Vec2,
    radius: f64,
    tolerance: f64,
) {
    use std::f64::consts::PI;
    if radius <= 0.0 {
        return;
    }
    let num = arc_num_points(PI, radius, tolerance.max(radius * 1e-3));
    let start = direction.ortho();
    let a0 = start.y.atan2(start.x);
    // Interior points only; the offset sides already contribute the cap ends
    for i in 1..num {
        let angle = a0 - PI * i as f64 / num as f64;
        points.push(center + Vec2::new(radius * angle.cos(), radius * angle.sin()));
    }
}

/// Clip a polygon against the half-plane `keep_below == true ? coord <= limit : coord >= limit`
/// along `axis` (0 = x, 1 = y). Sutherland-Hodgman, one edge.
fn clip_halfplane(points: &[Vec2], axis: usize, limit: f64, keep_below: bool) -> Vec<Vec2> {
    let coord = |p: &Vec2| if axis == 0 { p.x } else { p.y };
    let inside = |p: &Vec2| {
        if keep_below {
            coord(p) <= limit
        } else {
            coord(p) >= limit
        }
    };
    let mut result = Vec::with_capacity(points.len() + 4);
    for i in 0..points.len() {
        let current = points[i];
        let previous = points[(i + points.len() - 1) % points.len()];
        let cur_in = inside(&current);
        let prev_in = inside(&previous);
        if cur_in != prev_in {
            let t = (limit - coord(&previous)) / (coord(&current) - coord(&previous));
            result.push(previous + (current - previous) * t);
        }
        if cur_in {
            result.push(current);
        }
    }
    // Drop consecutive duplicates the clip can introduce
    result.dedup_by(|a, b| (a.x - b.x).abs() < 1e-12 && (a.y - b.y).abs() < 1e-12);
    result
}

/// Subdivide `points` until every piece has at most `max_points` vertices,
/// bisecting the bounding box along its longer axis.
pub fn fracture(points: &[Vec2], max_points: u64) -> Vec<Vec<Vec2>> {
    if max_points < 5 || points.len() as u64 <= max_points {
        return vec![points.to_vec()];
    }
    let (mut min, mut max) = (points[0], points[0]);
    for p in points.iter() {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    let axis = if max.x - min.x >= max.y - min.y { 0 } else { 1 };
    let limit = if axis == 0 {
        0.5 * (min.x + max.x)
    } else {
        0.5 * (min.y + max.y)
    };
    let mut result = Vec::new();
    for half in [
        clip_halfplane(points, axis, limit, true),
        clip_halfplane(points, axis, limit, false),
    ] {
        if half.len() >= 3 {
            if half.len() == points.len() {
                // Degenerate split; stop rather than recurse forever
                result.push(half);
            } else {
                result.extend(fracture(&half, max_points));
            }
        }
    }
    if result.is_empty() {
        result.push(points.to_vec());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ellipse_vertices_within_tolerance() {
        let poly = ellipse(Vec2::zero(), 10.0, 10.0, 0.0, 0.0, 0.0, 0.0, 0.01, 1, 0);
        // All vertices on the circle, within tolerance
        for pt in poly.points.iter() {
            assert!((pt.length() - 10.0).abs() < 1e-9);
        }
        assert!(poly.points.len() >= 3);
        // Midpoints of each chord stay within tolerance of the circle
        for pair in poly.points.windows(2) {
            let mid = (pair[0] + pair[1]) * 0.5;
            assert!(10.0 - mid.length() <= 0.01 + 1e-9);
        }
    }

    #[test]
    fn straight_path_tessellation() {
        let element = PathElement {
            layer: 2,
            datatype: 3,
            half_width_and_offset: vec![Vec2::new(0.5, 0.0); 2],
            end_type: EndType::Flush,
            end_extensions: Vec2::zero(),
        };
        let spine = [Vec2::zero(), Vec2::new(10.0, 0.0)];
        let poly = path_to_polygon(&spine, &element, 0.01).unwrap();
        assert_eq!(poly.layer, 2);
        assert_eq!(poly.datatype, 3);
        assert_eq!(poly.points.len(), 4);
        let ys: Vec<f64> = poly.points.iter().map(|p| p.y).collect();
        assert!(ys.iter().all(|y| (y.abs() - 0.5).abs() < 1e-12));
    }

    #[test]
    fn fracture_respects_limit() {
        // A 1x1 square subdivided into a many-vertex boundary
        let mut points = Vec::new();
        for i in 0..100 {
            points.push(Vec2::new(i as f64 / 100.0, 0.0));
        }
        for i in 0..100 {
            points.push(Vec2::new(1.0, i as f64 / 100.0));
        }
        for i in 0..100 {
            points.push(Vec2::new(1.0 - i as f64 / 100.0, 1.0));
        }
        for i in 0..100 {
            points.push(Vec2::new(0.0, 1.0 - i as f64 / 100.0));
        }
        let pieces = fracture(&points, 199);
        assert!(pieces.len() > 1);
        for piece in pieces.iter() {
            assert!(piece.len() <= 199);
            assert!(piece.len() >= 3);
        }
    }
}

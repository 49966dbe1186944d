//! Planar polygon queries in a face's local 2D frame.
//!
//! A region is an outer ring (counter-clockwise) plus hole rings
//! (clockwise). Every query takes a distance tolerance so that points on
//! a ring classify as `OnBoundary` instead of flipping between sides.

use serde::{Deserialize, Serialize};

use super::point::Point2d;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Containment {
    Inside,
    Outside,
    OnBoundary,
}

/// Shoelace area, positive for counter-clockwise rings.
pub fn signed_area(ring: &[Point2d]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }
    (0..n)
        .map(|i| {
            let (a, b) = (ring[i], ring[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum::<f64>()
        * 0.5
}

pub fn segment_distance(p: &Point2d, a: &Point2d, b: &Point2d) -> f64 {
    let (ex, ey) = (b.x - a.x, b.y - a.y);
    let len2 = ex * ex + ey * ey;
    if len2 < 1e-300 {
        return p.distance_to(a);
    }
    let s = (((p.x - a.x) * ex + (p.y - a.y) * ey) / len2).clamp(0.0, 1.0);
    p.distance_to(&Point2d::new(a.x + ex * s, a.y + ey * s))
}

fn ring_segments(ring: &[Point2d]) -> impl Iterator<Item = (Point2d, Point2d)> + '_ {
    (0..ring.len()).map(move |i| (ring[i], ring[(i + 1) % ring.len()]))
}

/// Distance from `p` to the nearest ring segment.
pub fn clearance(p: &Point2d, rings: &[Vec<Point2d>]) -> f64 {
    rings
        .iter()
        .flat_map(|r| ring_segments(r))
        .map(|(a, b)| segment_distance(p, &a, &b))
        .fold(f64::INFINITY, f64::min)
}

pub fn point_in_ring(p: &Point2d, ring: &[Point2d], tol: f64) -> Containment {
    if ring.len() < 3 {
        return Containment::Outside;
    }
    if ring_segments(ring).any(|(a, b)| segment_distance(p, &a, &b) <= tol) {
        return Containment::OnBoundary;
    }
    let mut inside = false;
    for (a, b) in ring_segments(ring) {
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
    }
    if inside { Containment::Inside } else { Containment::Outside }
}

/// Containment in `rings[0]` minus the holes `rings[1..]`.
pub fn point_in_region(p: &Point2d, rings: &[Vec<Point2d>], tol: f64) -> Containment {
    let Some((outer, holes)) = rings.split_first() else {
        return Containment::Outside;
    };
    match point_in_ring(p, outer, tol) {
        Containment::Inside => {}
        other => return other,
    }
    for hole in holes {
        match point_in_ring(p, hole, tol) {
            Containment::Outside => {}
            Containment::Inside => return Containment::Outside,
            Containment::OnBoundary => return Containment::OnBoundary,
        }
    }
    Containment::Inside
}

/// Parameter intervals of the line `origin + t * dir` lying inside or on
/// the region. `dir` must be a unit vector.
pub fn clip_line(origin: Point2d, dir: (f64, f64), rings: &[Vec<Point2d>], tol: f64) -> Vec<(f64, f64)> {
    let param = |p: &Point2d| (p.x - origin.x) * dir.0 + (p.y - origin.y) * dir.1;
    let offset = |p: &Point2d| (p.x - origin.x) * dir.1 - (p.y - origin.y) * dir.0;

    let mut ts = Vec::new();
    for ring in rings {
        for (a, b) in ring_segments(ring) {
            if offset(&a).abs() <= tol {
                ts.push(param(&a));
            }
            let (ex, ey) = (b.x - a.x, b.y - a.y);
            let elen = ex.hypot(ey);
            if elen < 1e-300 {
                continue;
            }
            let denom = dir.0 * ey - dir.1 * ex;
            if denom.abs() < 1e-12 * elen {
                continue;
            }
            let (wx, wy) = (a.x - origin.x, a.y - origin.y);
            let t = (wx * ey - wy * ex) / denom;
            let s = (wx * dir.1 - wy * dir.0) / denom;
            let slack = tol / elen;
            if s >= -slack && s <= 1.0 + slack {
                ts.push(t);
            }
        }
    }
    ts.sort_by(f64::total_cmp);
    ts.dedup_by(|b, a| (*b - *a).abs() <= tol);

    let mut intervals: Vec<(f64, f64)> = Vec::new();
    for w in ts.windows(2) {
        let (t0, t1) = (w[0], w[1]);
        let tm = 0.5 * (t0 + t1);
        let mid = Point2d::new(origin.x + dir.0 * tm, origin.y + dir.1 * tm);
        if point_in_region(&mid, rings, tol) == Containment::Outside {
            continue;
        }
        match intervals.last_mut() {
            Some(last) if (last.1 - t0).abs() <= tol => last.1 = t1,
            _ => intervals.push((t0, t1)),
        }
    }
    intervals
}

/// Candidate interior points of the region, best clearance first.
///
/// Candidates come from horizontal scanlines halfway between consecutive
/// vertex ordinates; points closer than `tol` to a ring are dropped.
pub fn interior_samples(rings: &[Vec<Point2d>], tol: f64) -> Vec<Point2d> {
    let mut ys: Vec<f64> = rings.iter().flatten().map(|p| p.y).collect();
    ys.sort_by(f64::total_cmp);
    ys.dedup_by(|b, a| (*b - *a).abs() <= tol);

    let mut candidates: Vec<(f64, Point2d)> = Vec::new();
    for w in ys.windows(2) {
        let y = 0.5 * (w[0] + w[1]);
        let mut xs: Vec<f64> = rings
            .iter()
            .flat_map(|r| ring_segments(r))
            .filter(|(a, b)| (a.y > y) != (b.y > y))
            .map(|(a, b)| a.x + (b.x - a.x) * (y - a.y) / (b.y - a.y))
            .collect();
        xs.sort_by(f64::total_cmp);
        for pair in xs.chunks_exact(2) {
            let p = Point2d::new(0.5 * (pair[0] + pair[1]), y);
            let c = clearance(&p, rings);
            if c > tol && point_in_region(&p, rings, tol) == Containment::Inside {
                candidates.push((c, p));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
    candidates.into_iter().map(|(_, p)| p).collect()
}

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use super::curves::{Curve, Line3d, Ray};
use super::intersection::{self, GeomError, Intersectable, LineLine, LinePlane, PlanePlane};
use super::point::Point3d;
use super::surfaces::Surface;
use super::Evaluable;

/// Closest point of a bounded curve to a query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub t: f64,
    pub point: Point3d,
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CurveCurveHit {
    Point { point: Point3d, t1: f64, t2: f64 },
    /// Coincident stretch, as parameter ranges on both curves.
    Overlap { t1: (f64, f64), t2: (f64, f64) },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CurveSurfaceHit {
    Points(Vec<(Point3d, f64)>),
    /// The whole curve range lies on the surface.
    OnSurface,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceSurfaceHit {
    Empty,
    Coincident,
    Curves(Vec<Curve>),
}

/// Exact evaluation and intersection queries consumed by the Boolean pipeline.
///
/// Curves are always queried together with their parameter range.
pub trait GeometryEngine: Send + Sync {
    fn project_point_on_curve(
        &self,
        curve: &Curve,
        range: (f64, f64),
        p: &Point3d,
    ) -> Result<CurvePoint, GeomError>;

    fn intersect_curves(
        &self,
        c1: &Curve,
        r1: (f64, f64),
        c2: &Curve,
        r2: (f64, f64),
        tol: f64,
    ) -> Result<Vec<CurveCurveHit>, GeomError>;

    fn intersect_curve_surface(
        &self,
        curve: &Curve,
        range: (f64, f64),
        surface: &Surface,
        tol: f64,
    ) -> Result<CurveSurfaceHit, GeomError>;

    fn intersect_surfaces(&self, s1: &Surface, s2: &Surface, tol: f64) -> Result<SurfaceSurfaceHit, GeomError>;
}

/// Closed-form solutions for lines, circles and planes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnalyticGeometry {
    /// Two nearly parallel segments whose within-tolerance stretch covers
    /// at least this fraction of the shorter one are neither crossing nor
    /// overlapping, and are reported as ambiguous.
    pub near_parallel_fraction: f64,
}

impl Default for AnalyticGeometry {
    fn default() -> Self {
        Self {
            near_parallel_fraction: 0.5,
        }
    }
}

impl AnalyticGeometry {
    fn line_line(
        &self,
        l1: &Line3d,
        (a0, a1): (f64, f64),
        l2: &Line3d,
        (b0, b1): (f64, f64),
        tol: f64,
    ) -> Result<Vec<CurveCurveHit>, GeomError> {
        let d_b = [l1.distance_to_point(&l2.point_at(b0)), l1.distance_to_point(&l2.point_at(b1))];
        let d_a = [l2.distance_to_point(&l1.point_at(a0)), l2.distance_to_point(&l1.point_at(a1))];

        if d_b.iter().all(|d| *d <= tol) || d_a.iter().all(|d| *d <= tol) {
            let s0 = l1.project(&l2.point_at(b0));
            let s1 = l1.project(&l2.point_at(b1));
            let lo = a0.max(s0.min(s1));
            let hi = a1.min(s0.max(s1));
            if hi - lo <= tol {
                return Ok(vec![]);
            }
            let u0 = l2.project(&l1.point_at(lo));
            let u1 = l2.project(&l1.point_at(hi));
            return Ok(vec![CurveCurveHit::Overlap {
                t1: (lo, hi),
                t2: (u0.min(u1), u0.max(u1)),
            }]);
        }

        let sine = l1.direction.cross(&l2.direction).length();
        let shortest = (a1 - a0).abs().min((b1 - b0).abs());
        let near = d_a.iter().chain(d_b.iter()).any(|d| *d <= tol);
        if near && (sine < 1e-300 || 2.0 * tol / sine >= self.near_parallel_fraction * shortest) {
            return Err(GeomError::Ambiguous { tolerance: tol });
        }

        match l1.intersect(l2, tol)? {
            LineLine::Crossing { point, t1, t2 }
                if t1 >= a0 - tol && t1 <= a1 + tol && t2 >= b0 - tol && t2 <= b1 + tol =>
            {
                Ok(vec![CurveCurveHit::Point {
                    point,
                    t1: t1.clamp(a0, a1),
                    t2: t2.clamp(b0, b1),
                }])
            }
            _ => Ok(vec![]),
        }
    }
}

impl GeometryEngine for AnalyticGeometry {
    fn project_point_on_curve(
        &self,
        curve: &Curve,
        (t0, t1): (f64, f64),
        p: &Point3d,
    ) -> Result<CurvePoint, GeomError> {
        let raw = curve.project(p);
        let t = match curve {
            Curve::Line(_) => raw.clamp(t0, t1),
            Curve::Circle(_) => {
                let wrapped = [raw, raw + TAU, raw - TAU]
                    .into_iter()
                    .find(|a| *a >= t0 && *a <= t1);
                match wrapped {
                    Some(a) => a,
                    None if curve.point_at(t0).distance_to(p) <= curve.point_at(t1).distance_to(p) => t0,
                    None => t1,
                }
            }
        };
        if !t.is_finite() {
            return Err(GeomError::NoSolution {
                reason: "projection parameter is not finite".into(),
            });
        }
        let point = curve.point_at(t);
        Ok(CurvePoint {
            t,
            point,
            distance: point.distance_to(p),
        })
    }

    fn intersect_curves(
        &self,
        c1: &Curve,
        r1: (f64, f64),
        c2: &Curve,
        r2: (f64, f64),
        tol: f64,
    ) -> Result<Vec<CurveCurveHit>, GeomError> {
        match (c1, c2) {
            (Curve::Line(l1), Curve::Line(l2)) => self.line_line(l1, r1, l2, r2, tol),
            _ => Err(GeomError::Unsupported {
                first: c1.kind_name(),
                second: c2.kind_name(),
            }),
        }
    }

    fn intersect_curve_surface(
        &self,
        curve: &Curve,
        (t0, t1): (f64, f64),
        surface: &Surface,
        tol: f64,
    ) -> Result<CurveSurfaceHit, GeomError> {
        let Curve::Line(line) = curve else {
            return Err(GeomError::Unsupported {
                first: curve.kind_name(),
                second: surface.kind_name(),
            });
        };
        let p0 = line.point_at(t0);
        let p1 = line.point_at(t1);

        let hits = match surface {
            Surface::Plane(plane) => {
                let d0 = plane.signed_distance(&p0);
                let d1 = plane.signed_distance(&p1);
                if d0.abs() <= tol && d1.abs() <= tol {
                    return Ok(CurveSurfaceHit::OnSurface);
                }
                if (d0 > tol && d1 > tol) || (d0 < -tol && d1 < -tol) {
                    return Ok(CurveSurfaceHit::Points(vec![]));
                }
                return Ok(match line.intersect(plane, tol)? {
                    LinePlane::Crossing { t, .. } => {
                        let t = t.clamp(t0, t1);
                        CurveSurfaceHit::Points(vec![(line.point_at(t), t)])
                    }
                    LinePlane::InPlane => CurveSurfaceHit::OnSurface,
                    LinePlane::Apart => CurveSurfaceHit::Points(vec![]),
                });
            }
            Surface::Cylinder(c) => intersection::ray_cylinder(&Ray::new(p0, line.direction), c),
            Surface::Sphere(s) => intersection::ray_sphere(&Ray::new(p0, line.direction), s),
        };
        Ok(CurveSurfaceHit::Points(
            hits.into_iter()
                .filter(|h| h.t <= t1 - t0 + tol)
                .map(|h| (h.point, (t0 + h.t).min(t1)))
                .collect(),
        ))
    }

    fn intersect_surfaces(&self, s1: &Surface, s2: &Surface, tol: f64) -> Result<SurfaceSurfaceHit, GeomError> {
        match (s1, s2) {
            (Surface::Plane(p1), Surface::Plane(p2)) => Ok(match p1.intersect(p2, tol)? {
                PlanePlane::Line(line) => SurfaceSurfaceHit::Curves(vec![Curve::Line(line)]),
                PlanePlane::Coincident => SurfaceSurfaceHit::Coincident,
                PlanePlane::Parallel => SurfaceSurfaceHit::Empty,
            }),
            _ => Err(GeomError::Unsupported {
                first: s1.kind_name(),
                second: s2.kind_name(),
            }),
        }
    }
}

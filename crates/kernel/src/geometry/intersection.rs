use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

use super::Evaluable;
use super::curves::{Line3d, Ray};
use super::point::Point3d;
use super::surfaces::{Cylinder, Plane, Sphere};

/// Failure of an exact geometric query. Never a panic.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeomError {
    #[error("no solution: {reason}")]
    NoSolution { reason: String },

    #[error("unsupported {first}/{second} intersection")]
    Unsupported {
        first: &'static str,
        second: &'static str,
    },

    /// Nearly coincident loci whose contact cannot be decided at the given tolerance.
    #[error("ambiguous contact at tolerance {tolerance:e}")]
    Ambiguous { tolerance: f64 },
}

/// Exact intersection against another geometric primitive.
pub trait Intersectable<Rhs: ?Sized> {
    type Output;

    fn intersect(&self, other: &Rhs, tol: f64) -> Result<Self::Output, GeomError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineLine {
    Crossing { point: Point3d, t1: f64, t2: f64 },
    Collinear,
    Apart,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinePlane {
    Crossing { point: Point3d, t: f64 },
    InPlane,
    Apart,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlanePlane {
    Line(Line3d),
    Coincident,
    Parallel,
}

impl Intersectable<Line3d> for Line3d {
    type Output = LineLine;

    fn intersect(&self, other: &Line3d, tol: f64) -> Result<LineLine, GeomError> {
        let w = self.origin - other.origin;
        let b = self.direction.dot(&other.direction);
        let d = self.direction.dot(&w);
        let e = other.direction.dot(&w);
        let denom = 1.0 - b * b;

        if denom.abs() < 1e-18 {
            return Ok(if other.distance_to_point(&self.origin) <= tol {
                LineLine::Collinear
            } else {
                LineLine::Apart
            });
        }

        let t1 = (b * e - d) / denom;
        let t2 = (e - b * d) / denom;
        let p1 = self.point_at(t1);
        let p2 = other.point_at(t2);
        if p1.distance_to(&p2) > tol {
            return Ok(LineLine::Apart);
        }
        Ok(LineLine::Crossing {
            point: p1.midpoint(&p2),
            t1,
            t2,
        })
    }
}

impl Intersectable<Plane> for Line3d {
    type Output = LinePlane;

    fn intersect(&self, plane: &Plane, tol: f64) -> Result<LinePlane, GeomError> {
        let denom = self.direction.dot(&plane.normal);
        let dist = plane.signed_distance(&self.origin);
        if denom.abs() < 1e-15 {
            return Ok(if dist.abs() <= tol {
                LinePlane::InPlane
            } else {
                LinePlane::Apart
            });
        }
        let t = -dist / denom;
        Ok(LinePlane::Crossing {
            point: self.point_at(t),
            t,
        })
    }
}

impl Intersectable<Plane> for Plane {
    type Output = PlanePlane;

    fn intersect(&self, other: &Plane, tol: f64) -> Result<PlanePlane, GeomError> {
        let dir = self.normal.cross(&other.normal);
        if dir.length() < 1e-12 {
            return Ok(if self.signed_distance(&other.origin).abs() <= tol {
                PlanePlane::Coincident
            } else {
                PlanePlane::Parallel
            });
        }
        let dir = dir.normalize_or_zero();
        let m = Matrix3::from_rows(&[
            self.normal.to_nalgebra().transpose(),
            other.normal.to_nalgebra().transpose(),
            dir.to_nalgebra().transpose(),
        ]);
        let rhs = Vector3::new(
            self.normal.dot(&self.origin.to_vec3()),
            other.normal.dot(&other.origin.to_vec3()),
            dir.dot(&self.origin.to_vec3()),
        );
        let x = m.lu().solve(&rhs).ok_or_else(|| GeomError::NoSolution {
            reason: "singular plane/plane system".into(),
        })?;
        let origin = Point3d::new(x[0], x[1], x[2]);
        Line3d::new(origin, dir)
            .map(PlanePlane::Line)
            .ok_or_else(|| GeomError::NoSolution {
                reason: "null plane/plane direction".into(),
            })
    }
}

/// Result of a ray-surface intersection.
#[derive(Debug, Clone, Copy)]
pub struct RaySurfaceHit {
    pub point: Point3d,
    pub t: f64,
}

pub fn ray_plane(ray: &Ray, plane: &Plane) -> Option<RaySurfaceHit> {
    let denom = ray.direction.dot(&plane.normal);
    if denom.abs() < 1e-15 {
        return None;
    }
    let t = (plane.origin - ray.origin).dot(&plane.normal) / denom;
    (t >= 0.0).then(|| RaySurfaceHit { point: ray.at(t), t })
}

pub fn ray_sphere(ray: &Ray, sphere: &Sphere) -> Vec<RaySurfaceHit> {
    let oc = ray.origin - sphere.center;
    let b = 2.0 * oc.dot(&ray.direction);
    let c = oc.length_squared() - sphere.radius * sphere.radius;
    hits_from_roots(ray, solve_quadratic(1.0, b, c))
}

/// Intersect a ray with an infinite cylinder.
pub fn ray_cylinder(ray: &Ray, cyl: &Cylinder) -> Vec<RaySurfaceHit> {
    let oc = ray.origin - cyl.origin;
    let d = ray.direction - cyl.axis * ray.direction.dot(&cyl.axis);
    let o = oc - cyl.axis * oc.dot(&cyl.axis);
    let a = d.length_squared();
    if a < 1e-15 {
        return vec![];
    }
    let b = 2.0 * d.dot(&o);
    let c = o.length_squared() - cyl.radius * cyl.radius;
    hits_from_roots(ray, solve_quadratic(a, b, c))
}

fn hits_from_roots(ray: &Ray, mut roots: Vec<f64>) -> Vec<RaySurfaceHit> {
    roots.retain(|t| *t >= 0.0);
    roots.sort_by(f64::total_cmp);
    roots
        .into_iter()
        .map(|t| RaySurfaceHit { point: ray.at(t), t })
        .collect()
}

fn solve_quadratic(a: f64, b: f64, c: f64) -> Vec<f64> {
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return vec![];
    }
    if disc == 0.0 {
        return vec![-b / (2.0 * a)];
    }
    // Citardauq form avoids cancellation for the smaller root.
    let q = -0.5 * (b + b.signum() * disc.sqrt());
    if q == 0.0 {
        return vec![0.0];
    }
    vec![q / a, c / q]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::vector::Vec3;
    use approx::assert_abs_diff_eq;

    #[test]
    fn crossing_lines_meet_at_point() {
        let a = Line3d::new(Point3d::ORIGIN, Vec3::X).unwrap();
        let b = Line3d::new(Point3d::new(2.0, -1.0, 0.0), Vec3::Y).unwrap();
        match a.intersect(&b, 1e-9).unwrap() {
            LineLine::Crossing { point, t1, t2 } => {
                assert_abs_diff_eq!(point, Point3d::new(2.0, 0.0, 0.0), epsilon = 1e-12);
                assert_abs_diff_eq!(t1, 2.0, epsilon = 1e-12);
                assert_abs_diff_eq!(t2, 1.0, epsilon = 1e-12);
            }
            other => panic!("expected crossing, got {other:?}"),
        }
    }

    #[test]
    fn skew_and_collinear_lines() {
        let a = Line3d::new(Point3d::ORIGIN, Vec3::X).unwrap();
        let skew = Line3d::new(Point3d::new(0.0, 0.0, 1.0), Vec3::Y).unwrap();
        let same = Line3d::new(Point3d::new(5.0, 0.0, 0.0), -Vec3::X).unwrap();
        assert_eq!(a.intersect(&skew, 1e-9).unwrap(), LineLine::Apart);
        assert_eq!(a.intersect(&same, 1e-9).unwrap(), LineLine::Collinear);
    }

    #[test]
    fn line_plane_cases() {
        let plane = Plane::new(Point3d::new(0.0, 0.0, 1.0), Vec3::Z);
        let through = Line3d::new(Point3d::ORIGIN, Vec3::new(0.0, 1.0, 1.0)).unwrap();
        match through.intersect(&plane, 1e-9).unwrap() {
            LinePlane::Crossing { point, .. } => {
                assert_abs_diff_eq!(point, Point3d::new(0.0, 1.0, 1.0), epsilon = 1e-12)
            }
            other => panic!("expected crossing, got {other:?}"),
        }
        let inside = Line3d::new(Point3d::new(3.0, 0.0, 1.0), Vec3::X).unwrap();
        assert_eq!(inside.intersect(&plane, 1e-9).unwrap(), LinePlane::InPlane);
    }

    #[test]
    fn plane_plane_line_lies_on_both() {
        let p1 = Plane::new(Point3d::new(0.5, 0.0, 0.0), Vec3::X);
        let p2 = Plane::new(Point3d::new(0.0, 0.0, 1.0), -Vec3::Z);
        let PlanePlane::Line(line) = p1.intersect(&p2, 1e-9).unwrap() else {
            panic!("expected a line");
        };
        for t in [-3.0, 0.0, 2.5] {
            let p = line.point_at(t);
            assert_abs_diff_eq!(p1.signed_distance(&p), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(p2.signed_distance(&p), 0.0, epsilon = 1e-12);
        }
        let p3 = Plane::new(Point3d::new(0.5, 4.0, 0.0), -Vec3::X);
        assert_eq!(p1.intersect(&p3, 1e-9).unwrap(), PlanePlane::Coincident);
    }

    #[test]
    fn ray_hits_sphere_and_cylinder() {
        let ray = Ray::new(Point3d::new(-5.0, 0.0, 0.0), Vec3::X);
        let hits = ray_sphere(&ray, &Sphere::new(Point3d::ORIGIN, 1.0));
        assert_eq!(hits.len(), 2);
        assert_abs_diff_eq!(hits[0].t, 4.0, epsilon = 1e-12);
        let cyl = Cylinder::new(Point3d::ORIGIN, Vec3::Z, 2.0);
        let hits = ray_cylinder(&ray, &cyl);
        assert_abs_diff_eq!(hits[1].point, Point3d::new(2.0, 0.0, 0.0), epsilon = 1e-12);
        assert!(ray_plane(&ray, &Plane::new(Point3d::new(-6.0, 0.0, 0.0), Vec3::X)).is_none());
    }
}

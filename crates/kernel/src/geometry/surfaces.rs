use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use super::SurfaceEvaluable;
use super::point::Point3d;
use super::vector::Vec3;

/// Face geometry. Closed set of variants, dispatched by `match`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Surface {
    Plane(Plane),
    Cylinder(Cylinder),
    Sphere(Sphere),
}

impl Surface {
    pub fn as_plane(&self) -> Option<&Plane> {
        match self {
            Surface::Plane(p) => Some(p),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Surface::Plane(_) => "plane",
            Surface::Cylinder(_) => "cylinder",
            Surface::Sphere(_) => "sphere",
        }
    }
}

impl SurfaceEvaluable for Surface {
    fn point_at(&self, u: f64, v: f64) -> Point3d {
        match self {
            Surface::Plane(s) => s.point_at(u, v),
            Surface::Cylinder(s) => s.point_at(u, v),
            Surface::Sphere(s) => s.point_at(u, v),
        }
    }

    fn normal_at(&self, u: f64, v: f64) -> Vec3 {
        match self {
            Surface::Plane(s) => s.normal_at(u, v),
            Surface::Cylinder(s) => s.normal_at(u, v),
            Surface::Sphere(s) => s.normal_at(u, v),
        }
    }

    fn project(&self, p: &Point3d) -> (f64, f64) {
        match self {
            Surface::Plane(s) => s.project(p),
            Surface::Cylinder(s) => s.project(p),
            Surface::Sphere(s) => s.project(p),
        }
    }

    fn distance_to(&self, p: &Point3d) -> f64 {
        match self {
            Surface::Plane(s) => s.signed_distance(p).abs(),
            Surface::Cylinder(s) => s.distance_to(p),
            Surface::Sphere(s) => (p.distance_to(&s.center) - s.radius).abs(),
        }
    }
}

/// Infinite plane with an orthonormal frame; `u_axis x v_axis == normal`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub origin: Point3d,
    pub normal: Vec3,
    pub u_axis: Vec3,
    pub v_axis: Vec3,
}

impl Plane {
    pub fn new(origin: Point3d, normal: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        let u_axis = normal.any_orthogonal();
        Self {
            origin,
            normal,
            u_axis,
            v_axis: normal.cross(&u_axis),
        }
    }

    /// Signed distance, positive on the normal side.
    pub fn signed_distance(&self, p: &Point3d) -> f64 {
        (*p - self.origin).dot(&self.normal)
    }

    pub fn project_point(&self, p: &Point3d) -> Point3d {
        *p - self.normal * self.signed_distance(p)
    }
}

impl SurfaceEvaluable for Plane {
    fn point_at(&self, u: f64, v: f64) -> Point3d {
        self.origin + self.u_axis * u + self.v_axis * v
    }

    fn normal_at(&self, _u: f64, _v: f64) -> Vec3 {
        self.normal
    }

    fn project(&self, p: &Point3d) -> (f64, f64) {
        let d = *p - self.origin;
        (d.dot(&self.u_axis), d.dot(&self.v_axis))
    }
}

/// Infinite circular cylinder; `u` is the angle from `ref_dir`, `v` the height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cylinder {
    pub origin: Point3d,
    pub axis: Vec3,
    pub radius: f64,
    pub ref_dir: Vec3,
}

impl Cylinder {
    pub fn new(origin: Point3d, axis: Vec3, radius: f64) -> Self {
        let axis = axis.normalize_or_zero();
        Self {
            origin,
            axis,
            radius,
            ref_dir: axis.any_orthogonal(),
        }
    }

    fn radial(&self, u: f64) -> Vec3 {
        self.ref_dir * u.cos() + self.axis.cross(&self.ref_dir) * u.sin()
    }
}

impl SurfaceEvaluable for Cylinder {
    fn point_at(&self, u: f64, v: f64) -> Point3d {
        self.origin + self.radial(u) * self.radius + self.axis * v
    }

    fn normal_at(&self, u: f64, _v: f64) -> Vec3 {
        self.radial(u)
    }

    fn project(&self, p: &Point3d) -> (f64, f64) {
        let d = *p - self.origin;
        let v = d.dot(&self.axis);
        let y_dir = self.axis.cross(&self.ref_dir);
        let u = d.dot(&y_dir).atan2(d.dot(&self.ref_dir));
        (if u < 0.0 { u + TAU } else { u }, v)
    }

    fn distance_to(&self, p: &Point3d) -> f64 {
        let d = *p - self.origin;
        let radial = d - self.axis * d.dot(&self.axis);
        (radial.length() - self.radius).abs()
    }
}

/// Sphere; `u` is longitude, `v` latitude in `[-π/2, π/2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    pub center: Point3d,
    pub radius: f64,
}

impl Sphere {
    pub fn new(center: Point3d, radius: f64) -> Self {
        Self { center, radius }
    }
}

impl SurfaceEvaluable for Sphere {
    fn point_at(&self, u: f64, v: f64) -> Point3d {
        self.center + self.normal_at(u, v) * self.radius
    }

    fn normal_at(&self, u: f64, v: f64) -> Vec3 {
        Vec3::new(v.cos() * u.cos(), v.cos() * u.sin(), v.sin())
    }

    fn project(&self, p: &Point3d) -> (f64, f64) {
        let d = (*p - self.center).normalize_or_zero();
        let u = d.y.atan2(d.x);
        (if u < 0.0 { u + TAU } else { u }, d.z.clamp(-1.0, 1.0).asin())
    }
}

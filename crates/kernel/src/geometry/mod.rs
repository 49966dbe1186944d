pub mod analytic;
pub mod bbox;
pub mod curves;
pub mod intersection;
pub mod point;
pub mod polygon;
pub mod surfaces;
pub mod vector;

use point::Point3d;
use vector::Vec3;

pub use analytic::{AnalyticGeometry, GeometryEngine};
pub use intersection::{GeomError, Intersectable};

/// Point and derivative queries on a parametric curve.
pub trait Evaluable {
    fn point_at(&self, t: f64) -> Point3d;

    fn derivative_at(&self, t: f64) -> Vec3;

    /// Parameter of the curve point closest to `p` (unbounded).
    fn project(&self, p: &Point3d) -> f64;
}

/// Point, normal and projection queries on a parametric surface.
pub trait SurfaceEvaluable {
    fn point_at(&self, u: f64, v: f64) -> Point3d;

    /// Unit normal of the underlying surface (not of a face using it).
    fn normal_at(&self, u: f64, v: f64) -> Vec3;

    fn project(&self, p: &Point3d) -> (f64, f64);

    /// Unsigned distance from `p` to the surface.
    fn distance_to(&self, p: &Point3d) -> f64 {
        let (u, v) = self.project(p);
        self.point_at(u, v).distance_to(p)
    }
}

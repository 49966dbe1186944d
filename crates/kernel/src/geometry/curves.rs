use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use super::Evaluable;
use super::point::Point3d;
use super::vector::Vec3;

/// Edge geometry. Closed set of variants, dispatched by `match`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Curve {
    Line(Line3d),
    Circle(Circle3d),
}

impl Curve {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Curve::Line(_) => "line",
            Curve::Circle(_) => "circle",
        }
    }

    /// Points at `n + 1` evenly spaced parameters over `[t0, t1]`.
    pub fn sample(&self, t0: f64, t1: f64, n: usize) -> Vec<Point3d> {
        let n = n.max(1);
        (0..=n)
            .map(|i| self.point_at(t0 + (t1 - t0) * i as f64 / n as f64))
            .collect()
    }

    /// Arc length of the `[t0, t1]` portion.
    pub fn length(&self, t0: f64, t1: f64) -> f64 {
        match self {
            Curve::Line(_) => (t1 - t0).abs(),
            Curve::Circle(c) => c.radius * (t1 - t0).abs(),
        }
    }
}

impl Evaluable for Curve {
    fn point_at(&self, t: f64) -> Point3d {
        match self {
            Curve::Line(l) => l.point_at(t),
            Curve::Circle(c) => c.point_at(t),
        }
    }

    fn derivative_at(&self, t: f64) -> Vec3 {
        match self {
            Curve::Line(l) => l.derivative_at(t),
            Curve::Circle(c) => c.derivative_at(t),
        }
    }

    fn project(&self, p: &Point3d) -> f64 {
        match self {
            Curve::Line(l) => l.project(p),
            Curve::Circle(c) => c.project(p),
        }
    }
}

/// Infinite line with unit direction; the parameter is arc length from `origin`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line3d {
    pub origin: Point3d,
    pub direction: Vec3,
}

impl Line3d {
    /// `None` when `direction` is null.
    pub fn new(origin: Point3d, direction: Vec3) -> Option<Self> {
        direction.normalized().map(|direction| Self { origin, direction })
    }

    /// Line through `a` (t = 0) towards `b` (t = |b - a|).
    pub fn from_points(a: Point3d, b: Point3d) -> Option<Self> {
        Self::new(a, b - a)
    }

    pub fn distance_to_point(&self, p: &Point3d) -> f64 {
        self.point_at(self.project(p)).distance_to(p)
    }
}

impl Evaluable for Line3d {
    fn point_at(&self, t: f64) -> Point3d {
        self.origin + self.direction * t
    }

    fn derivative_at(&self, _t: f64) -> Vec3 {
        self.direction
    }

    fn project(&self, p: &Point3d) -> f64 {
        (*p - self.origin).dot(&self.direction)
    }
}

/// Circle parametrized by angle from `x_axis`, counter-clockwise about `normal`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle3d {
    pub center: Point3d,
    pub normal: Vec3,
    pub x_axis: Vec3,
    pub radius: f64,
}

impl Circle3d {
    pub fn new(center: Point3d, normal: Vec3, radius: f64) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            center,
            normal,
            x_axis: normal.any_orthogonal(),
            radius,
        }
    }

    fn y_axis(&self) -> Vec3 {
        self.normal.cross(&self.x_axis)
    }
}

impl Evaluable for Circle3d {
    fn point_at(&self, t: f64) -> Point3d {
        self.center + self.x_axis * (self.radius * t.cos()) + self.y_axis() * (self.radius * t.sin())
    }

    fn derivative_at(&self, t: f64) -> Vec3 {
        self.x_axis * (-self.radius * t.sin()) + self.y_axis() * (self.radius * t.cos())
    }

    /// Angle in `[0, 2π)`; the center projects to 0.
    fn project(&self, p: &Point3d) -> f64 {
        let d = *p - self.center;
        let a = d.dot(&self.y_axis()).atan2(d.dot(&self.x_axis));
        if a < 0.0 { a + TAU } else { a }
    }
}

/// Half-line used by ray casting.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Point3d,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Point3d, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    pub fn at(&self, t: f64) -> Point3d {
        self.origin + self.direction * t
    }
}

use approx::AbsDiffEq;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

use super::vector::Vec3;

/// A point in 3D Euclidean space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3d {
    pub const ORIGIN: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Self) -> f64 {
        self.distance_squared_to(other).sqrt()
    }

    pub fn distance_squared_to(&self, other: &Self) -> f64 {
        (*self - *other).length_squared()
    }

    pub fn midpoint(&self, other: &Self) -> Self {
        self.lerp(other, 0.5)
    }

    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        *self + (*other - *self) * t
    }

    pub fn to_vec3(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    /// Arithmetic mean of a point set. Empty input yields the origin.
    pub fn centroid(points: &[Point3d]) -> Self {
        if points.is_empty() {
            return Self::ORIGIN;
        }
        let sum = points
            .iter()
            .fold(Vec3::ZERO, |acc, p| acc + p.to_vec3());
        let c = sum / points.len() as f64;
        Self::new(c.x, c.y, c.z)
    }

    /// Vector area of a closed polygon: normal direction by the right-hand
    /// rule, length equal to the enclosed area.
    pub fn vector_area(points: &[Point3d]) -> Vec3 {
        let n = points.len();
        (0..n).fold(Vec3::ZERO, |acc, i| {
            acc + points[i].to_vec3().cross(&points[(i + 1) % n].to_vec3()) * 0.5
        })
    }
}

impl Add<Vec3> for Point3d {
    type Output = Point3d;
    fn add(self, rhs: Vec3) -> Self::Output {
        Point3d::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point3d {
    type Output = Vec3;
    fn sub(self, rhs: Self) -> Self::Output {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Sub<Vec3> for Point3d {
    type Output = Point3d;
    fn sub(self, rhs: Vec3) -> Self::Output {
        Point3d::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl AbsDiffEq for Point3d {
    type Epsilon = f64;

    fn default_epsilon() -> f64 {
        f64::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: f64) -> bool {
        self.x.abs_diff_eq(&other.x, epsilon)
            && self.y.abs_diff_eq(&other.y, epsilon)
            && self.z.abs_diff_eq(&other.z, epsilon)
    }
}

/// A point in a face's local 2D frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2d {
    pub x: f64,
    pub y: f64,
}

impl Point2d {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// z-component of `(a - self) x (b - self)`.
    pub fn orient(&self, a: &Self, b: &Self) -> f64 {
        (a.x - self.x) * (b.y - self.y) - (a.y - self.y) * (b.x - self.x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn distance_and_midpoint() {
        let a = Point3d::new(1.0, 0.0, 0.0);
        let b = Point3d::new(4.0, 4.0, 0.0);
        assert_abs_diff_eq!(a.distance_to(&b), 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(a.midpoint(&b), Point3d::new(2.5, 2.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn centroid_of_square() {
        let pts = [
            Point3d::new(0.0, 0.0, 1.0),
            Point3d::new(2.0, 0.0, 1.0),
            Point3d::new(2.0, 2.0, 1.0),
            Point3d::new(0.0, 2.0, 1.0),
        ];
        assert_abs_diff_eq!(Point3d::centroid(&pts), Point3d::new(1.0, 1.0, 1.0), epsilon = 1e-12);
        assert_eq!(Point3d::centroid(&[]), Point3d::ORIGIN);
    }

    #[test]
    fn orientation_sign() {
        let o = Point2d::new(0.0, 0.0);
        assert!(o.orient(&Point2d::new(1.0, 0.0), &Point2d::new(0.0, 1.0)) > 0.0);
        assert!(o.orient(&Point2d::new(0.0, 1.0), &Point2d::new(1.0, 0.0)) < 0.0);
    }
}

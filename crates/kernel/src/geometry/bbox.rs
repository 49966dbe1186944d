use serde::{Deserialize, Serialize};

use super::point::Point3d;
use super::vector::Vec3;

/// Axis-aligned bounding box. A box with `min > max` on any axis is void.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point3d,
    pub max: Point3d,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox {
    pub fn new(min: Point3d, max: Point3d) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: Point3d::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3d::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn from_points(points: &[Point3d]) -> Self {
        let mut bb = Self::empty();
        for p in points {
            bb.add_point(p);
        }
        bb
    }

    pub fn add_point(&mut self, p: &Point3d) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    pub fn add_box(&mut self, other: &Self) {
        if other.is_void() {
            return;
        }
        self.add_point(&other.min);
        self.add_point(&other.max);
    }

    pub fn is_void(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Overlap test; touching boxes intersect.
    pub fn intersects(&self, other: &Self) -> bool {
        !self.is_void()
            && !other.is_void()
            && self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains_point(&self, p: &Point3d) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Box grown by `gap` on every side.
    pub fn enlarged(&self, gap: f64) -> Self {
        if self.is_void() {
            return *self;
        }
        let d = Vec3::new(gap, gap, gap);
        Self {
            min: self.min - d,
            max: self.max + d,
        }
    }

    pub fn diagonal(&self) -> f64 {
        if self.is_void() { 0.0 } else { self.min.distance_to(&self.max) }
    }

    pub fn center(&self) -> Point3d {
        self.min.midpoint(&self.max)
    }
}

use std::f64::consts::PI;

use crate::geometry::point::Point3d;
use crate::geometry::surfaces::Surface;
use crate::topology::brep::*;
use crate::topology::shape::Shape;

/// Samples per circular edge when polygonising loops.
const CIRCLE_SAMPLES: usize = 256;

/// `(1/3) ∫ p·n dA` over one face, with `n` the face normal.
///
/// Planar faces are exact up to circle polygonisation. Curved faces must
/// cover a full revolution (cylinder bands, whole spheres).
pub fn face_volume_term(store: &EntityStore, face_id: FaceId) -> f64 {
    let face = &store.faces[face_id];
    let sense = if face.same_sense { 1.0 } else { -1.0 };
    match &face.surface {
        Surface::Plane(_) => store
            .face_loops(face_id)
            .map(|l| {
                let pts = store.loop_points(l, CIRCLE_SAMPLES);
                pts.first().map_or(0.0, |p0| p0.to_vec3().dot(&Point3d::vector_area(&pts)))
            })
            .sum::<f64>()
            / 3.0,
        Surface::Cylinder(c) => {
            let heights: Vec<f64> = store
                .face_loops(face_id)
                .flat_map(|l| store.loop_points(l, 4))
                .map(|p| (p - c.origin).dot(&c.axis))
                .collect();
            let lo = heights.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = heights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let h = if hi > lo { hi - lo } else { 0.0 };
            sense * 2.0 * PI * c.radius * c.radius * h / 3.0
        }
        Surface::Sphere(s) => sense * 4.0 * PI * s.radius.powi(3) / 3.0,
    }
}

/// Signed volume enclosed by a face set; positive for outward normals.
pub fn faces_volume(store: &EntityStore, faces: &[FaceId]) -> f64 {
    faces.iter().map(|&f| face_volume_term(store, f)).sum()
}

/// Volume of a solid; void shells (inward normals) subtract.
pub fn solid_volume(store: &EntityStore, solid_id: SolidId) -> f64 {
    faces_volume(store, &store.solid_faces(solid_id))
}

/// Total volume of every solid in a shape.
pub fn shape_volume(store: &EntityStore, shape: &Shape) -> f64 {
    shape.solids().into_iter().map(|s| solid_volume(store, s)).sum()
}

/// Area of a planar face, holes excluded.
pub fn face_area(store: &EntityStore, face_id: FaceId) -> f64 {
    let Some(frame) = store.face_frame(face_id) else { return 0.0 };
    store
        .face_loops(face_id)
        .map(|l| Point3d::vector_area(&store.loop_points(l, CIRCLE_SAMPLES)).dot(&frame.normal))
        .sum()
}

/// Check of the Boolean volume identities
/// `vol(A ∪ B) = vol(A) + vol(B) - vol(A ∩ B)` and `vol(A \ B) = vol(A) - vol(A ∩ B)`.
#[derive(Debug)]
pub struct VolumeVerification {
    pub vol_a: f64,
    pub vol_b: f64,
    pub vol_union: f64,
    pub vol_intersection: f64,
    pub vol_difference: f64,
    pub relative_error: f64,
}

impl VolumeVerification {
    pub fn is_valid(&self, max_relative_error: f64) -> bool {
        self.relative_error < max_relative_error
    }
}

pub fn verify_boolean_volume_identity(
    store: &EntityStore,
    a: &Shape,
    b: &Shape,
    union: &Shape,
    intersection: &Shape,
    difference: &Shape,
) -> VolumeVerification {
    let vol_a = shape_volume(store, a);
    let vol_b = shape_volume(store, b);
    let vol_union = shape_volume(store, union);
    let vol_intersection = shape_volume(store, intersection);
    let vol_difference = shape_volume(store, difference);

    let scale = vol_a.abs().max(vol_b.abs()).max(f64::MIN_POSITIVE);
    let union_error = (vol_union - (vol_a + vol_b - vol_intersection)).abs();
    let difference_error = (vol_difference - (vol_a - vol_intersection)).abs();

    VolumeVerification {
        vol_a,
        vol_b,
        vol_union,
        vol_intersection,
        vol_difference,
        relative_error: union_error.max(difference_error) / scale,
    }
}

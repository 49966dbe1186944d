//! Property-based tests for Boolean invariants using the `proptest` crate.

use proptest::prelude::*;

use brep_boolean::boolean::history::EntityStatus;
use brep_boolean::geometry::point::Point3d;
use brep_boolean::geometry::vector::Vec3;
use brep_boolean::topology::brep::EntityStore;
use brep_boolean::topology::primitives::make_box;
use brep_boolean::validation::volume::shape_volume;
use brep_boolean::{EntityKind, Operation, Shape, common, cut, fuse};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

/// Offset of the second unit cube; every component strictly inside (0, 1)
/// so the cubes overlap in general position.
fn arb_overlap_offset() -> impl Strategy<Value = (f64, f64, f64)> {
    (0.1f64..0.9, 0.1f64..0.9, 0.1f64..0.9)
}

/// Gap between two boxes that never touch.
fn arb_gap() -> impl Strategy<Value = f64> {
    0.5f64..10.0
}

fn arb_positive_dim() -> impl Strategy<Value = f64> {
    0.1f64..5.0
}

const TOL: f64 = 1e-6;

fn cube_pair(store: &mut EntityStore, (dx, dy, dz): (f64, f64, f64)) -> (Shape, Shape) {
    let a = make_box(store, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0);
    let b = make_box(store, dx, dy, dz, dx + 1.0, dy + 1.0, dz + 1.0);
    (Shape::Solid(a), Shape::Solid(b))
}

// ---------------------------------------------------------------------------
// 1. Disjoint solids: vol(A ∪ B) == vol(A) + vol(B)
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn disjoint_fuse_adds_volumes(
        gap in arb_gap(),
        w in arb_positive_dim(),
        h in arb_positive_dim(),
        d in arb_positive_dim(),
    ) {
        let mut store = EntityStore::new();
        let a = Shape::Solid(make_box(&mut store, 0.0, 0.0, 0.0, w, h, d));
        let b = Shape::Solid(make_box(&mut store, w + gap, 0.0, 0.0, 2.0 * w + gap, h, d));
        let out = fuse(&mut store, a, b).unwrap();
        let volume = shape_volume(&store, &out.shape);
        prop_assert!((volume - 2.0 * w * h * d).abs() < TOL * volume.max(1.0),
            "fuse volume {} != {}", volume, 2.0 * w * h * d);
        prop_assert_eq!(out.shape.solids().len(), 2);
    }
}

// ---------------------------------------------------------------------------
// 2. Overlapping solids: vol(A \ B) + vol(A ∩ B) == vol(A)
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn cut_plus_common_is_object(offset in arb_overlap_offset()) {
        let (dx, dy, dz) = offset;
        let expected_common = (1.0 - dx) * (1.0 - dy) * (1.0 - dz);

        let mut store = EntityStore::new();
        let (a, b) = cube_pair(&mut store, offset);
        let cut_out = cut(&mut store, a.clone(), b.clone()).unwrap();
        let common_out = common(&mut store, a, b).unwrap();
        let v_cut = shape_volume(&store, &cut_out.shape);
        let v_common = shape_volume(&store, &common_out.shape);

        prop_assert!((v_common - expected_common).abs() < TOL,
            "common volume {} != {}", v_common, expected_common);
        prop_assert!((v_cut + v_common - 1.0).abs() < TOL,
            "cut {} + common {} != 1", v_cut, v_common);
    }
}

// ---------------------------------------------------------------------------
// 3. Commutativity: Fuse(A, B) and Fuse(B, A) agree on volume and face count
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn fuse_is_commutative(offset in arb_overlap_offset()) {
        let mut store = EntityStore::new();
        let (a, b) = cube_pair(&mut store, offset);
        let ab = fuse(&mut store, a.clone(), b.clone()).unwrap();
        let ba = fuse(&mut store, b, a).unwrap();

        let (v_ab, v_ba) = (shape_volume(&store, &ab.shape), shape_volume(&store, &ba.shape));
        prop_assert!((v_ab - v_ba).abs() < TOL, "volumes differ: {} vs {}", v_ab, v_ba);
        let faces = |s: &Shape| store.explore_kind(s, EntityKind::Face).len();
        prop_assert_eq!(faces(&ab.shape), faces(&ba.shape));
    }
}

// ---------------------------------------------------------------------------
// 4. History completeness: every input has exactly one status
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn history_covers_every_input(offset in arb_overlap_offset(), op in 0usize..3) {
        let operation = [Operation::Fuse, Operation::Common, Operation::Cut][op];
        let mut store = EntityStore::new();
        let (a, b) = cube_pair(&mut store, offset);
        let out = match operation {
            Operation::Fuse => fuse(&mut store, a, b),
            Operation::Common => common(&mut store, a, b),
            _ => cut(&mut store, a, b),
        }
        .unwrap();

        // 2 solids, 2 shells, 12 faces, 24 edges, 16 vertices
        prop_assert_eq!(out.history.inputs().len(), 56);
        let in_result: std::collections::HashSet<_> = store.explore(&out.shape).into_iter().collect();
        for &input in out.history.inputs() {
            match out.history.status(input) {
                Some(EntityStatus::Unchanged) => prop_assert!(in_result.contains(&input)),
                Some(EntityStatus::Modified(images)) => {
                    prop_assert!(!images.is_empty());
                    prop_assert!(images.iter().all(|r| in_result.contains(r)));
                }
                Some(EntityStatus::Deleted) => prop_assert!(!in_result.contains(&input)),
                None => prop_assert!(false, "{:?} has no status", input),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 5. Translating both operands translates the result
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn common_volume_is_translation_invariant(
        offset in arb_overlap_offset(),
        (tx, ty, tz) in (-50.0f64..50.0, -50.0f64..50.0, -50.0f64..50.0),
    ) {
        let (dx, dy, dz) = offset;
        let t = Vec3::new(tx, ty, tz);
        let o = Point3d::ORIGIN + t;
        let mut store = EntityStore::new();
        let a = Shape::Solid(make_box(&mut store, o.x, o.y, o.z, o.x + 1.0, o.y + 1.0, o.z + 1.0));
        let b = Shape::Solid(make_box(&mut store, o.x + dx, o.y + dy, o.z + dz, o.x + dx + 1.0, o.y + dy + 1.0, o.z + dz + 1.0));
        let out = common(&mut store, a, b).unwrap();
        let expected = (1.0 - dx) * (1.0 - dy) * (1.0 - dz);
        let volume = shape_volume(&store, &out.shape);
        prop_assert!((volume - expected).abs() < 1e-5, "common volume {} != {}", volume, expected);
    }
}

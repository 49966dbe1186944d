//! End-to-end Boolean scenarios on boxes, wires and faces.

use approx::assert_abs_diff_eq;

use brep_boolean::boolean::classify::{MembershipTester, PointClassification, RayCastTester, SolidProbe, face_samples};
use brep_boolean::geometry::point::Point3d;
use brep_boolean::geometry::vector::Vec3;
use brep_boolean::topology::brep::{EntityStore, FaceId, SolidId};
use brep_boolean::topology::primitives::{make_box, make_planar_face, make_polyline};
use brep_boolean::validation::audit::verify_solid;
use brep_boolean::validation::volume::{shape_volume, verify_boolean_volume_identity};
use brep_boolean::{
    BooleanConfig, BooleanError, BooleanOperation, BooleanOutput, EntityKind, EntityRef, EntityStatus, Operation,
    ProgressToken, Shape, Stage, Tuning, WarningKind, common, cut, fuse, section,
};

fn unit_cube(store: &mut EntityStore, dx: f64) -> SolidId {
    make_box(store, dx, 0.0, 0.0, dx + 1.0, 1.0, 1.0)
}

/// The face of `solid` whose outward normal is `normal`.
fn face_facing(store: &EntityStore, solid: SolidId, normal: Vec3) -> FaceId {
    store
        .solid_faces(solid)
        .into_iter()
        .find(|&f| store.face_frame(f).is_some_and(|fr| fr.normal.dot(&normal) > 0.9))
        .expect("box has a face in every axis direction")
}

fn result_faces(store: &EntityStore, shape: &Shape) -> Vec<FaceId> {
    store
        .explore_kind(shape, EntityKind::Face)
        .into_iter()
        .filter_map(|r| match r {
            EntityRef::Face(f) => Some(f),
            _ => None,
        })
        .collect()
}

fn run_with(store: &mut EntityStore, config: BooleanConfig) -> BooleanOutput {
    BooleanOperation::new(config).perform(store, &ProgressToken::new()).unwrap()
}

#[test]
fn shifted_cubes_fuse_common_cut_volumes() {
    let mut store = EntityStore::new();
    let a = Shape::Solid(unit_cube(&mut store, 0.0));
    let b = Shape::Solid(unit_cube(&mut store, 0.5));

    let union = fuse(&mut store, a.clone(), b.clone()).unwrap();
    let intersection = common(&mut store, a.clone(), b.clone()).unwrap();
    let difference = cut(&mut store, a.clone(), b.clone()).unwrap();

    assert_abs_diff_eq!(shape_volume(&store, &union.shape), 1.5, epsilon = 1e-7);
    assert_abs_diff_eq!(shape_volume(&store, &intersection.shape), 0.5, epsilon = 1e-7);
    assert_abs_diff_eq!(shape_volume(&store, &difference.shape), 0.5, epsilon = 1e-7);

    let check = verify_boolean_volume_identity(&store, &a, &b, &union.shape, &intersection.shape, &difference.shape);
    assert!(check.is_valid(1e-9), "{check:?}");

    for out in [&union, &intersection, &difference] {
        let solids = out.shape.solids();
        assert_eq!(solids.len(), 1);
        for audit in verify_solid(&store, solids[0]) {
            assert!(audit.is_closed(), "{:?}", audit.errors);
        }
    }
}

#[test]
fn cut_result_has_nothing_inside_tool() {
    let mut store = EntityStore::new();
    let a = Shape::Solid(unit_cube(&mut store, 0.0));
    let b = Shape::Solid(unit_cube(&mut store, 0.5));
    let probe = SolidProbe::of_shape(&store, &b);
    let out = cut(&mut store, a, b).unwrap();

    let tester = RayCastTester::default();
    for face in result_faces(&store, &out.shape) {
        for (p, _) in face_samples(&store, face, 1e-7, 3) {
            assert_ne!(tester.classify(&probe, &p, 1e-7), PointClassification::Inside, "{p:?}");
        }
    }
}

#[test]
fn tangent_cubes_common_is_empty_and_fuse_is_one_solid() {
    let mut store = EntityStore::new();
    let a_id = unit_cube(&mut store, 0.0);
    let b_id = unit_cube(&mut store, 1.0);
    let (a, b) = (Shape::Solid(a_id), Shape::Solid(b_id));
    let shared_a = face_facing(&store, a_id, Vec3::X);
    let shared_b = face_facing(&store, b_id, -Vec3::X);

    let intersection = common(&mut store, a.clone(), b.clone()).unwrap();
    assert_abs_diff_eq!(shape_volume(&store, &intersection.shape), 0.0, epsilon = 1e-9);
    assert!(intersection.shape.solids().is_empty());

    let union = fuse(&mut store, a, b).unwrap();
    assert_eq!(union.shape.solids().len(), 1);
    assert_abs_diff_eq!(shape_volume(&store, &union.shape), 2.0, epsilon = 1e-7);
    assert!(union.history.is_deleted(EntityRef::Face(shared_a)));
    assert!(union.history.is_deleted(EntityRef::Face(shared_b)));
    for face in result_faces(&store, &union.shape) {
        let frame = store.face_frame(face).unwrap();
        let on_contact_plane = frame.normal.x.abs() > 0.5 && (frame.origin.x - 1.0).abs() < 1e-7;
        assert!(!on_contact_plane, "contact face {face:?} survived");
    }
    assert_eq!(result_faces(&store, &union.shape).len(), 10);
}

#[test]
fn operations_with_itself() {
    let mut store = EntityStore::new();
    let a = Shape::Solid(unit_cube(&mut store, 0.0));

    let union = fuse(&mut store, a.clone(), a.clone()).unwrap();
    assert_eq!(union.shape, a);
    assert!(union.report.is_clean());
    assert!(
        union
            .history
            .inputs()
            .iter()
            .all(|&r| union.history.status(r) == Some(&EntityStatus::Unchanged))
    );

    let intersection = common(&mut store, a.clone(), a.clone()).unwrap();
    assert_eq!(intersection.shape, a);

    let difference = cut(&mut store, a.clone(), a.clone()).unwrap();
    assert!(difference.shape.is_empty());
    let Shape::Solid(a_id) = a else { unreachable!() };
    assert!(difference.history.is_deleted(EntityRef::Solid(a_id)));
}

#[test]
fn split_faces_are_reported_as_modified() {
    let mut store = EntityStore::new();
    let a_id = unit_cube(&mut store, 0.0);
    let b = Shape::Solid(unit_cube(&mut store, 0.5));
    let bottom = face_facing(&store, a_id, -Vec3::Z);
    let far_side = face_facing(&store, a_id, -Vec3::X);
    let near_side = face_facing(&store, a_id, Vec3::X);

    let out = fuse(&mut store, Shape::Solid(a_id), b).unwrap();
    // Bottom is cut in two; both halves survive a fuse.
    assert_eq!(out.history.modified(EntityRef::Face(bottom)).len(), 2);
    assert_eq!(out.history.status(EntityRef::Face(far_side)), Some(&EntityStatus::Unchanged));
    assert!(out.history.is_deleted(EntityRef::Face(near_side)));
    assert!(out.history.is_deleted(EntityRef::Solid(a_id)) || !out.history.modified(EntityRef::Solid(a_id)).is_empty());
}

#[test]
fn through_hole_creates_generated_section_edges() {
    let mut store = EntityStore::new();
    let slab = make_box(&mut store, 0.0, 0.0, 0.0, 3.0, 3.0, 1.0);
    let drill = make_box(&mut store, 1.0, 1.0, -1.0, 2.0, 2.0, 2.0);
    let top = face_facing(&store, slab, Vec3::Z);

    let out = cut(&mut store, Shape::Solid(slab), Shape::Solid(drill)).unwrap();
    assert_abs_diff_eq!(shape_volume(&store, &out.shape), 8.0, epsilon = 1e-7);
    let solids = out.shape.solids();
    assert_eq!(solids.len(), 1);
    let audits = verify_solid(&store, solids[0]);
    assert!(audits[0].all_valid(), "{:?}", audits[0].errors);
    assert_eq!(audits[0].genus, 1);

    let generated = out.history.generated(EntityRef::Face(top));
    assert_eq!(generated.iter().filter(|r| matches!(r, EntityRef::Edge(_))).count(), 4);
}

#[test]
fn cavity_becomes_inward_shell() {
    let mut store = EntityStore::new();
    let outer = Shape::Solid(make_box(&mut store, 0.0, 0.0, 0.0, 4.0, 4.0, 4.0));
    let inner = Shape::Solid(make_box(&mut store, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0));

    let out = cut(&mut store, outer, inner).unwrap();
    let solids = out.shape.solids();
    assert_eq!(solids.len(), 1);
    assert_eq!(store.solids[solids[0]].shells.len(), 2);
    assert_abs_diff_eq!(shape_volume(&store, &out.shape), 63.0, epsilon = 1e-7);
}

#[test]
fn wire_through_box() {
    let mut store = EntityStore::new();
    let solid = Shape::Solid(unit_cube(&mut store, 0.0));
    let wire = make_polyline(&mut store, &[Point3d::new(-1.0, 0.5, 0.5), Point3d::new(2.0, 0.5, 0.5)]);

    let inside = common(&mut store, wire.clone(), solid.clone()).unwrap();
    let edges = store.explore_kind(&inside.shape, EntityKind::Edge);
    assert_eq!(edges.len(), 1);
    let EntityRef::Edge(e) = edges[0] else { unreachable!() };
    let edge = &store.edges[e];
    assert_abs_diff_eq!(edge.curve.length(edge.t_start, edge.t_end), 1.0, epsilon = 1e-7);

    let outside = cut(&mut store, wire, solid).unwrap();
    assert_eq!(store.explore_kind(&outside.shape, EntityKind::Edge).len(), 2);
}

#[test]
fn crossing_wires_section_is_a_vertex() {
    let mut store = EntityStore::new();
    let w1 = make_polyline(&mut store, &[Point3d::new(0.0, 0.0, 0.0), Point3d::new(2.0, 2.0, 0.0)]);
    let w2 = make_polyline(&mut store, &[Point3d::new(0.0, 2.0, 0.0), Point3d::new(2.0, 0.0, 0.0)]);

    let out = section(&mut store, w1.clone(), w2.clone()).unwrap();
    let Shape::Vertex(v) = out.shape else { panic!("expected a vertex, got {:?}", out.shape) };
    assert_abs_diff_eq!(store.vertices[v].point, Point3d::new(1.0, 1.0, 0.0), epsilon = 1e-9);

    let union = fuse(&mut store, w1, w2).unwrap();
    assert_eq!(store.explore_kind(&union.shape, EntityKind::Edge).len(), 4);
}

#[test]
fn cancelled_token_returns_cancelled_without_side_effects() {
    let mut store = EntityStore::new();
    let a = Shape::Solid(unit_cube(&mut store, 0.0));
    let b = Shape::Solid(unit_cube(&mut store, 0.5));
    let snapshot = serde_json::to_string(&store).unwrap();

    let progress = ProgressToken::new();
    progress.cancel();
    let err = BooleanOperation::new(BooleanConfig::new(a, b, Operation::Fuse))
        .perform(&mut store, &progress)
        .unwrap_err();
    assert_eq!(err, BooleanError::Cancelled { stage: Stage::Registry });
    assert_eq!(serde_json::to_string(&store).unwrap(), snapshot);
}

#[test]
fn parallel_and_sequential_runs_agree() {
    let mut store = EntityStore::new();
    let a = Shape::Solid(unit_cube(&mut store, 0.0));
    let b = Shape::Solid(make_box(&mut store, 0.3, 0.2, 0.4, 1.3, 1.2, 1.4));
    let run = |store: &mut EntityStore, parallel: bool| {
        BooleanOperation::new(BooleanConfig::new(a.clone(), b.clone(), Operation::Common).with_parallel(parallel))
            .perform(store, &ProgressToken::new())
            .unwrap()
    };
    let seq = run(&mut store, false);
    let par = run(&mut store, true);
    assert_abs_diff_eq!(
        shape_volume(&store, &seq.shape),
        shape_volume(&store, &par.shape),
        epsilon = 1e-12
    );
    assert_eq!(
        store.explore_kind(&seq.shape, EntityKind::Face).len(),
        store.explore_kind(&par.shape, EntityKind::Face).len()
    );
    assert_eq!(seq.report.count(WarningKind::AssemblyAmbiguous), par.report.count(WarningKind::AssemblyAmbiguous));
}

#[test]
fn offset_between_one_and_two_tolerances_keeps_volume_identity() {
    let d = 1.5e-7;
    let mut store = EntityStore::new();
    let a = Shape::Solid(unit_cube(&mut store, 0.0));
    let b = Shape::Solid(make_box(&mut store, d, d, 0.5, 1.0 + d, 1.0 + d, 1.5));

    let difference = cut(&mut store, a.clone(), b.clone()).unwrap();
    let intersection = common(&mut store, a, b).unwrap();
    let (v_cut, v_common) = (
        shape_volume(&store, &difference.shape),
        shape_volume(&store, &intersection.shape),
    );
    assert!(v_cut > 0.4 && v_common > 0.4, "cut {v_cut}, common {v_common}");
    assert_abs_diff_eq!(v_cut + v_common, 1.0, epsilon = 1e-6);
}

#[test]
fn short_edge_vanishes_with_a_warning() {
    let mut store = EntityStore::new();
    let chain = make_polyline(
        &mut store,
        &[
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(1.0 + 5e-8, 0.0, 0.0),
            Point3d::new(2.0, 0.0, 0.0),
        ],
    );
    let EntityRef::Edge(short) = chain.leaves()[1] else { unreachable!() };
    let crossing = make_polyline(&mut store, &[Point3d::new(0.5, -1.0, 0.0), Point3d::new(0.5, 1.0, 0.0)]);

    let out = fuse(&mut store, chain, crossing).unwrap();
    assert!(out.report.has(WarningKind::SmallEdge), "{:?}", out.report);
    assert!(out.history.vanished_fragments().iter().any(|v| v.edge == EntityRef::Edge(short)));
    assert!(!out.shape.leaves().contains(&EntityRef::Edge(short)));
    // Both long chain edges survive, the first split by the crossing wire.
    assert_eq!(store.explore_kind(&out.shape, EntityKind::Edge).len(), 5);
}

#[test]
fn sliver_contact_reports_exhausted_tolerance() {
    let mut store = EntityStore::new();
    let long = make_polyline(&mut store, &[Point3d::new(0.0, 0.0, 0.0), Point3d::new(1.0, 0.0, 0.0)]);
    let sliver = make_polyline(&mut store, &[Point3d::new(0.5, 0.0, 0.0), Point3d::new(0.6, 6e-7, 0.0)]);
    let tuning = Tuning {
        tolerance_growth_attempts: 1,
        ..Tuning::default()
    };

    let out = run_with(&mut store, BooleanConfig::new(long, sliver, Operation::Fuse).with_tuning(tuning));
    assert!(out.report.has(WarningKind::ToleranceExhausted), "{:?}", out.report);
    assert!(!out.shape.is_empty());
}

#[test]
fn crossing_sections_hit_the_pass_limit() {
    let mut store = EntityStore::new();
    let floor = Shape::Face(make_planar_face(
        &mut store,
        &[
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(2.0, 0.0, 0.0),
            Point3d::new(2.0, 2.0, 0.0),
            Point3d::new(0.0, 2.0, 0.0),
        ],
    ));
    let walls = |store: &mut EntityStore| {
        Shape::Compound(vec![
            Shape::Face(make_planar_face(
                store,
                &[
                    Point3d::new(1.0, -1.0, -1.0),
                    Point3d::new(1.0, 3.0, -1.0),
                    Point3d::new(1.0, 3.0, 1.0),
                    Point3d::new(1.0, -1.0, 1.0),
                ],
            )),
            Shape::Face(make_planar_face(
                store,
                &[
                    Point3d::new(-1.0, 1.0, -1.0),
                    Point3d::new(-1.0, 1.0, 1.0),
                    Point3d::new(3.0, 1.0, 1.0),
                    Point3d::new(3.0, 1.0, -1.0),
                ],
            )),
        ])
    };
    let tool = walls(&mut store);

    // The two section lines cross at (1, 1, 0), found only by a later pass.
    let limited = Tuning {
        max_passes: 1,
        ..Tuning::default()
    };
    let out = run_with(
        &mut store,
        BooleanConfig::new(floor.clone(), tool.clone(), Operation::Section).with_tuning(limited),
    );
    assert!(out.report.has(WarningKind::PassLimitReached), "{:?}", out.report);

    let out = section(&mut store, floor, tool).unwrap();
    assert!(!out.report.has(WarningKind::PassLimitReached));
    assert_eq!(store.explore_kind(&out.shape, EntityKind::Edge).len(), 4);
}

#[test]
fn fuzzy_fuse_closes_a_small_gap() {
    let gap = 1e-5;
    let mut store = EntityStore::new();
    let a = Shape::Solid(unit_cube(&mut store, 0.0));
    let b = Shape::Solid(unit_cube(&mut store, 1.0 + gap));

    let apart = fuse(&mut store, a.clone(), b.clone()).unwrap();
    assert_eq!(apart.shape.solids().len(), 2);

    let joined = run_with(&mut store, BooleanConfig::new(a, b, Operation::Fuse).with_fuzzy(2e-5));
    let solids = joined.shape.solids();
    assert_eq!(solids.len(), 1, "{:?}", joined.report);
    assert_eq!(store.solids[solids[0]].shells.len(), 1);
    assert_abs_diff_eq!(shape_volume(&store, &joined.shape), 2.0, epsilon = 1e-4);
}

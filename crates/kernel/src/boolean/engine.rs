use std::collections::HashSet;

use tracing::{info, instrument};

use super::builder::ResultBuilder;
use super::classify::{FragmentClassifier, MembershipTester, OperandProbes, RayCastTester, SolidProbe};
use super::ds::{DataStructure, Rank};
use super::history::{History, HistoryCollector};
use super::interference::InterferenceDetector;
use super::options::{BooleanConfig, Operation};
use super::pave::PaveBuilder;
use super::progress::{ProgressToken, Stage};
use super::report::{BooleanError, Report};
use super::split::FaceSplitter;
use crate::geometry::{AnalyticGeometry, GeometryEngine};
use crate::topology::brep::EntityStore;
use crate::topology::shape::{EntityRef, Shape};
use crate::validation::audit::audit_shell;

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct BooleanOutput {
    pub shape: Shape,
    pub history: History,
    pub report: Report,
}

/// One configured Boolean run with its geometry and membership collaborators.
pub struct BooleanOperation {
    config: BooleanConfig,
    geometry: Box<dyn GeometryEngine>,
    membership: Box<dyn MembershipTester>,
}

impl BooleanOperation {
    pub fn new(config: BooleanConfig) -> Self {
        let membership = RayCastTester {
            ray_count: config.tuning.ray_count,
        };
        Self {
            config,
            geometry: Box::new(AnalyticGeometry::default()),
            membership: Box::new(membership),
        }
    }

    pub fn with_geometry(mut self, geometry: impl GeometryEngine + 'static) -> Self {
        self.geometry = Box::new(geometry);
        self
    }

    pub fn with_membership(mut self, membership: impl MembershipTester + 'static) -> Self {
        self.membership = Box::new(membership);
        self
    }

    pub fn config(&self) -> &BooleanConfig {
        &self.config
    }

    /// Run the operation. The store is only written when the run succeeds;
    /// on any error it is left exactly as it was.
    #[instrument(skip_all, fields(operation = ?self.config.operation))]
    pub fn perform(&self, store: &mut EntityStore, progress: &ProgressToken) -> Result<BooleanOutput, BooleanError> {
        progress.check(Stage::Registry)?;
        self.config.validate()?;
        let config = &self.config;
        let (object, tool) = &config.operands;
        let (operation, tuning, parallel, fuzzy) =
            (config.operation, &config.tuning, config.parallel_hint, config.fuzzy_tolerance);

        let mut work = store.clone();
        let mut ds = DataStructure::new(fuzzy);
        ds.register(&work, object, Rank::Object)?;
        ds.register(&work, tool, Rank::Tool)?;
        let dims = (operand_dimension(&work, object)?, operand_dimension(&work, tool)?);
        check_dimensions(operation, dims)?;

        let mut history = HistoryCollector::default();
        for id in ds.ids() {
            history.add_input(ds.entity(id).shape);
        }
        let mut report = Report::default();

        progress.check(Stage::Interference)?;
        let table = InterferenceDetector {
            geometry: self.geometry.as_ref(),
            tuning,
            parallel,
            progress,
        }
        .find_all(&mut work, &mut ds, &mut history, &mut report)?;

        let paves = PaveBuilder {
            geometry: self.geometry.as_ref(),
            tuning,
            progress,
        }
        .build(&mut work, &mut ds, &table, &mut history, &mut report)?;

        ds.freeze_tolerances(&mut work);
        progress.check(Stage::Classification)?;
        let probes = OperandProbes {
            object: (dims.0 == 3).then(|| SolidProbe::of_shape(&work, object)),
            tool: (dims.1 == 3).then(|| SolidProbe::of_shape(&work, tool)),
        };
        let mut classifier = FragmentClassifier::new(self.membership.as_ref(), tuning, progress, parallel, fuzzy);
        let builder = ResultBuilder {
            operation,
            tuning,
            progress,
            fuzzy,
        };

        let shape = match (operation, dims) {
            (Operation::Section, _) => {
                progress.check(Stage::Build)?;
                builder.section(&work, &ds, &table, &paves)?
            }
            (_, (3, 3)) => {
                let fragments = FaceSplitter { tuning, progress }.split_all(
                    &mut work,
                    &ds,
                    &table,
                    &paves,
                    &mut history,
                    &mut report,
                )?;
                let selected = builder.select_faces(
                    &mut work,
                    &ds,
                    &fragments,
                    &mut classifier,
                    &probes,
                    &mut history,
                    &mut report,
                )?;
                progress.check(Stage::Build)?;
                builder.assemble_solids(
                    &mut work,
                    &ds,
                    &selected,
                    self.membership.as_ref(),
                    &mut history,
                    &mut report,
                )?
            }
            _ => {
                progress.check(Stage::Build)?;
                builder.select_edges(&work, &ds, &paves, &classifier, &probes)?
            }
        };

        let history = history.finalize(&work, &shape);
        prune(&mut work, store, &shape);
        *store = work;
        info!(
            result = shape.leaves().len(),
            warnings = report.warnings.len(),
            "boolean operation complete"
        );
        Ok(BooleanOutput { shape, history, report })
    }
}

/// Topological dimension of an operand. Closed shells count as solids,
/// open ones as surfaces.
pub fn operand_dimension(store: &EntityStore, shape: &Shape) -> Result<u8, BooleanError> {
    let mut dims = shape.leaves().into_iter().map(|r| match r {
        EntityRef::Shell(s) if !audit_shell(store, s).is_closed() => 2,
        other => other.kind().dimension(),
    });
    let first = dims.next().ok_or_else(|| BooleanError::invalid("empty operand"))?;
    if dims.any(|d| d != first) {
        return Err(BooleanError::invalid("operand mixes entities of different dimensions"));
    }
    Ok(first)
}

/// Fuse takes two solids or two wires; Cut and Common take a solid
/// against a solid, or a wire against a solid, faces or another wire.
/// Section takes anything.
fn check_dimensions(operation: Operation, (object, tool): (u8, u8)) -> Result<(), BooleanError> {
    let ok = match operation {
        Operation::Section => true,
        Operation::Fuse => object == tool && matches!(object, 1 | 3),
        Operation::Cut | Operation::Common => matches!((object, tool), (3, 3) | (1, 1..=3)),
    };
    if ok {
        Ok(())
    } else {
        Err(BooleanError::invalid(format!(
            "{operation:?} does not accept operands of dimension {object} and {tool}"
        )))
    }
}

/// Drop entities created during the run that the result does not use.
fn prune(work: &mut EntityStore, original: &EntityStore, result: &Shape) {
    let reachable: HashSet<EntityRef> = work.explore(result).into_iter().collect();
    let mut loops = HashSet::new();
    let mut half_edges = HashSet::new();
    for r in &reachable {
        if let EntityRef::Face(f) = *r {
            for l in work.face_loops(f) {
                loops.insert(l);
                half_edges.extend(work.loops[l].half_edges.iter().copied());
            }
        }
    }
    let keep = |r: EntityRef| reachable.contains(&r) || original.contains(r);
    work.vertices.retain(|k, _| keep(EntityRef::Vertex(k)));
    work.edges.retain(|k, _| keep(EntityRef::Edge(k)));
    work.faces.retain(|k, _| keep(EntityRef::Face(k)));
    work.shells.retain(|k, _| keep(EntityRef::Shell(k)));
    work.solids.retain(|k, _| keep(EntityRef::Solid(k)));
    work.loops.retain(|k, _| loops.contains(&k) || original.loops.contains_key(k));
    work.half_edges
        .retain(|k, _| half_edges.contains(&k) || original.half_edges.contains_key(k));
}

fn run(store: &mut EntityStore, object: Shape, tool: Shape, operation: Operation) -> Result<BooleanOutput, BooleanError> {
    BooleanOperation::new(BooleanConfig::new(object, tool, operation)).perform(store, &ProgressToken::new())
}

/// `object ∪ tool` with default settings.
pub fn fuse(store: &mut EntityStore, object: Shape, tool: Shape) -> Result<BooleanOutput, BooleanError> {
    run(store, object, tool, Operation::Fuse)
}

/// `object \ tool` with default settings.
pub fn cut(store: &mut EntityStore, object: Shape, tool: Shape) -> Result<BooleanOutput, BooleanError> {
    run(store, object, tool, Operation::Cut)
}

/// `object ∩ tool` with default settings.
pub fn common(store: &mut EntityStore, object: Shape, tool: Shape) -> Result<BooleanOutput, BooleanError> {
    run(store, object, tool, Operation::Common)
}

pub fn section(store: &mut EntityStore, object: Shape, tool: Shape) -> Result<BooleanOutput, BooleanError> {
    run(store, object, tool, Operation::Section)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boolean::history::EntityStatus;
    use crate::boolean::report::WarningKind;
    use crate::geometry::point::Point3d;
    use crate::topology::primitives::{make_box, make_planar_face, make_polyline};
    use crate::topology::shape::EntityKind;
    use crate::validation::volume::shape_volume;
    use approx::assert_abs_diff_eq;
    use std::sync::{Arc, OnceLock};

    fn cubes(store: &mut EntityStore, dx: f64) -> (Shape, Shape) {
        let a = make_box(store, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0);
        let b = make_box(store, dx, 0.0, 0.0, dx + 1.0, 1.0, 1.0);
        (Shape::Solid(a), Shape::Solid(b))
    }

    #[test]
    fn shifted_cubes() {
        for (operation, expected) in [(Operation::Fuse, 1.5), (Operation::Common, 0.5), (Operation::Cut, 0.5)] {
            let mut store = EntityStore::new();
            let (a, b) = cubes(&mut store, 0.5);
            let out = run(&mut store, a, b, operation).unwrap();
            assert_abs_diff_eq!(shape_volume(&store, &out.shape), expected, epsilon = 1e-7);
            assert_eq!(out.shape.solids().len(), 1);
            assert!(!out.report.has(WarningKind::AssemblyAmbiguous), "{:?}", out.report);
        }
    }

    #[test]
    fn cancelled_run_leaves_store_untouched() {
        let mut store = EntityStore::new();
        let (a, b) = cubes(&mut store, 0.5);
        let before = (store.vertices.len(), store.edges.len(), store.faces.len(), store.solids.len());
        let progress = ProgressToken::new();
        progress.cancel();
        let err = BooleanOperation::new(BooleanConfig::new(a, b, Operation::Fuse))
            .perform(&mut store, &progress)
            .unwrap_err();
        assert_eq!(err, BooleanError::Cancelled { stage: Stage::Registry });
        let after = (store.vertices.len(), store.edges.len(), store.faces.len(), store.solids.len());
        assert_eq!(before, after);
    }

    #[test]
    fn cancellation_mid_run_leaves_store_untouched() {
        let mut store = EntityStore::new();
        let (a, b) = cubes(&mut store, 0.5);
        let before = (store.vertices.len(), store.edges.len(), store.faces.len(), store.loops.len());
        let slot: Arc<OnceLock<ProgressToken>> = Arc::default();
        let handle = slot.clone();
        let progress = ProgressToken::with_observer(move |stage| {
            if stage == Stage::Classification {
                if let Some(token) = handle.get() {
                    token.cancel();
                }
            }
        });
        slot.set(progress.clone()).unwrap();
        let err = BooleanOperation::new(BooleanConfig::new(a, b, Operation::Common))
            .perform(&mut store, &progress)
            .unwrap_err();
        assert_eq!(err, BooleanError::Cancelled { stage: Stage::Classification });
        let after = (store.vertices.len(), store.edges.len(), store.faces.len(), store.loops.len());
        assert_eq!(before, after);
    }

    #[test]
    fn rejects_unsupported_dimensions() {
        let mut store = EntityStore::new();
        let (a, _) = cubes(&mut store, 0.5);
        let face = Shape::Face(make_planar_face(
            &mut store,
            &[Point3d::new(0.0, 0.0, 0.5), Point3d::new(2.0, 0.0, 0.5), Point3d::new(2.0, 2.0, 0.5)],
        ));
        let wire = make_polyline(&mut store, &[Point3d::new(-1.0, 0.5, 0.5), Point3d::new(2.0, 0.5, 0.5)]);
        assert!(matches!(
            run(&mut store, a.clone(), face.clone(), Operation::Fuse),
            Err(BooleanError::InvalidArgument { .. })
        ));
        assert!(matches!(
            run(&mut store, a.clone(), wire.clone(), Operation::Cut),
            Err(BooleanError::InvalidArgument { .. })
        ));
        assert!(matches!(
            run(&mut store, face.clone(), a.clone(), Operation::Common),
            Err(BooleanError::InvalidArgument { .. })
        ));
        assert!(matches!(
            run(&mut store, a.clone(), face.clone(), Operation::Cut),
            Err(BooleanError::InvalidArgument { .. })
        ));
        assert!(run(&mut store, wire, face.clone(), Operation::Common).is_ok());
        assert!(run(&mut store, a, face, Operation::Section).is_ok());
    }

    fn square(store: &mut EntityStore) -> Shape {
        Shape::Face(make_planar_face(
            store,
            &[
                Point3d::new(0.0, 0.0, 0.0),
                Point3d::new(2.0, 0.0, 0.0),
                Point3d::new(2.0, 2.0, 0.0),
                Point3d::new(0.0, 2.0, 0.0),
            ],
        ))
    }

    fn edge_lengths(store: &EntityStore, shape: &Shape) -> Vec<f64> {
        let mut lengths: Vec<f64> = store
            .explore_kind(shape, EntityKind::Edge)
            .into_iter()
            .filter_map(|r| match r {
                EntityRef::Edge(e) => Some(store.edges[e].curve.length(store.edges[e].t_start, store.edges[e].t_end)),
                _ => None,
            })
            .collect();
        lengths.sort_by(f64::total_cmp);
        lengths
    }

    #[test]
    fn wire_across_a_face_keeps_the_part_on_it() {
        let mut store = EntityStore::new();
        let face = square(&mut store);
        let wire = make_polyline(&mut store, &[Point3d::new(-1.0, 1.0, 0.0), Point3d::new(3.0, 1.0, 0.0)]);

        let on = run(&mut store, wire.clone(), face.clone(), Operation::Common).unwrap();
        let lengths = edge_lengths(&store, &on.shape);
        assert_eq!(lengths.len(), 1);
        assert_abs_diff_eq!(lengths[0], 2.0, epsilon = 1e-7);

        let off = run(&mut store, wire, face, Operation::Cut).unwrap();
        let lengths = edge_lengths(&store, &off.shape);
        assert_eq!(lengths.len(), 2);
        assert_abs_diff_eq!(lengths[0], 1.0, epsilon = 1e-7);
        assert_abs_diff_eq!(lengths[1], 1.0, epsilon = 1e-7);
    }

    #[test]
    fn wire_missing_a_face_has_empty_common() {
        let mut store = EntityStore::new();
        let face = square(&mut store);
        let beside = make_polyline(&mut store, &[Point3d::new(-1.0, 5.0, 0.0), Point3d::new(3.0, 5.0, 0.0)]);
        let through = make_polyline(&mut store, &[Point3d::new(1.0, 1.0, -1.0), Point3d::new(1.0, 1.0, 1.0)]);

        for wire in [beside.clone(), through.clone()] {
            let out = run(&mut store, wire, face.clone(), Operation::Common).unwrap();
            assert!(out.shape.is_empty(), "{:?}", out.shape);
        }
        let kept = run(&mut store, beside.clone(), face.clone(), Operation::Cut).unwrap();
        assert_eq!(kept.shape, beside);
        // A transversal wire is split at the face but nothing of it lies on the face.
        let split = run(&mut store, through, face, Operation::Cut).unwrap();
        assert_eq!(edge_lengths(&store, &split.shape).len(), 2);
    }

    #[test]
    fn unused_intermediate_entities_are_pruned() {
        let mut store = EntityStore::new();
        let (a, b) = cubes(&mut store, 0.5);
        let original = store.clone();
        let out = run(&mut store, a, b, Operation::Common).unwrap();
        let result: HashSet<EntityRef> = store.explore(&out.shape).into_iter().collect();
        for face in store.faces.keys() {
            assert!(original.faces.contains_key(face) || result.contains(&EntityRef::Face(face)));
        }
        for edge in store.edges.keys() {
            assert!(original.edges.contains_key(edge) || result.contains(&EntityRef::Edge(edge)));
        }
    }

    #[test]
    fn disjoint_cut_returns_object_unchanged() {
        let mut store = EntityStore::new();
        let (a, b) = cubes(&mut store, 3.0);
        let out = run(&mut store, a.clone(), b.clone(), Operation::Cut).unwrap();
        assert_eq!(out.shape, a);
        let Shape::Solid(a_id) = a else { unreachable!() };
        let Shape::Solid(b_id) = b else { unreachable!() };
        assert_eq!(out.history.status(EntityRef::Solid(a_id)), Some(&EntityStatus::Unchanged));
        assert!(out.history.is_deleted(EntityRef::Solid(b_id)));
    }
}

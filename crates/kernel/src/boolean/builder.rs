//! Assembly of the result from classified fragments.
//!
//! Solid operands go through face selection, shell grouping by shared
//! edges, orientation and void placement. Wire operands and sections
//! collect result edges straight from the pave table.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, instrument};

use super::classify::{
    FragmentClassifier, FragmentState, MembershipTester, OperandProbes, PointClassification, SolidProbe, face_samples,
};
use super::disjoint_set::DisjointSet;
use super::ds::{DataStructure, EntityId, Rank};
use super::history::HistoryCollector;
use super::interference::{FaceRegion, InterferenceTable};
use super::options::{Operation, Tuning};
use super::pave::{PaveBlock, PaveTable};
use super::progress::{ProgressToken, Stage};
use super::report::{BooleanError, Report, WarningKind};
use super::split::FaceFragment;
use crate::geometry::Evaluable;
use crate::geometry::point::Point3d;
use crate::geometry::polygon::Containment;
use crate::topology::brep::*;
use crate::topology::shape::{EntityRef, Shape};
use crate::validation::audit::audit_faces;
use crate::validation::volume::faces_volume;

/// A face of the result with the operand faces it stands for.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedFace {
    pub face: FaceId,
    pub sources: Vec<EntityId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pick {
    Keep,
    Reversed,
    Drop,
}

struct BuiltShell {
    id: ShellId,
    faces: Vec<FaceId>,
    orientation: ShellOrientation,
    probe: SolidProbe,
    volume: f64,
    sources: Vec<EntityId>,
}

pub struct ResultBuilder<'a> {
    pub operation: Operation,
    pub tuning: &'a Tuning,
    pub progress: &'a ProgressToken,
    pub fuzzy: f64,
}

impl ResultBuilder<'_> {
    // ─── Solids ─────────────────────────────────────────────────────────

    /// Classify every fragment that is not same-domain and keep the ones
    /// the operation needs. Tool faces kept by Cut are reversed.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(operation = ?self.operation, fragments = fragments.len()))]
    pub fn select_faces(
        &self,
        store: &mut EntityStore,
        ds: &DataStructure,
        fragments: &[FaceFragment],
        classifier: &mut FragmentClassifier<'_>,
        probes: &OperandProbes,
        history: &mut HistoryCollector,
        report: &mut Report,
    ) -> Result<Vec<SelectedFace>, BooleanError> {
        let same_domain = same_domain_pairs(store, ds, fragments);

        let mut requests = Vec::new();
        let mut requested = Vec::new();
        for (i, frag) in fragments.iter().enumerate() {
            if same_domain.contains_key(&i) {
                continue;
            }
            if let Some(rank) = frag.ranks.single() {
                requests.push((frag.face, rank.other()));
                requested.push(i);
            }
        }
        let states: HashMap<usize, FragmentState> = requested
            .into_iter()
            .zip(classifier.classify_faces(store, &requests, probes, report)?)
            .collect();

        let mut selected = Vec::new();
        for (i, frag) in fragments.iter().enumerate() {
            if let Some(&(partner, same)) = same_domain.get(&i) {
                let keep = match self.operation {
                    Operation::Fuse | Operation::Common => same,
                    Operation::Cut => !same,
                    Operation::Section => false,
                };
                // The object copy stands for the pair.
                if keep && frag.ranks.contains(Rank::Object) {
                    let mut sources = vec![frag.source];
                    if partner != i {
                        let other = fragments[partner].source;
                        history.add_image(ds.entity(other).shape, EntityRef::Face(frag.face));
                        sources.push(other);
                    }
                    selected.push(SelectedFace { face: frag.face, sources });
                }
                continue;
            }
            let (Some(rank), Some(&state)) = (frag.ranks.single(), states.get(&i)) else {
                continue;
            };
            match self.pick(rank, state) {
                Pick::Keep => selected.push(SelectedFace {
                    face: frag.face,
                    sources: vec![frag.source],
                }),
                Pick::Reversed => {
                    let face = store.reversed_face(frag.face);
                    history.add_image(ds.entity(frag.source).shape, EntityRef::Face(face));
                    selected.push(SelectedFace {
                        face,
                        sources: vec![frag.source],
                    });
                }
                Pick::Drop => {}
            }
        }
        info!(
            selected = selected.len(),
            same_domain = same_domain.len(),
            "faces selected"
        );
        Ok(selected)
    }

    fn pick(&self, rank: Rank, state: FragmentState) -> Pick {
        match (self.operation, rank, state) {
            (Operation::Section, _, _) => Pick::Drop,
            (Operation::Fuse, _, FragmentState::Out) => Pick::Keep,
            (Operation::Common, _, FragmentState::In) => Pick::Keep,
            (Operation::Cut, Rank::Object, FragmentState::Out) => Pick::Keep,
            (Operation::Cut, Rank::Tool, FragmentState::In) => Pick::Reversed,
            (_, Rank::Object, FragmentState::OnBoundary) => Pick::Keep,
            _ => Pick::Drop,
        }
    }

    /// Group selected faces into shells and shells into solids.
    #[instrument(skip_all, fields(faces = selected.len()))]
    pub fn assemble_solids(
        &self,
        store: &mut EntityStore,
        ds: &DataStructure,
        selected: &[SelectedFace],
        tester: &dyn MembershipTester,
        history: &mut HistoryCollector,
        report: &mut Report,
    ) -> Result<Shape, BooleanError> {
        if selected.is_empty() {
            info!("nothing selected; empty result");
            return Ok(Shape::Empty);
        }
        let faces: Vec<FaceId> = selected.iter().map(|s| s.face).collect();

        let mut shells = Vec::new();
        for group in shell_groups(store, &faces) {
            self.progress.check(Stage::Build)?;
            let shell_faces: Vec<FaceId> = group.iter().map(|&i| faces[i]).collect();
            let audit = audit_faces(store, &shell_faces);
            if !audit.is_closed() {
                report.push(
                    WarningKind::AssemblyAmbiguous,
                    shell_faces.iter().map(|&f| EntityRef::Face(f)).collect(),
                    format!("result shell is not closed ({} topology errors)", audit.errors.len()),
                );
            }
            let orientation = self.orientation(store, tester, &shell_faces);
            let id = reuse_shell(store, ds, &shell_faces).unwrap_or_else(|| store.add_shell(shell_faces.clone(), orientation));
            let mut sources: Vec<EntityId> = group.iter().flat_map(|&i| selected[i].sources.iter().copied()).collect();
            sources.sort();
            sources.dedup();
            shells.push(BuiltShell {
                id,
                probe: SolidProbe::new(store, shell_faces.iter().copied()),
                volume: faces_volume(store, &shell_faces).abs(),
                faces: shell_faces,
                orientation,
                sources,
            });
        }

        let (outer, voids): (Vec<BuiltShell>, Vec<BuiltShell>) =
            shells.into_iter().partition(|s| s.orientation == ShellOrientation::Outward);
        let mut members: Vec<Vec<&BuiltShell>> = outer.iter().map(|s| vec![s]).collect();
        for void in &voids {
            let tol = self.shell_tolerance(store, &void.faces);
            let owner = face_samples(store, void.faces[0], tol, 1).first().and_then(|(p, _)| {
                outer
                    .iter()
                    .enumerate()
                    .filter(|(_, o)| tester.classify(&o.probe, p, tol) == PointClassification::Inside)
                    .min_by(|a, b| a.1.volume.total_cmp(&b.1.volume))
                    .map(|(i, _)| i)
            });
            match owner {
                Some(i) => members[i].push(void),
                None => report.push(
                    WarningKind::AssemblyAmbiguous,
                    vec![EntityRef::Shell(void.id)],
                    "inward shell outside every outer shell dropped",
                ),
            }
        }

        let mut solids = Vec::with_capacity(members.len());
        for shells in members {
            let ids: Vec<ShellId> = shells.iter().map(|s| s.id).collect();
            let solid = reuse_solid(store, ds, &ids).unwrap_or_else(|| store.add_solid(ids.clone()));
            for shell in &shells {
                record_owner_images(ds, history, &shell.sources, EntityRef::Shell(shell.id), EntityRef::Solid(solid));
            }
            debug!(?solid, shells = ids.len(), "solid assembled");
            solids.push(EntityRef::Solid(solid));
        }
        if solids.is_empty() {
            return Err(BooleanError::NoValidOutput {
                reason: format!("{} faces selected but no outer shell could be formed", selected.len()),
            });
        }
        info!(solids = solids.len(), voids = voids.len(), "solids assembled");
        Ok(Shape::from_entities(solids))
    }

    fn shell_tolerance(&self, store: &EntityStore, faces: &[FaceId]) -> f64 {
        faces.iter().map(|&f| store.faces[f].tolerance).fold(0.0, f64::max) + self.fuzzy
    }

    /// Outward when a point just off a face, along its normal, lies outside
    /// the shell.
    fn orientation(&self, store: &EntityStore, tester: &dyn MembershipTester, faces: &[FaceId]) -> ShellOrientation {
        let probe = SolidProbe::new(store, faces.iter().copied());
        let tol = self.shell_tolerance(store, faces);
        let offset = self.tuning.normal_offset_factor * tol;
        for &face in faces.iter().take(self.tuning.classification_attempts.max(1)) {
            for (p, n) in face_samples(store, face, tol, 1) {
                match tester.classify(&probe, &(p + n * offset), tol) {
                    PointClassification::Outside => return ShellOrientation::Outward,
                    PointClassification::Inside => return ShellOrientation::Inward,
                    PointClassification::OnBoundary => {}
                }
            }
        }
        if faces_volume(store, faces) >= 0.0 {
            ShellOrientation::Outward
        } else {
            ShellOrientation::Inward
        }
    }

    // ─── Wires ──────────────────────────────────────────────────────────

    /// Result edges when at least one operand is a wire. Against a solid
    /// tool a block is classified by its midpoint; against faces it is on
    /// the tool when the midpoint lies on one of them.
    #[instrument(skip_all, fields(operation = ?self.operation))]
    pub fn select_edges(
        &self,
        store: &EntityStore,
        ds: &DataStructure,
        paves: &PaveTable,
        classifier: &FragmentClassifier<'_>,
        probes: &OperandProbes,
    ) -> Result<Shape, BooleanError> {
        let tool_probe = probes.get(Rank::Tool);
        let tool_faces: Vec<(FaceRegion, f64)> = match tool_probe {
            Some(_) => Vec::new(),
            None => ds
                .operand_faces(Rank::Tool)
                .into_iter()
                .filter_map(|f| Some((FaceRegion::of(store, ds.face(f)?)?, ds.tolerance(f))))
                .collect(),
        };
        let mut edges: Vec<EntityRef> = Vec::new();
        for (i, block) in paves.blocks().iter().enumerate() {
            if i % self.tuning.batch_size.max(1) == 0 {
                self.progress.check(Stage::Build)?;
            }
            let Some((edge, _)) = block.result else { continue };
            let ranks = ds.ranks(block.edge);
            let on_both = on_both_operands(ds, paves, i);
            let keep = match (self.operation, tool_probe) {
                (Operation::Fuse, _) => !ranks.is_new(),
                _ if !ranks.contains(Rank::Object) => false,
                (Operation::Section, _) => false,
                (operation, None) if !tool_faces.is_empty() => {
                    let on_tool = on_both
                        || block_midpoint(store, ds, block).is_some_and(|mid| {
                            tool_faces
                                .iter()
                                .any(|(region, tol)| on_region(region, &mid, block.tolerance + tol + self.fuzzy))
                        });
                    (operation == Operation::Common) == on_tool
                }
                (Operation::Common, None) => on_both,
                (Operation::Cut, None) => !on_both,
                (operation, Some(probe)) => {
                    let state = if on_both {
                        FragmentState::OnBoundary
                    } else {
                        match block_midpoint(store, ds, block) {
                            Some(mid) => classifier.classify_point(probe, &mid, block.tolerance),
                            None => continue,
                        }
                    };
                    match operation {
                        Operation::Common => state != FragmentState::Out,
                        Operation::Cut => state == FragmentState::Out,
                        _ => false,
                    }
                }
            };
            push_unique(&mut edges, EntityRef::Edge(edge), keep);
        }
        info!(edges = edges.len(), "wire result collected");
        Ok(Shape::from_entities(edges))
    }

    // ─── Section ────────────────────────────────────────────────────────

    /// Intersection curves, coincident edges, edges lying in faces of the
    /// other operand and isolated contact vertices.
    #[instrument(skip_all, fields(sections = table.sections.len()))]
    pub fn section(
        &self,
        store: &EntityStore,
        ds: &DataStructure,
        table: &InterferenceTable,
        paves: &PaveTable,
    ) -> Result<Shape, BooleanError> {
        self.progress.check(Stage::Build)?;
        let mut out: Vec<EntityRef> = Vec::new();
        let result_of = |b: usize| paves.block(b).result.map(|(e, _)| EntityRef::Edge(e));

        for section in &table.sections {
            for &b in paves.blocks_of(section.edge) {
                if let Some(r) = result_of(b) {
                    push_unique(&mut out, r, true);
                }
            }
        }
        for (i, block) in paves.blocks().iter().enumerate() {
            if ds.ranks(block.edge).is_shared() || on_both_operands(ds, paves, i) {
                if let Some(r) = result_of(i) {
                    push_unique(&mut out, r, true);
                }
            }
        }
        for (e, f) in table.edges_in_faces() {
            let Some(region) = ds.face(f).and_then(|face| FaceRegion::of(store, face)) else {
                continue;
            };
            for &b in paves.blocks_of(e) {
                let block = paves.block(b);
                let inside = block_midpoint(store, ds, block)
                    .is_some_and(|mid| on_region(&region, &mid, block.tolerance + ds.tolerance(f) + self.fuzzy));
                if let (true, Some(r)) = (inside, result_of(b)) {
                    push_unique(&mut out, r, true);
                }
            }
        }

        let used: HashSet<VertexId> = out
            .iter()
            .filter_map(|r| match r {
                EntityRef::Edge(e) => Some(&store.edges[*e]),
                _ => None,
            })
            .flat_map(|e| [e.start_vertex, e.end_vertex])
            .collect();
        let mut isolated = 0;
        for v in table.contact_vertices() {
            if let Some(vertex) = ds.vertex(ds.real_vertex(v)) {
                if !used.contains(&vertex) && !out.contains(&EntityRef::Vertex(vertex)) {
                    out.push(EntityRef::Vertex(vertex));
                    isolated += 1;
                }
            }
        }
        info!(items = out.len(), isolated, "section collected");
        Ok(Shape::from_entities(out))
    }
}

fn push_unique(list: &mut Vec<EntityRef>, r: EntityRef, keep: bool) {
    if keep && !list.contains(&r) {
        list.push(r);
    }
}

fn block_midpoint(store: &EntityStore, ds: &DataStructure, block: &PaveBlock) -> Option<Point3d> {
    let edge = ds.edge(block.edge)?;
    Some(store.edges[edge].curve.point_at(0.5 * (block.start.t + block.end.t)))
}

/// In the plane of the region and not outside its boundary.
fn on_region(region: &FaceRegion, p: &Point3d, tol: f64) -> bool {
    region.frame.height(p).abs() <= tol && region.containment(p, tol) != Containment::Outside
}

/// The block's common block holds blocks of both operands.
fn on_both_operands(ds: &DataStructure, paves: &PaveTable, block: usize) -> bool {
    paves.common_of(block).is_some_and(|cb| {
        let has = |rank: Rank| cb.blocks.iter().any(|&b| ds.ranks(paves.block(b).edge).contains(rank));
        has(Rank::Object) && has(Rank::Tool)
    })
}

/// `Some(same orientation)` when two faces lie on one surface.
fn coincident_orientation(store: &EntityStore, a: FaceId, b: FaceId, tol: f64) -> Option<bool> {
    match (store.face_frame(a), store.face_frame(b)) {
        (Some(fa), Some(fb)) => {
            let parallel = fa.normal.is_parallel_to(&fb.normal, crate::default_tolerance().angular);
            (parallel && fa.height(&fb.origin).abs() <= tol).then_some(fa.normal.dot(&fb.normal) > 0.0)
        }
        (None, None) => {
            let (fa, fb) = (&store.faces[a], &store.faces[b]);
            (fa.surface == fb.surface).then_some(fa.same_sense == fb.same_sense)
        }
        _ => None,
    }
}

/// Fragment index -> (partner, same orientation) for fragments of both
/// operands bounded by the same edges on the same surface. A face shared
/// by both operands is its own partner. Planes count as one surface under
/// the same reach face/face interference uses.
fn same_domain_pairs(store: &EntityStore, ds: &DataStructure, fragments: &[FaceFragment]) -> HashMap<usize, (usize, bool)> {
    let mut out = HashMap::new();
    let mut by_edges: HashMap<Vec<EdgeId>, Vec<usize>> = HashMap::new();
    for (i, frag) in fragments.iter().enumerate() {
        if frag.ranks.is_shared() {
            out.insert(i, (i, true));
            continue;
        }
        let mut edges = store.face_edges(frag.face);
        edges.sort();
        edges.dedup();
        by_edges.entry(edges).or_default().push(i);
    }
    for group in by_edges.values() {
        let find = |rank: Rank| group.iter().copied().find(|&i| fragments[i].ranks.contains(rank));
        let (Some(a), Some(b)) = (find(Rank::Object), find(Rank::Tool)) else {
            continue;
        };
        let (fa, fb) = (fragments[a].face, fragments[b].face);
        let tol = ds.tolerance(fragments[a].source) + ds.tolerance(fragments[b].source) + ds.fuzzy();
        if let Some(same) = coincident_orientation(store, fa, fb, tol) {
            debug!(object = ?fa, tool = ?fb, same, "same-domain faces");
            out.insert(a, (b, same));
            out.insert(b, (a, same));
        }
    }
    out
}

/// Connected face sets, lone faces included. Faces join across edges used
/// by exactly two of them, so edge-touching solids stay apart.
fn shell_groups(store: &EntityStore, faces: &[FaceId]) -> Vec<Vec<usize>> {
    let mut users: HashMap<EdgeId, Vec<usize>> = HashMap::new();
    for (i, &f) in faces.iter().enumerate() {
        let mut edges = store.face_edges(f);
        edges.sort();
        edges.dedup();
        for e in edges {
            users.entry(e).or_default().push(i);
        }
    }
    let mut sets = DisjointSet::new(faces.len());
    for list in users.values() {
        if let [a, b] = list.as_slice() {
            sets.union(*a, *b);
        }
    }
    sets.sets()
}

fn reuse_shell(store: &EntityStore, ds: &DataStructure, faces: &[FaceId]) -> Option<ShellId> {
    let mut key = faces.to_vec();
    key.sort();
    let first = ds.id_of(EntityRef::Face(*key.first()?))?;
    ds.owners(first)
        .iter()
        .filter_map(|&o| match ds.entity(o).shape {
            EntityRef::Shell(s) => Some(s),
            _ => None,
        })
        .find(|&s| {
            let mut existing = store.shells[s].faces.clone();
            existing.sort();
            existing == key
        })
}

fn reuse_solid(store: &EntityStore, ds: &DataStructure, shells: &[ShellId]) -> Option<SolidId> {
    let mut key = shells.to_vec();
    key.sort();
    let first = ds.id_of(EntityRef::Shell(*key.first()?))?;
    ds.owners(first)
        .iter()
        .filter_map(|&o| match ds.entity(o).shape {
            EntityRef::Solid(s) => Some(s),
            _ => None,
        })
        .find(|&s| {
            let mut existing = store.solids[s].shells.clone();
            existing.sort();
            existing == key
        })
}

/// Input shells owning a source face map to `shell`; their solids map to `solid`.
fn record_owner_images(
    ds: &DataStructure,
    history: &mut HistoryCollector,
    sources: &[EntityId],
    shell: EntityRef,
    solid: EntityRef,
) {
    for &face in sources {
        for &owner in ds.owners(face) {
            let input_shell = ds.entity(owner).shape;
            if !matches!(input_shell, EntityRef::Shell(_)) {
                continue;
            }
            if input_shell != shell {
                history.add_image(input_shell, shell);
            }
            for &grand in ds.owners(owner) {
                let input_solid = ds.entity(grand).shape;
                if input_solid != solid {
                    history.add_image(input_solid, solid);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boolean::classify::RayCastTester;
    use crate::topology::primitives::{make_box, make_planar_face};

    #[test]
    fn reversed_copy_is_opposite_same_domain() {
        let mut store = EntityStore::new();
        let solid = make_box(&mut store, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0);
        let faces = store.solid_faces(solid);
        let rev = store.reversed_face(faces[0]);
        assert_eq!(coincident_orientation(&store, faces[0], faces[0], 1e-7), Some(true));
        assert_eq!(coincident_orientation(&store, faces[0], rev, 1e-7), Some(false));
        assert!(faces[1..].iter().all(|&f| coincident_orientation(&store, faces[0], f, 1e-7) != Some(true)));
    }

    #[test]
    fn separate_boxes_form_two_shells() {
        let mut store = EntityStore::new();
        let a = make_box(&mut store, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0);
        let b = make_box(&mut store, 2.0, 0.0, 0.0, 3.0, 1.0, 1.0);
        let mut faces = store.solid_faces(a);
        faces.extend(store.solid_faces(b));
        let groups = shell_groups(&store, &faces);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.len() == 6));
    }

    #[test]
    fn lone_face_is_kept_as_its_own_group() {
        let mut store = EntityStore::new();
        let solid = make_box(&mut store, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0);
        let lone = make_planar_face(
            &mut store,
            &[Point3d::new(3.0, 0.0, 0.0), Point3d::new(4.0, 0.0, 0.0), Point3d::new(4.0, 1.0, 0.0)],
        );
        let mut faces = store.solid_faces(solid);
        faces.push(lone);
        let groups = shell_groups(&store, &faces);
        assert_eq!(groups.len(), 2);
        assert!(groups.contains(&vec![6]));

        let selected: Vec<SelectedFace> = faces.iter().map(|&face| SelectedFace { face, sources: vec![] }).collect();
        let tuning = Tuning::default();
        let progress = ProgressToken::new();
        let builder = ResultBuilder {
            operation: Operation::Fuse,
            tuning: &tuning,
            progress: &progress,
            fuzzy: 0.0,
        };
        let mut report = Report::default();
        builder
            .assemble_solids(
                &mut store,
                &DataStructure::new(0.0),
                &selected,
                &RayCastTester::default(),
                &mut HistoryCollector::default(),
                &mut report,
            )
            .unwrap();
        assert!(
            report
                .warnings
                .iter()
                .any(|w| w.kind == WarningKind::AssemblyAmbiguous && w.entities.contains(&EntityRef::Face(lone))),
            "{report:?}"
        );
    }
}

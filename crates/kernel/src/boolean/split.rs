//! Splitting operand faces into fragments along section and in-face edges.
//!
//! Each planar face is rebuilt as a graph of directed edge uses (darts):
//! boundary darts keep the direction of the input loops, internal edges
//! contribute a dart each way. Loops are traced by always taking the
//! smallest clockwise turn from the reverse of the arrival direction,
//! which keeps the enclosed region on the left.

use std::collections::{HashMap, HashSet};
use std::f64::consts::{PI, TAU};

use tracing::{debug, info, instrument};

use super::ds::{DataStructure, EntityId, Ranks};
use super::history::HistoryCollector;
use super::interference::{FaceRegion, InterferenceTable};
use super::options::Tuning;
use super::pave::PaveTable;
use super::progress::{ProgressToken, Stage};
use super::report::{BooleanError, Report, WarningKind};
use crate::geometry::curves::Curve;
use crate::geometry::point::Point2d;
use crate::geometry::polygon::{self, Containment};
use crate::geometry::Evaluable;
use crate::topology::brep::*;
use crate::topology::shape::{EntityKind, EntityRef};

/// A face of the split operands: either an input face kept as is or a
/// new face covering part of one.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceFragment {
    pub source: EntityId,
    pub face: FaceId,
    pub ranks: Ranks,
    pub original: bool,
}

/// Directed use of a result edge inside one face.
#[derive(Debug, Clone)]
struct Dart {
    edge: EdgeId,
    forward: bool,
    from: VertexId,
    to: VertexId,
    /// Angle of the leaving direction at `from`.
    out_angle: f64,
    /// Angle of the arriving direction at `to`.
    in_angle: f64,
    /// Polyline from `from`, excluding `to`.
    points: Vec<Point2d>,
}

fn make_dart(store: &EntityStore, frame: &FaceFrame, edge: EdgeId, forward: bool) -> Dart {
    let e = &store.edges[edge];
    let n = match e.curve {
        Curve::Line(_) => 1,
        Curve::Circle(_) => 16,
    };
    let mut samples = e.curve.sample(e.t_start, e.t_end, n);
    let (from, to, t_from, t_to, sign) = if forward {
        (e.start_vertex, e.end_vertex, e.t_start, e.t_end, 1.0)
    } else {
        samples.reverse();
        (e.end_vertex, e.start_vertex, e.t_end, e.t_start, -1.0)
    };
    samples.pop();
    let angle = |t: f64| {
        let (dx, dy) = frame.direction_2d(&(e.curve.derivative_at(t) * sign));
        dy.atan2(dx)
    };
    Dart {
        edge,
        forward,
        from,
        to,
        out_angle: angle(t_from),
        in_angle: angle(t_to),
        points: samples.iter().map(|p| frame.to_2d(p)).collect(),
    }
}

/// A traced loop: dart indices and its polygon.
struct TracedLoop {
    darts: Vec<usize>,
    ring: Vec<Point2d>,
    area: f64,
}

pub struct FaceSplitter<'a> {
    pub tuning: &'a Tuning,
    pub progress: &'a ProgressToken,
}

impl FaceSplitter<'_> {
    /// Fragments of every operand face, in registration order.
    #[instrument(skip_all)]
    pub fn split_all(
        &self,
        store: &mut EntityStore,
        ds: &DataStructure,
        table: &InterferenceTable,
        paves: &PaveTable,
        history: &mut HistoryCollector,
        report: &mut Report,
    ) -> Result<Vec<FaceFragment>, BooleanError> {
        let mut internal: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
        for section in &table.sections {
            for &f in &section.faces {
                internal.entry(f).or_default().push(section.edge);
            }
        }
        for (e, f) in table.edges_in_faces() {
            internal.entry(f).or_default().push(e);
        }

        let faces: Vec<EntityId> = ds
            .ids_of_kind(EntityKind::Face)
            .filter(|&f| !ds.ranks(f).is_new())
            .collect();
        let mut fragments = Vec::new();
        for (i, &f) in faces.iter().enumerate() {
            if i % self.tuning.batch_size.max(1) == 0 {
                self.progress.check(Stage::Classification)?;
            }
            let extra = internal.get(&f).map(Vec::as_slice).unwrap_or(&[]);
            fragments.extend(self.split_face(store, ds, paves, history, report, f, extra));
        }
        info!(faces = faces.len(), fragments = fragments.len(), "faces split");
        Ok(fragments)
    }

    #[allow(clippy::too_many_arguments)]
    fn split_face(
        &self,
        store: &mut EntityStore,
        ds: &DataStructure,
        paves: &PaveTable,
        history: &mut HistoryCollector,
        report: &mut Report,
        f: EntityId,
        internal_edges: &[EntityId],
    ) -> Vec<FaceFragment> {
        let ranks = ds.ranks(f);
        let Some(face_id) = ds.face(f) else { return vec![] };
        let original = vec![FaceFragment {
            source: f,
            face: face_id,
            ranks,
            original: true,
        }];

        let mut boundary: Vec<Vec<(EdgeId, bool)>> = Vec::new();
        let mut changed = false;
        for loop_id in store.face_loops(face_id).collect::<Vec<_>>() {
            let mut uses = Vec::new();
            for &he in &store.loops[loop_id].half_edges {
                let he = store.half_edges[he];
                let Some(e) = ds.id_of(EntityRef::Edge(he.edge)) else { continue };
                changed |= paves.is_split(ds, e);
                uses.extend(paves.edge_images(e, he.forward));
            }
            boundary.push(uses);
        }
        let on_boundary: HashSet<EdgeId> = boundary.iter().flatten().map(|(e, _)| *e).collect();

        let region = FaceRegion::of(store, face_id);
        let mut inner: Vec<EdgeId> = Vec::new();
        for &e in internal_edges {
            for &b in paves.blocks_of(e) {
                let block = paves.block(b);
                let Some((edge, _)) = block.result else { continue };
                if on_boundary.contains(&edge) || inner.contains(&edge) {
                    continue;
                }
                if let Some(region) = &region {
                    let Some(src) = ds.edge(block.edge) else { continue };
                    let mid = store.edges[src].curve.point_at(0.5 * (block.start.t + block.end.t));
                    if region.containment(&mid, block.tolerance + ds.fuzzy()) != Containment::Inside {
                        continue;
                    }
                }
                inner.push(edge);
            }
        }

        if !changed && inner.is_empty() {
            return original;
        }
        let Some(region) = region else {
            report.push(
                WarningKind::IntersectionFailed,
                vec![EntityRef::Face(face_id)],
                "curved face crossed by other operand kept unsplit",
            );
            return original;
        };

        let mut darts: Vec<Dart> = boundary
            .iter()
            .flatten()
            .map(|&(e, fwd)| make_dart(store, &region.frame, e, fwd))
            .collect();
        for e in prune_dangling(store, &on_boundary, inner) {
            darts.push(make_dart(store, &region.frame, e, true));
            darts.push(make_dart(store, &region.frame, e, false));
        }

        let loops = self.trace(&darts, report, face_id);
        let face = &store.faces[face_id];
        let (surface, same_sense, tolerance) = (face.surface.clone(), face.same_sense, ds.tolerance(f));

        let (outers, holes): (Vec<&TracedLoop>, Vec<&TracedLoop>) = loops
            .iter()
            .filter(|l| l.area.abs() > tolerance * tolerance)
            .partition(|l| l.area > 0.0);
        let mut hole_lists: Vec<Vec<&TracedLoop>> = vec![Vec::new(); outers.len()];
        for hole in holes {
            let probe = hole.ring[0];
            let owner = outers
                .iter()
                .enumerate()
                .filter(|(_, o)| polygon::point_in_ring(&probe, &o.ring, tolerance) == Containment::Inside)
                .min_by(|a, b| a.1.area.total_cmp(&b.1.area))
                .map(|(i, _)| i);
            match owner {
                Some(i) => hole_lists[i].push(hole),
                None => debug!(face = ?face_id, "hole loop without an enclosing outer loop dropped"),
            }
        }

        let uses_of = |l: &TracedLoop| -> Vec<(EdgeId, bool)> {
            l.darts.iter().map(|&d| (darts[d].edge, darts[d].forward)).collect()
        };
        let mut out = Vec::with_capacity(outers.len());
        for (outer, holes) in outers.iter().zip(hole_lists) {
            let outer_loop = store.add_loop(&uses_of(outer));
            let inner_loops = holes.iter().map(|h| store.add_loop(&uses_of(h))).collect();
            let new_face = store.add_face(surface.clone(), same_sense, outer_loop, inner_loops, tolerance);
            history.add_image(EntityRef::Face(face_id), EntityRef::Face(new_face));
            out.push(FaceFragment {
                source: f,
                face: new_face,
                ranks,
                original: false,
            });
        }
        debug!(face = ?face_id, fragments = out.len(), "face split");
        out
    }

    /// Trace every dart into closed loops.
    fn trace(&self, darts: &[Dart], report: &mut Report, face: FaceId) -> Vec<TracedLoop> {
        let mut outgoing: HashMap<VertexId, Vec<usize>> = HashMap::new();
        for (i, d) in darts.iter().enumerate() {
            outgoing.entry(d.from).or_default().push(i);
        }
        let tie = self.tuning.turning_angle_tie;
        let mut ambiguous = false;
        let next = |d: usize, ambiguous: &mut bool| -> Option<usize> {
            let dart = &darts[d];
            let back = dart.in_angle + PI;
            let mut best: Vec<(f64, usize)> = outgoing
                .get(&dart.to)?
                .iter()
                .filter(|&&c| !(darts[c].edge == dart.edge && darts[c].forward != dart.forward) || darts[c].from == darts[c].to)
                .map(|&c| {
                    let mut cw = (back - darts[c].out_angle).rem_euclid(TAU);
                    if cw <= tie {
                        cw += TAU;
                    }
                    (cw, c)
                })
                .collect();
            if best.is_empty() {
                // Only the way back is left.
                return outgoing[&dart.to]
                    .iter()
                    .copied()
                    .find(|&c| darts[c].edge == dart.edge);
            }
            best.sort_by(|a, b| a.0.total_cmp(&b.0));
            if best.len() > 1 && best[1].0 - best[0].0 <= tie {
                *ambiguous = true;
            }
            Some(best[0].1)
        };

        let mut used = vec![false; darts.len()];
        let mut loops = Vec::new();
        for start in 0..darts.len() {
            if used[start] {
                continue;
            }
            let mut path = vec![start];
            used[start] = true;
            let mut d = start;
            let closed = loop {
                match next(d, &mut ambiguous) {
                    Some(n) if n == start => break true,
                    Some(n) if !used[n] && path.len() < darts.len() => {
                        used[n] = true;
                        path.push(n);
                        d = n;
                    }
                    _ => break false,
                }
            };
            if !closed {
                ambiguous = true;
                continue;
            }
            let ring: Vec<Point2d> = path.iter().flat_map(|&i| darts[i].points.iter().copied()).collect();
            let area = polygon::signed_area(&ring);
            loops.push(TracedLoop { darts: path, ring, area });
        }
        if ambiguous {
            report.push(
                WarningKind::AssemblyAmbiguous,
                vec![EntityRef::Face(face)],
                "face loops traced through an ambiguous turn",
            );
        }
        loops
    }
}

/// Drop internal edges with a free end, repeatedly.
fn prune_dangling(store: &EntityStore, boundary: &HashSet<EdgeId>, mut inner: Vec<EdgeId>) -> Vec<EdgeId> {
    loop {
        let mut degree: HashMap<VertexId, usize> = HashMap::new();
        for &e in boundary.iter().chain(inner.iter()) {
            let edge = &store.edges[e];
            *degree.entry(edge.start_vertex).or_default() += 1;
            *degree.entry(edge.end_vertex).or_default() += 1;
        }
        let before = inner.len();
        inner.retain(|&e| {
            let edge = &store.edges[e];
            degree[&edge.start_vertex] > 1 && degree[&edge.end_vertex] > 1
        });
        if inner.len() == before {
            return inner;
        }
    }
}

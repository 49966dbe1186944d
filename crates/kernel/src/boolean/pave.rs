//! Split points on edges and the fragments between them.
//!
//! Every edge ends up as a sequence of pave blocks. Blocks from different
//! edges that run between the same vertices over the same geometry are
//! grouped into a common block and share one result edge.

use std::collections::HashMap;

use tracing::{debug, info, instrument};

use super::disjoint_set::DisjointSet;
use super::ds::{DataStructure, EntityId};
use super::history::HistoryCollector;
use super::interference::InterferenceTable;
use super::options::Tuning;
use super::progress::{ProgressToken, Stage};
use super::report::{BooleanError, Report, WarningKind};
use crate::geometry::curves::Curve;
use crate::geometry::point::Point3d;
use crate::geometry::vector::Vec3;
use crate::geometry::{Evaluable, GeometryEngine};
use crate::topology::brep::{EdgeId, EntityStore};
use crate::topology::shape::{EntityKind, EntityRef};

/// A vertex at a parameter of an edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pave {
    pub vertex: EntityId,
    pub t: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaveBlock {
    pub edge: EntityId,
    pub start: Pave,
    pub end: Pave,
    pub tolerance: f64,
    /// Store edge realising this block and whether it runs the same way.
    pub result: Option<(EdgeId, bool)>,
}

impl PaveBlock {
    pub fn range(&self) -> (f64, f64) {
        (self.start.t, self.end.t)
    }
}

/// Blocks of different edges occupying the same stretch of space.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonBlock {
    pub blocks: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct PaveTable {
    blocks: Vec<PaveBlock>,
    by_edge: HashMap<EntityId, Vec<usize>>,
    common: Vec<CommonBlock>,
    common_of: HashMap<usize, usize>,
}

impl PaveTable {
    pub fn blocks(&self) -> &[PaveBlock] {
        &self.blocks
    }

    pub fn block(&self, i: usize) -> &PaveBlock {
        &self.blocks[i]
    }

    /// Blocks of an edge in increasing parameter order; empty when the
    /// edge vanished.
    pub fn blocks_of(&self, edge: EntityId) -> &[usize] {
        self.by_edge.get(&edge).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn common_blocks(&self) -> &[CommonBlock] {
        &self.common
    }

    pub fn common_of(&self, block: usize) -> Option<&CommonBlock> {
        self.common_of.get(&block).map(|&i| &self.common[i])
    }

    pub fn is_common(&self, block: usize) -> bool {
        self.common_of.contains_key(&block)
    }

    /// True when the edge is realised by anything other than itself.
    pub fn is_split(&self, ds: &DataStructure, edge: EntityId) -> bool {
        match self.blocks_of(edge) {
            [only] => self.blocks[*only].result.map(|(e, _)| e) != ds.edge(edge),
            _ => true,
        }
    }

    /// Result edge uses covering `edge` traversed `forward` or backwards.
    pub fn edge_images(&self, edge: EntityId, forward: bool) -> Vec<(EdgeId, bool)> {
        let mut uses: Vec<(EdgeId, bool)> = self
            .blocks_of(edge)
            .iter()
            .filter_map(|&i| self.blocks[i].result)
            .map(|(e, same)| (e, same == forward))
            .collect();
        if !forward {
            uses.reverse();
        }
        uses
    }
}

/// Builds the pave table from the interference records.
pub struct PaveBuilder<'a> {
    pub geometry: &'a dyn GeometryEngine,
    pub tuning: &'a Tuning,
    pub progress: &'a ProgressToken,
}

impl PaveBuilder<'_> {
    #[instrument(skip_all)]
    pub fn build(
        &self,
        store: &mut EntityStore,
        ds: &mut DataStructure,
        table: &InterferenceTable,
        history: &mut HistoryCollector,
        report: &mut Report,
    ) -> Result<PaveTable, BooleanError> {
        self.progress.check(Stage::PaveBlocks)?;
        let edges: Vec<EntityId> = ds.ids_of_kind(EntityKind::Edge).collect();
        for &e in &edges {
            if ds.entity(e).degenerate {
                let shape = ds.entity(e).shape;
                if let Some(edge) = ds.edge(e) {
                    history.add_vanished(shape, store.edges[edge].range());
                }
                report.push(WarningKind::SmallEdge, vec![shape], "edge shorter than its tolerance dropped");
            }
        }
        let live: Vec<EntityId> = edges.into_iter().filter(|&e| !ds.entity(e).degenerate).collect();

        let mut extra: HashMap<EntityId, Vec<Pave>> = HashMap::new();
        for (edge, t, vertex) in table.paves() {
            extra.entry(edge).or_default().push(Pave { vertex, t });
        }

        // Merging near paves may merge vertices, which can bring paves of
        // other edges together; repeat until nothing changes.
        let mut paves: HashMap<EntityId, Vec<Pave>> = HashMap::new();
        for _ in 0..=self.tuning.max_passes {
            self.progress.check(Stage::PaveBlocks)?;
            let mut merged = false;
            for &e in &live {
                let list = self.sorted_paves(store, ds, e, extra.get(&e).map(Vec::as_slice).unwrap_or(&[]));
                let (list, m) = self.merge_near(store, ds, e, list);
                merged |= m;
                paves.insert(e, list);
            }
            if !merged {
                break;
            }
        }

        let mut out = PaveTable::default();
        for &e in &live {
            let list = &paves[&e];
            let tolerance = ds.tolerance(e);
            let mut ids = Vec::new();
            for w in list.windows(2) {
                let (start, end) = (w[0], w[1]);
                let Some(edge) = ds.edge(e) else { continue };
                if store.edges[edge].curve.length(start.t, end.t) <= tolerance {
                    history.add_vanished(ds.entity(e).shape, (start.t, end.t));
                    report.push(WarningKind::SmallEdge, vec![ds.entity(e).shape], "fragment shorter than tolerance dropped");
                    continue;
                }
                ids.push(out.blocks.len());
                out.blocks.push(PaveBlock {
                    edge: e,
                    start: Pave { vertex: ds.real_vertex(start.vertex), t: start.t },
                    end: Pave { vertex: ds.real_vertex(end.vertex), t: end.t },
                    tolerance,
                    result: None,
                });
            }
            out.by_edge.insert(e, ids);
        }

        self.progress.check(Stage::PaveBlocks)?;
        self.find_common_blocks(store, ds, &mut out);
        self.assign_result_edges(store, ds, &mut out, history);
        info!(blocks = out.blocks.len(), common = out.common.len(), "pave blocks built");
        Ok(out)
    }

    fn sorted_paves(&self, store: &EntityStore, ds: &DataStructure, e: EntityId, extra: &[Pave]) -> Vec<Pave> {
        let Some(edge) = ds.edge(e) else { return vec![] };
        let edge = &store.edges[edge];
        let (first, last) = {
            let children = &ds.entity(e).children;
            (children[0], *children.last().unwrap_or(&children[0]))
        };
        let mut list = vec![
            Pave { vertex: ds.real_vertex(first), t: edge.t_start },
            Pave { vertex: ds.real_vertex(last), t: edge.t_end },
        ];
        list.extend(
            extra
                .iter()
                .filter(|p| p.t > edge.t_start && p.t < edge.t_end)
                .map(|p| Pave { vertex: ds.real_vertex(p.vertex), t: p.t }),
        );
        list.sort_by(|a, b| a.t.total_cmp(&b.t));
        list
    }

    /// Collapse neighbouring paves closer than the tolerances of their
    /// vertices. End paves keep their parameter.
    fn merge_near(&self, store: &EntityStore, ds: &mut DataStructure, e: EntityId, list: Vec<Pave>) -> (Vec<Pave>, bool) {
        let Some(edge) = ds.edge(e) else { return (list, false) };
        let edge = &store.edges[edge];
        let mut merged = false;
        let mut out: Vec<Pave> = Vec::with_capacity(list.len());
        for p in list {
            if let Some(last) = out.last_mut() {
                let gap = edge.curve.length(last.t, p.t);
                let reach = ds.tolerance(last.vertex) + ds.tolerance(p.vertex) + ds.fuzzy();
                if last.vertex == p.vertex || gap <= reach {
                    if last.vertex != p.vertex {
                        last.vertex = ds.merge_vertices(store, last.vertex, p.vertex);
                        merged = true;
                    }
                    if (p.t - edge.t_end).abs() <= crate::default_tolerance().parametric {
                        last.t = p.t;
                    }
                    continue;
                }
            }
            out.push(p);
        }
        // A closed edge collapses to one pave; keep its two ends.
        if out.len() == 1 && edge.is_closed() {
            out.push(Pave { vertex: out[0].vertex, t: edge.t_end });
        }
        (out, merged)
    }

    fn sample_block(store: &EntityStore, ds: &DataStructure, block: &PaveBlock, n: usize) -> Vec<Point3d> {
        let Some(edge) = ds.edge(block.edge) else { return vec![] };
        let curve = &store.edges[edge].curve;
        (1..=n)
            .map(|k| {
                let s = k as f64 / (n + 1) as f64;
                curve.point_at(block.start.t + (block.end.t - block.start.t) * s)
            })
            .collect()
    }

    /// Blocks sharing their end vertices are confirmed coincident by
    /// projecting interior samples onto each other.
    fn find_common_blocks(&self, store: &EntityStore, ds: &DataStructure, out: &mut PaveTable) {
        let mut by_ends: HashMap<(EntityId, EntityId), Vec<usize>> = HashMap::new();
        for (i, b) in out.blocks.iter().enumerate() {
            let key = (b.start.vertex.min(b.end.vertex), b.start.vertex.max(b.end.vertex));
            by_ends.entry(key).or_default().push(i);
        }
        let mut sets = DisjointSet::new(out.blocks.len());
        let mut keys: Vec<_> = by_ends.keys().copied().collect();
        keys.sort();
        for key in keys {
            let group = &by_ends[&key];
            for (n, &i) in group.iter().enumerate() {
                for &j in &group[n + 1..] {
                    if out.blocks[i].edge != out.blocks[j].edge && self.coincide(store, ds, &out.blocks[i], &out.blocks[j]) {
                        sets.union(i, j);
                    }
                }
            }
        }
        for group in sets.groups() {
            let index = out.common.len();
            for &b in &group {
                out.common_of.insert(b, index);
            }
            out.common.push(CommonBlock { blocks: group });
        }
        debug!(common = out.common.len(), "common blocks found");
    }

    fn coincide(&self, store: &EntityStore, ds: &DataStructure, a: &PaveBlock, b: &PaveBlock) -> bool {
        let Some(eb) = ds.edge(b.edge) else { return false };
        let curve = &store.edges[eb].curve;
        let tol = a.tolerance + b.tolerance + ds.fuzzy();
        Self::sample_block(store, ds, a, self.tuning.common_block_samples.max(1))
            .iter()
            .all(|p| {
                self.geometry
                    .project_point_on_curve(curve, b.range(), p)
                    .is_ok_and(|cp| cp.distance <= tol)
            })
    }

    /// One store edge per block or common block. An input edge that is not
    /// split and still ends on representative vertices is reused, raised to
    /// the largest tolerance of its group.
    fn assign_result_edges(
        &self,
        store: &mut EntityStore,
        ds: &mut DataStructure,
        out: &mut PaveTable,
        history: &mut HistoryCollector,
    ) {
        let mut groups: Vec<Vec<usize>> = out.common.iter().map(|c| c.blocks.clone()).collect();
        groups.extend((0..out.blocks.len()).filter(|i| !out.common_of.contains_key(i)).map(|i| vec![i]));

        let same_t = |a: f64, b: f64| (a - b).abs() <= crate::default_tolerance().parametric;
        for group in groups {
            let reusable = group.iter().copied().find(|&i| {
                let b = &out.blocks[i];
                out.blocks_of(b.edge).len() == 1
                    && ds.entity(b.edge).children.iter().all(|&v| ds.is_real_vertex(v))
                    && ds.edge(b.edge).is_some_and(|e| {
                        let edge = &store.edges[e];
                        same_t(b.start.t, edge.t_start) && same_t(b.end.t, edge.t_end)
                    })
            });
            let tolerance = group.iter().map(|&i| out.blocks[i].tolerance).fold(0.0, f64::max);
            let (edge, lead) = match reusable.and_then(|i| ds.edge(out.blocks[i].edge).map(|e| (e, i))) {
                Some((e, i)) => {
                    if tolerance > store.edges[e].tolerance {
                        debug!(edge = ?e, tolerance, "reused edge tolerance raised");
                        store.edges[e].tolerance = tolerance;
                    }
                    ds.grow_tolerance(out.blocks[i].edge, tolerance);
                    (e, i)
                }
                None => {
                    let lead = group[0];
                    let Some(e) = self.new_edge(store, ds, &out.blocks[lead], tolerance) else { continue };
                    (e, lead)
                }
            };
            let lead_dir = self.direction(store, ds, &out.blocks[lead]);
            for &i in &group {
                let dir = self.direction(store, ds, &out.blocks[i]);
                let same = if i == lead { true } else { dir.dot(&lead_dir) > 0.0 };
                out.blocks[i].tolerance = tolerance;
                out.blocks[i].result = Some((edge, same));
                history.add_image(ds.entity(out.blocks[i].edge).shape, EntityRef::Edge(edge));
            }
        }

        for v in ds.ids_of_kind(EntityKind::Vertex) {
            let real = ds.real_vertex(v);
            if real != v {
                history.add_image(ds.entity(v).shape, ds.entity(real).shape);
            }
        }
    }

    fn new_edge(&self, store: &mut EntityStore, ds: &DataStructure, block: &PaveBlock, tolerance: f64) -> Option<EdgeId> {
        let (v0, v1) = (ds.vertex(block.start.vertex)?, ds.vertex(block.end.vertex)?);
        let curve = store.edges[ds.edge(block.edge)?].curve.clone();
        match curve {
            Curve::Line(_) => store.add_line_edge(v0, v1, tolerance),
            Curve::Circle(_) => Some(store.add_edge(curve, v0, v1, block.range(), tolerance)),
        }
    }

    /// Chord (or mid tangent for closed blocks) of a block in its own direction.
    fn direction(&self, store: &EntityStore, ds: &DataStructure, block: &PaveBlock) -> Vec3 {
        let Some(e) = ds.edge(block.edge) else { return Vec3::ZERO };
        let curve = &store.edges[e].curve;
        let (p0, p1) = (curve.point_at(block.start.t), curve.point_at(block.end.t));
        if block.start.vertex != block.end.vertex {
            p1 - p0
        } else {
            curve.derivative_at(0.5 * (block.start.t + block.end.t))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boolean::ds::Rank;
    use crate::boolean::interference::InterferenceDetector;
    use crate::geometry::AnalyticGeometry;
    use crate::topology::primitives::{make_box, make_polyline};
    use crate::topology::shape::Shape;

    fn run(store: &mut EntityStore, a: Shape, b: Shape) -> (DataStructure, InterferenceTable, PaveTable, Report) {
        let mut ds = DataStructure::new(0.0);
        ds.register(store, &a, Rank::Object).unwrap();
        ds.register(store, &b, Rank::Tool).unwrap();
        let geometry = AnalyticGeometry::default();
        let tuning = Tuning::default();
        let progress = ProgressToken::new();
        let mut history = HistoryCollector::default();
        let mut report = Report::default();
        let table = InterferenceDetector {
            geometry: &geometry,
            tuning: &tuning,
            parallel: false,
            progress: &progress,
        }
        .find_all(store, &mut ds, &mut history, &mut report)
        .unwrap();
        let paves = PaveBuilder {
            geometry: &geometry,
            tuning: &tuning,
            progress: &progress,
        }
        .build(store, &mut ds, &table, &mut history, &mut report)
        .unwrap();
        (ds, table, paves, report)
    }

    #[test]
    fn crossing_segments_split_in_two() {
        let mut store = EntityStore::new();
        let a = make_polyline(&mut store, &[Point3d::new(-1.0, 0.0, 0.0), Point3d::new(1.0, 0.0, 0.0)]);
        let b = make_polyline(&mut store, &[Point3d::new(0.0, -1.0, 0.0), Point3d::new(0.0, 1.0, 0.0)]);
        let (ds, _, paves, _) = run(&mut store, a.clone(), b);
        let ea = ds.id_of(a.leaves()[0]).unwrap();
        assert_eq!(paves.blocks_of(ea).len(), 2);
        assert!(paves.is_split(&ds, ea));
        let middle = paves.block(paves.blocks_of(ea)[0]).end.vertex;
        assert!(ds.point(&store, middle).unwrap().distance_to(&Point3d::new(0.0, 0.0, 0.0)) < 1e-9);
        assert!(paves.common_blocks().is_empty());
    }

    #[test]
    fn overlapping_segments_share_the_middle_block() {
        let mut store = EntityStore::new();
        let a = make_polyline(&mut store, &[Point3d::new(0.0, 0.0, 0.0), Point3d::new(2.0, 0.0, 0.0)]);
        let b = make_polyline(&mut store, &[Point3d::new(1.0, 0.0, 0.0), Point3d::new(3.0, 0.0, 0.0)]);
        let (ds, _, paves, _) = run(&mut store, a.clone(), b.clone());
        let (ea, eb) = (ds.id_of(a.leaves()[0]).unwrap(), ds.id_of(b.leaves()[0]).unwrap());
        assert_eq!(paves.blocks_of(ea).len(), 2);
        assert_eq!(paves.blocks_of(eb).len(), 2);
        assert_eq!(paves.common_blocks().len(), 1);
        let shared_a = paves.blocks_of(ea)[1];
        let shared_b = paves.blocks_of(eb)[0];
        assert!(paves.is_common(shared_a));
        assert_eq!(
            paves.block(shared_a).result.map(|r| r.0),
            paves.block(shared_b).result.map(|r| r.0)
        );
    }

    #[test]
    fn reused_shared_edge_takes_the_loosest_tolerance() {
        let mut store = EntityStore::new();
        let a = make_box(&mut store, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0);
        let b = make_box(&mut store, 1.0, 0.0, 0.0, 2.0, 1.0, 1.0);
        for f in store.solid_faces(b) {
            for e in store.face_edges(f) {
                store.edges[e].tolerance = 1e-5;
            }
        }
        let (ds, _, paves, _) = run(&mut store, Shape::Solid(a), Shape::Solid(b));
        // The edges of the contact square are shared.
        assert!(paves.common_blocks().len() >= 4);
        for cb in paves.common_blocks() {
            let (edge, _) = paves.block(cb.blocks[0]).result.unwrap();
            assert!(store.edges[edge].tolerance >= 1e-5, "{:?}", store.edges[edge].tolerance);
            if let Some(id) = ds.id_of(EntityRef::Edge(edge)) {
                assert!(ds.tolerance(id) >= 1e-5);
            }
            assert!(cb.blocks.iter().all(|&i| paves.block(i).tolerance >= 1e-5));
        }
    }

    #[test]
    fn untouched_edges_are_reused() {
        let mut store = EntityStore::new();
        let a = make_box(&mut store, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0);
        let b = make_box(&mut store, 3.0, 0.0, 0.0, 4.0, 1.0, 1.0);
        let (ds, _, paves, report) = run(&mut store, Shape::Solid(a), Shape::Solid(b));
        assert!(report.is_clean());
        for e in ds.ids_of_kind(EntityKind::Edge) {
            assert!(!paves.is_split(&ds, e));
            assert_eq!(paves.edge_images(e, false), vec![(ds.edge(e).unwrap(), false)]);
        }
    }
}

//! Shared registry of every sub-entity of both operands.
//!
//! Each structurally distinct entity gets a stable [`EntityId`] in
//! registration order; an entity reachable from both operands is
//! registered once and carries both ranks. Entities created by the
//! pipeline (section edges, split vertices) are registered with no rank.
//! Child -> parent lookups are answered from the owner index.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::disjoint_set::DisjointSet;
use super::report::BooleanError;
use crate::geometry::bbox::BoundingBox;
use crate::geometry::point::Point3d;
use crate::topology::brep::*;
use crate::topology::shape::{EntityKind, EntityRef, Shape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rank {
    /// Operand A (the object).
    Object,
    /// Operand B (the tool).
    Tool,
}

impl Rank {
    pub fn other(self) -> Rank {
        match self {
            Rank::Object => Rank::Tool,
            Rank::Tool => Rank::Object,
        }
    }

    fn bit(self) -> u8 {
        match self {
            Rank::Object => 1,
            Rank::Tool => 2,
        }
    }
}

/// Operand membership of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Ranks(u8);

impl Ranks {
    pub fn of(rank: Rank) -> Self {
        Ranks(rank.bit())
    }

    pub fn contains(self, rank: Rank) -> bool {
        self.0 & rank.bit() != 0
    }

    pub fn insert(&mut self, rank: Rank) {
        self.0 |= rank.bit();
    }

    /// Reachable from both operands.
    pub fn is_shared(self) -> bool {
        self.0 == 3
    }

    /// Created by the pipeline.
    pub fn is_new(self) -> bool {
        self.0 == 0
    }

    pub fn overlaps(self, other: Ranks) -> bool {
        self.0 & other.0 != 0
    }

    /// The only rank, if exactly one.
    pub fn single(self) -> Option<Rank> {
        match self.0 {
            1 => Some(Rank::Object),
            2 => Some(Rank::Tool),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityInfo {
    pub shape: EntityRef,
    pub ranks: Ranks,
    /// Only grows during a run.
    pub tolerance: f64,
    pub bbox: BoundingBox,
    /// Zero-length edge; excluded from interference.
    pub degenerate: bool,
    pub children: Vec<EntityId>,
}

#[derive(Debug, Clone, Default)]
pub struct DataStructure {
    entities: Vec<EntityInfo>,
    index: HashMap<EntityRef, EntityId>,
    owners: Vec<Vec<EntityId>>,
    roots: [Vec<EntityId>; 2],
    same_vertex: DisjointSet,
    fuzzy: f64,
    frozen: bool,
}

impl DataStructure {
    pub fn new(fuzzy: f64) -> Self {
        Self {
            fuzzy,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn fuzzy(&self) -> f64 {
        self.fuzzy
    }

    pub fn entity(&self, id: EntityId) -> &EntityInfo {
        &self.entities[id.0]
    }

    pub fn id_of(&self, r: EntityRef) -> Option<EntityId> {
        self.index.get(&r).copied()
    }

    pub fn owners(&self, id: EntityId) -> &[EntityId] {
        &self.owners[id.0]
    }

    pub fn bounding_box(&self, id: EntityId) -> &BoundingBox {
        &self.entities[id.0].bbox
    }

    pub fn tolerance(&self, id: EntityId) -> f64 {
        self.entities[id.0].tolerance
    }

    pub fn ranks(&self, id: EntityId) -> Ranks {
        self.entities[id.0].ranks
    }

    pub fn roots(&self, rank: Rank) -> &[EntityId] {
        match rank {
            Rank::Object => &self.roots[0],
            Rank::Tool => &self.roots[1],
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        (0..self.entities.len()).map(EntityId)
    }

    pub fn ids_of_kind(&self, kind: EntityKind) -> impl Iterator<Item = EntityId> + '_ {
        self.ids().filter(move |&id| self.entities[id.0].shape.kind() == kind)
    }

    pub fn vertex(&self, id: EntityId) -> Option<VertexId> {
        match self.entities[id.0].shape {
            EntityRef::Vertex(v) => Some(v),
            _ => None,
        }
    }

    pub fn edge(&self, id: EntityId) -> Option<EdgeId> {
        match self.entities[id.0].shape {
            EntityRef::Edge(e) => Some(e),
            _ => None,
        }
    }

    pub fn face(&self, id: EntityId) -> Option<FaceId> {
        match self.entities[id.0].shape {
            EntityRef::Face(f) => Some(f),
            _ => None,
        }
    }

    // ─── Registration ───────────────────────────────────────────────────

    /// Register every sub-entity of `shape` under `rank`. Returns the ids
    /// of the top-level entities.
    #[instrument(skip(self, store, shape))]
    pub fn register(&mut self, store: &EntityStore, shape: &Shape, rank: Rank) -> Result<Vec<EntityId>, BooleanError> {
        let leaves = shape.leaves();
        if leaves.is_empty() {
            return Err(BooleanError::invalid(format!("{rank:?} operand is empty")));
        }
        let mut roots = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            if !store.contains(leaf) {
                return Err(BooleanError::invalid(format!("{rank:?} operand references a missing {:?}", leaf.kind())));
            }
            let id = self.visit(store, leaf, rank)?;
            if !roots.contains(&id) {
                roots.push(id);
            }
        }
        self.check_manifold(store, &roots)?;
        match rank {
            Rank::Object => self.roots[0] = roots.clone(),
            Rank::Tool => self.roots[1] = roots.clone(),
        }
        info!(entities = self.entities.len(), roots = roots.len(), "operand registered");
        Ok(roots)
    }

    fn visit(&mut self, store: &EntityStore, r: EntityRef, rank: Rank) -> Result<EntityId, BooleanError> {
        if let Some(id) = self.id_of(r) {
            self.mark_rank(id, rank);
            return Ok(id);
        }
        check_links(store, r)?;
        let children = store
            .children(r)
            .into_iter()
            .map(|c| self.visit(store, c, rank))
            .collect::<Result<Vec<_>, _>>()?;

        let (tolerance, bbox, degenerate) = match r {
            EntityRef::Vertex(v) => {
                let vx = &store.vertices[v];
                let bb = BoundingBox::from_points(&[vx.point]).enlarged(vx.tolerance);
                (vx.tolerance, bb, false)
            }
            EntityRef::Edge(e) => {
                let edge = &store.edges[e];
                let vertex_tol = store.vertices[edge.start_vertex]
                    .tolerance
                    .max(store.vertices[edge.end_vertex].tolerance);
                let length = edge.curve.length(edge.t_start, edge.t_end);
                (edge.tolerance, store.edge_bounding_box(e), length <= edge.tolerance.max(vertex_tol))
            }
            EntityRef::Face(f) => (store.faces[f].tolerance, store.face_bounding_box(f), false),
            EntityRef::Shell(_) | EntityRef::Solid(_) => {
                let mut bb = BoundingBox::empty();
                for c in &children {
                    bb.add_box(&self.entities[c.0].bbox);
                }
                (0.0, bb, false)
            }
        };
        let id = self.push(EntityInfo {
            shape: r,
            ranks: Ranks::of(rank),
            tolerance,
            bbox,
            degenerate,
            children,
        });
        if degenerate {
            debug!(?r, "degenerate edge registered");
        }
        Ok(id)
    }

    fn push(&mut self, info: EntityInfo) -> EntityId {
        let id = EntityId(self.entities.len());
        for c in &info.children {
            self.owners[c.0].push(id);
        }
        self.index.insert(info.shape, id);
        self.entities.push(info);
        self.owners.push(Vec::new());
        self.same_vertex.push();
        id
    }

    fn mark_rank(&mut self, id: EntityId, rank: Rank) {
        if self.entities[id.0].ranks.contains(rank) {
            return;
        }
        self.entities[id.0].ranks.insert(rank);
        for c in self.entities[id.0].children.clone() {
            self.mark_rank(c, rank);
        }
    }

    /// Within one shell an edge may bound at most two faces.
    fn check_manifold(&self, store: &EntityStore, roots: &[EntityId]) -> Result<(), BooleanError> {
        let mut stack = roots.to_vec();
        let mut seen = std::collections::HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let info = &self.entities[id.0];
            match info.shape {
                EntityRef::Solid(_) => stack.extend(info.children.iter().copied()),
                EntityRef::Shell(s) => {
                    let mut uses: HashMap<EdgeId, usize> = HashMap::new();
                    for &f in &store.shells[s].faces {
                        for l in store.face_loops(f) {
                            for &he in &store.loops[l].half_edges {
                                *uses.entry(store.half_edges[he].edge).or_default() += 1;
                            }
                        }
                    }
                    if uses.values().any(|&n| n > 2) {
                        return Err(BooleanError::invalid("shell has an edge bounding more than two faces"));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ─── Entities created by the pipeline ───────────────────────────────

    pub fn add_vertex(&mut self, store: &mut EntityStore, point: Point3d, tolerance: f64) -> EntityId {
        let v = store.add_vertex(point, tolerance);
        self.push(EntityInfo {
            shape: EntityRef::Vertex(v),
            ranks: Ranks::default(),
            tolerance,
            bbox: BoundingBox::from_points(&[point]).enlarged(tolerance),
            degenerate: false,
            children: vec![],
        })
    }

    /// Straight edge between two registered vertices.
    pub fn add_line_edge(
        &mut self,
        store: &mut EntityStore,
        start: EntityId,
        end: EntityId,
        tolerance: f64,
    ) -> Option<EntityId> {
        let (v0, v1) = (self.vertex(start)?, self.vertex(end)?);
        let e = store.add_line_edge(v0, v1, tolerance)?;
        Some(self.push(EntityInfo {
            shape: EntityRef::Edge(e),
            ranks: Ranks::default(),
            tolerance,
            bbox: store.edge_bounding_box(e),
            degenerate: false,
            children: vec![start, end],
        }))
    }

    // ─── Vertex identity and tolerances ─────────────────────────────────

    /// Representative of the same-domain set of a vertex.
    pub fn real_vertex(&self, id: EntityId) -> EntityId {
        EntityId(self.same_vertex.find(id.0))
    }

    pub fn is_real_vertex(&self, id: EntityId) -> bool {
        self.real_vertex(id) == id
    }

    pub fn point(&self, store: &EntityStore, id: EntityId) -> Option<Point3d> {
        self.vertex(id).map(|v| store.vertices[v].point)
    }

    /// Merge two vertices; the lowest id survives and its tolerance grows
    /// to cover the other.
    pub fn merge_vertices(&mut self, store: &EntityStore, a: EntityId, b: EntityId) -> EntityId {
        let (ra, rb) = (self.real_vertex(a), self.real_vertex(b));
        if ra == rb {
            return ra;
        }
        let rep = EntityId(self.same_vertex.union(ra.0, rb.0));
        let other = if rep == ra { rb } else { ra };
        if let (Some(p), Some(q)) = (self.point(store, rep), self.point(store, other)) {
            let needed = p.distance_to(&q) + self.tolerance(other);
            self.grow_tolerance(rep, needed);
        }
        debug!(?rep, merged = ?other, "vertices merged");
        rep
    }

    /// Raise an entity tolerance. Refused once tolerances are frozen.
    pub fn grow_tolerance(&mut self, id: EntityId, tolerance: f64) -> bool {
        if self.is_frozen() {
            debug!(?id, tolerance, "tolerance growth refused after freeze");
            return false;
        }
        let info = &mut self.entities[id.0];
        if tolerance > info.tolerance {
            info.bbox = info.bbox.enlarged(tolerance - info.tolerance);
            info.tolerance = tolerance;
        }
        true
    }

    /// Stop tolerance growth and write the grown tolerances back to the
    /// store, so that later stages read the values interference used.
    pub fn freeze_tolerances(&mut self, store: &mut EntityStore) {
        self.frozen = true;
        self.commit_tolerances(store);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn commit_tolerances(&self, store: &mut EntityStore) {
        for info in &self.entities {
            match info.shape {
                EntityRef::Vertex(v) => {
                    let vx = &mut store.vertices[v];
                    vx.tolerance = vx.tolerance.max(info.tolerance);
                }
                EntityRef::Edge(e) => {
                    let edge = &mut store.edges[e];
                    edge.tolerance = edge.tolerance.max(info.tolerance);
                }
                EntityRef::Face(f) => {
                    let face = &mut store.faces[f];
                    face.tolerance = face.tolerance.max(info.tolerance);
                }
                EntityRef::Shell(_) | EntityRef::Solid(_) => {}
            }
        }
    }

    /// Nearest representative vertex whose tolerance sphere, widened by
    /// `tol`, contains `p`.
    pub fn find_vertex_near(&self, store: &EntityStore, p: &Point3d, tol: f64) -> Option<EntityId> {
        self.ids_of_kind(EntityKind::Vertex)
            .filter(|&id| self.is_real_vertex(id))
            .filter_map(|id| {
                let d = self.point(store, id)?.distance_to(p);
                (d <= self.tolerance(id) + tol).then_some((d, id))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, id)| id)
    }

    /// Representative ids of the end vertices of an edge.
    pub fn edge_vertices(&self, edge: EntityId) -> (EntityId, EntityId) {
        let children = &self.entities[edge.0].children;
        let first = children[0];
        let last = *children.last().unwrap_or(&first);
        (self.real_vertex(first), self.real_vertex(last))
    }

    /// Representative ids of all vertices on the boundary of a face.
    pub fn face_vertices(&self, face: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        for &e in &self.entities[face.0].children {
            for &v in &self.entities[e.0].children {
                let r = self.real_vertex(v);
                if !out.contains(&r) {
                    out.push(r);
                }
            }
        }
        out
    }

    /// Faces of one operand.
    pub fn operand_faces(&self, rank: Rank) -> Vec<EntityId> {
        self.ids_of_kind(EntityKind::Face)
            .filter(|&id| self.entities[id.0].ranks.contains(rank))
            .collect()
    }

    /// Candidate pairs `(x, y)` with `x` of `first` kind and `y` of `second`
    /// kind from different operands, whose boxes touch after widening by
    /// the fuzzy value. Pairs sharing an operand are skipped. Vertices are
    /// restricted to representatives and degenerate edges are left out.
    pub fn candidate_pairs(&self, first: EntityKind, second: EntityKind) -> Vec<(EntityId, EntityId)> {
        let usable = |id: &EntityId| {
            let info = &self.entities[id.0];
            !info.ranks.is_new() && !info.degenerate && (info.shape.kind() != EntityKind::Vertex || self.is_real_vertex(*id))
        };
        let xs: Vec<EntityId> = self.ids_of_kind(first).filter(usable).collect();
        let ys: Vec<EntityId> = self.ids_of_kind(second).filter(usable).collect();
        let mut out = Vec::new();
        for &x in &xs {
            for &y in &ys {
                if x == y || (first == second && y < x) {
                    continue;
                }
                let (rx, ry) = (self.ranks(x), self.ranks(y));
                if rx.overlaps(ry) {
                    continue;
                }
                if self.bounding_box(x).enlarged(self.fuzzy).intersects(self.bounding_box(y)) {
                    out.push((x, y));
                }
            }
        }
        out
    }
}

/// Every key an entity refers to must exist, loops must chain and
/// parameters must be finite.
fn check_links(store: &EntityStore, r: EntityRef) -> Result<(), BooleanError> {
    let missing = |what: &str| BooleanError::invalid(format!("{what} refers to a missing entity"));
    match r {
        EntityRef::Solid(id) => {
            let solid = store.solids.get(id).ok_or_else(|| missing("solid"))?;
            if solid.shells.is_empty() {
                return Err(BooleanError::invalid("solid without shells"));
            }
            if solid.shells.iter().any(|s| !store.shells.contains_key(*s)) {
                return Err(missing("solid"));
            }
        }
        EntityRef::Shell(id) => {
            let shell = store.shells.get(id).ok_or_else(|| missing("shell"))?;
            if shell.faces.is_empty() {
                return Err(BooleanError::invalid("shell without faces"));
            }
            if shell.faces.iter().any(|f| !store.faces.contains_key(*f)) {
                return Err(missing("shell"));
            }
        }
        EntityRef::Face(id) => {
            let face = store.faces.get(id).ok_or_else(|| missing("face"))?;
            for l in std::iter::once(&face.outer_loop).chain(&face.inner_loops) {
                let lp = store.loops.get(*l).ok_or_else(|| missing("face"))?;
                if lp.half_edges.is_empty() {
                    return Err(BooleanError::invalid("face with an empty loop"));
                }
                let mut ends = Vec::with_capacity(lp.half_edges.len());
                for he in &lp.half_edges {
                    let he = store.half_edges.get(*he).ok_or_else(|| missing("loop"))?;
                    let edge = store.edges.get(he.edge).ok_or_else(|| missing("half-edge"))?;
                    ends.push(if he.forward {
                        (edge.start_vertex, edge.end_vertex)
                    } else {
                        (edge.end_vertex, edge.start_vertex)
                    });
                }
                let n = ends.len();
                if (0..n).any(|i| ends[i].1 != ends[(i + 1) % n].0) {
                    return Err(BooleanError::invalid("face loop is not closed"));
                }
            }
        }
        EntityRef::Edge(id) => {
            let edge = store.edges.get(id).ok_or_else(|| missing("edge"))?;
            if !store.vertices.contains_key(edge.start_vertex) || !store.vertices.contains_key(edge.end_vertex) {
                return Err(missing("edge"));
            }
            if !(edge.t_start.is_finite() && edge.t_end.is_finite() && edge.t_start <= edge.t_end) {
                return Err(BooleanError::invalid("edge parameter range is not finite and increasing"));
            }
        }
        EntityRef::Vertex(id) => {
            let v = store.vertices.get(id).ok_or_else(|| missing("vertex"))?;
            let p = v.point;
            if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) || !(v.tolerance >= 0.0) {
                return Err(BooleanError::invalid("vertex with non-finite point or negative tolerance"));
            }
        }
    }
    Ok(())
}

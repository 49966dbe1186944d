use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::ds::{DataStructure, EntityId};
use super::history::HistoryCollector;
use super::options::Tuning;
use super::progress::{ProgressToken, Stage};
use super::report::{BooleanError, Report, WarningKind};
use crate::geometry::analytic::{CurveCurveHit, CurveSurfaceHit, SurfaceSurfaceHit};
use crate::geometry::curves::{Curve, Line3d};
use crate::geometry::point::{Point2d, Point3d};
use crate::geometry::polygon::{self, Containment};
use crate::geometry::{Evaluable, GeomError, GeometryEngine};
use crate::topology::brep::{EntityStore, FaceFrame, FaceId};
use crate::topology::shape::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterferenceKind {
    VertexVertex,
    VertexEdge,
    EdgeEdge,
    VertexFace,
    EdgeFace,
    FaceFace,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Locus {
    /// Contact at one vertex, existing or created for the contact.
    Point { vertex: EntityId },
    /// Overlapping edges, an edge lying in a face, or coplanar faces.
    Coincidence,
    /// Section edges cut by a face/face intersection.
    Curves { edges: Vec<EntityId> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interference {
    pub kind: InterferenceKind,
    pub first: EntityId,
    pub second: EntityId,
    pub locus: Locus,
    /// Curve parameter of the contact on each side, where one exists.
    pub params: (Option<f64>, Option<f64>),
}

/// An edge created along a face/face intersection, with every face it lies on.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionEdge {
    pub edge: EntityId,
    pub faces: Vec<EntityId>,
}

#[derive(Debug, Clone, Default)]
pub struct InterferenceTable {
    pub records: Vec<Interference>,
    pub sections: Vec<SectionEdge>,
}

impl InterferenceTable {
    pub fn of_kind(&self, kind: InterferenceKind) -> impl Iterator<Item = &Interference> + '_ {
        self.records.iter().filter(move |r| r.kind == kind)
    }

    /// Split points `(edge, parameter, vertex)` asserted by the records.
    pub fn paves(&self) -> Vec<(EntityId, f64, EntityId)> {
        let mut out = Vec::new();
        for r in &self.records {
            let Locus::Point { vertex } = r.locus else { continue };
            match (r.kind, r.params) {
                (InterferenceKind::VertexEdge, (_, Some(t))) => out.push((r.second, t, vertex)),
                (InterferenceKind::EdgeEdge, (Some(t1), Some(t2))) => {
                    out.push((r.first, t1, vertex));
                    out.push((r.second, t2, vertex));
                }
                (InterferenceKind::EdgeFace, (Some(t), _)) => out.push((r.first, t, vertex)),
                _ => {}
            }
        }
        out
    }

    /// `(edge, face)` pairs where the edge lies in the face.
    pub fn edges_in_faces(&self) -> Vec<(EntityId, EntityId)> {
        self.of_kind(InterferenceKind::EdgeFace)
            .filter(|r| r.locus == Locus::Coincidence)
            .map(|r| (r.first, r.second))
            .collect()
    }

    /// Vertices at point contacts, in record order.
    pub fn contact_vertices(&self) -> Vec<EntityId> {
        let mut out = Vec::new();
        for r in &self.records {
            if let Locus::Point { vertex } = r.locus {
                if !out.contains(&vertex) {
                    out.push(vertex);
                }
            }
        }
        out
    }
}

/// Planar face boundary in its own frame, computed once per run.
#[derive(Debug, Clone)]
pub struct FaceRegion {
    pub frame: FaceFrame,
    pub rings: Vec<Vec<Point2d>>,
}

impl FaceRegion {
    /// `None` for faces on curved surfaces.
    pub fn of(store: &EntityStore, face: FaceId) -> Option<Self> {
        let frame = store.face_frame(face)?;
        let rings = store.face_rings(face, &frame);
        Some(Self { frame, rings })
    }

    pub fn containment(&self, p: &Point3d, tol: f64) -> Containment {
        polygon::point_in_region(&self.frame.to_2d(p), &self.rings, tol)
    }

    /// Parameter intervals of an in-plane line lying on the region.
    pub fn clip(&self, line: &Line3d, tol: f64) -> Vec<(f64, f64)> {
        let (dx, dy) = self.frame.direction_2d(&line.direction);
        let len = dx.hypot(dy);
        if len < 0.5 {
            return vec![];
        }
        polygon::clip_line(self.frame.to_2d(&line.origin), (dx / len, dy / len), &self.rings, tol)
    }
}

pub fn face_regions(store: &EntityStore, ds: &DataStructure) -> HashMap<EntityId, FaceRegion> {
    ds.ids_of_kind(EntityKind::Face)
        .filter_map(|id| Some((id, FaceRegion::of(store, ds.face(id)?)?)))
        .collect()
}

fn overlap_intervals(a: &[(f64, f64)], b: &[(f64, f64)], tol: f64) -> Vec<(f64, f64)> {
    let mut out = Vec::new();
    for &(a0, a1) in a {
        for &(b0, b1) in b {
            let (lo, hi) = (a0.max(b0), a1.min(b1));
            if hi - lo > tol {
                out.push((lo, hi));
            }
        }
    }
    out.sort_by(|x, y| x.0.total_cmp(&y.0));
    out
}

enum EdgeEdgeOutcome {
    Points(Vec<(Point3d, f64, f64)>),
    Overlap { tolerance: f64 },
    Exhausted { tolerance: f64 },
    Failed(GeomError),
}

enum EdgeFaceOutcome {
    Points(Vec<(Point3d, f64)>),
    InFace,
    Failed(GeomError),
}

enum FaceFaceOutcome {
    Coplanar,
    Segments(Vec<(Point3d, Point3d)>),
    Failed(GeomError),
}

/// Mutable state of one detection run.
#[derive(Default)]
struct Run {
    table: InterferenceTable,
    /// (vertex, edge) pairs already carrying a pave.
    paves: HashSet<(EntityId, EntityId)>,
    section_by_ends: HashMap<(EntityId, EntityId), usize>,
}

impl Run {
    fn record(&mut self, kind: InterferenceKind, first: EntityId, second: EntityId, locus: Locus, params: (Option<f64>, Option<f64>)) {
        self.table.records.push(Interference {
            kind,
            first,
            second,
            locus,
            params,
        });
    }
}

/// Pairwise intersection of the entities of both operands by ascending
/// dimension, followed by fixed-point passes over the section edges.
pub struct InterferenceDetector<'a> {
    pub geometry: &'a dyn GeometryEngine,
    pub tuning: &'a Tuning,
    pub parallel: bool,
    pub progress: &'a ProgressToken,
}

impl InterferenceDetector<'_> {
    /// Evaluate pure pair computations batch by batch, checking for
    /// cancellation between batches. Output order matches `pairs`.
    fn evaluate<P, R, F>(&self, pairs: &[P], f: F) -> Result<Vec<R>, BooleanError>
    where
        P: Sync,
        R: Send,
        F: Fn(&P) -> R + Sync + Send,
    {
        let mut out = Vec::with_capacity(pairs.len());
        for batch in pairs.chunks(self.tuning.batch_size.max(1)) {
            self.progress.check(Stage::Interference)?;
            if self.parallel {
                out.par_extend(batch.par_iter().map(&f));
            } else {
                out.extend(batch.iter().map(&f));
            }
        }
        Ok(out)
    }

    #[instrument(skip_all)]
    pub fn find_all(
        &self,
        store: &mut EntityStore,
        ds: &mut DataStructure,
        history: &mut HistoryCollector,
        report: &mut Report,
    ) -> Result<InterferenceTable, BooleanError> {
        let regions = face_regions(store, ds);
        let mut run = Run::default();
        self.vertex_vertex(store, ds, &mut run)?;
        self.vertex_edge(store, ds, &mut run, report)?;
        self.edge_edge(store, ds, &mut run, history, report)?;
        self.vertex_face(store, ds, &regions, &mut run)?;
        self.edge_face(store, ds, &regions, &mut run, history, report)?;
        self.face_face(store, ds, &regions, &mut run, history, report)?;
        self.section_passes(store, ds, &mut run, history, report)?;
        info!(
            records = run.table.records.len(),
            sections = run.table.sections.len(),
            "interference detection complete"
        );
        Ok(run.table)
    }

    fn vertex_vertex(&self, store: &EntityStore, ds: &mut DataStructure, run: &mut Run) -> Result<(), BooleanError> {
        let pairs = ds.candidate_pairs(EntityKind::Vertex, EntityKind::Vertex);
        let hits = {
            let ds = &*ds;
            self.evaluate(&pairs, |&(a, b)| {
                let (pa, pb) = (ds.point(store, a)?, ds.point(store, b)?);
                (pa.distance_to(&pb) <= ds.tolerance(a) + ds.tolerance(b) + ds.fuzzy()).then_some(())
            })?
        };
        for (&(a, b), hit) in pairs.iter().zip(hits) {
            if hit.is_some() {
                let vertex = ds.merge_vertices(store, a, b);
                run.record(InterferenceKind::VertexVertex, a, b, Locus::Point { vertex }, (None, None));
            }
        }
        debug!(pairs = pairs.len(), "vertex/vertex done");
        Ok(())
    }

    /// Parameter and distance of a vertex lying on the interior of an edge.
    fn vertex_on_edge(&self, store: &EntityStore, ds: &DataStructure, v: EntityId, e: EntityId) -> Option<(f64, f64)> {
        let (a, b) = ds.edge_vertices(e);
        if v == a || v == b {
            return None;
        }
        let p = ds.point(store, v)?;
        let edge = &store.edges[ds.edge(e)?];
        let cp = self.geometry.project_point_on_curve(&edge.curve, edge.range(), &p).ok()?;
        let tol = ds.tolerance(v) + ds.tolerance(e) + ds.fuzzy();
        if cp.distance > tol || near_end(store, ds, e, &cp.point, ds.tolerance(v) + ds.fuzzy()) {
            return None;
        }
        (cp.t > edge.t_start && cp.t < edge.t_end).then_some((cp.t, cp.distance))
    }

    fn vertex_edge(&self, store: &EntityStore, ds: &mut DataStructure, run: &mut Run, report: &mut Report) -> Result<(), BooleanError> {
        let pairs = ds.candidate_pairs(EntityKind::Vertex, EntityKind::Edge);
        let hits = {
            let ds = &*ds;
            self.evaluate(&pairs, |&(v, e)| self.vertex_on_edge(store, ds, v, e))?
        };
        for (&(v, e), hit) in pairs.iter().zip(hits) {
            if let Some((t, distance)) = hit {
                if !ds.grow_tolerance(v, distance) {
                    report.push(WarningKind::ToleranceExhausted, vec![ds.entity(v).shape], "vertex tolerance frozen");
                }
                run.paves.insert((v, e));
                run.record(InterferenceKind::VertexEdge, v, e, Locus::Point { vertex: v }, (None, Some(t)));
            }
        }
        debug!(pairs = pairs.len(), "vertex/edge done");
        Ok(())
    }

    /// Curve/curve intersection with bounded tolerance growth on ambiguity.
    fn intersect_edges(&self, store: &EntityStore, ds: &DataStructure, x: EntityId, y: EntityId) -> EdgeEdgeOutcome {
        let (Some(ex), Some(ey)) = (ds.edge(x), ds.edge(y)) else {
            return EdgeEdgeOutcome::Points(vec![]);
        };
        let (ex, ey) = (&store.edges[ex], &store.edges[ey]);
        let base = ds.tolerance(x) + ds.tolerance(y) + ds.fuzzy();
        let mut tol = base;
        for _ in 0..=self.tuning.tolerance_growth_attempts {
            match self.geometry.intersect_curves(&ex.curve, ex.range(), &ey.curve, ey.range(), tol) {
                Ok(hits) => {
                    let mut points = Vec::new();
                    for hit in hits {
                        match hit {
                            CurveCurveHit::Overlap { .. } => return EdgeEdgeOutcome::Overlap { tolerance: tol },
                            CurveCurveHit::Point { point, t1, t2 } => {
                                if !near_end(store, ds, x, &point, tol) && !near_end(store, ds, y, &point, tol) {
                                    points.push((point, t1, t2));
                                }
                            }
                        }
                    }
                    return EdgeEdgeOutcome::Points(points);
                }
                Err(GeomError::Ambiguous { .. }) => tol *= self.tuning.tolerance_growth_factor,
                Err(e) => return EdgeEdgeOutcome::Failed(e),
            }
        }
        EdgeEdgeOutcome::Exhausted { tolerance: tol }
    }

    fn edge_edge(
        &self,
        store: &mut EntityStore,
        ds: &mut DataStructure,
        run: &mut Run,
        history: &mut HistoryCollector,
        report: &mut Report,
    ) -> Result<(), BooleanError> {
        let pairs = ds.candidate_pairs(EntityKind::Edge, EntityKind::Edge);
        let outcomes = {
            let (store, ds) = (&*store, &*ds);
            self.evaluate(&pairs, |&(x, y)| self.intersect_edges(store, ds, x, y))?
        };
        for (&(x, y), outcome) in pairs.iter().zip(outcomes) {
            self.merge_edge_edge(store, ds, run, history, report, x, y, outcome);
        }
        debug!(pairs = pairs.len(), "edge/edge done");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_edge_edge(
        &self,
        store: &mut EntityStore,
        ds: &mut DataStructure,
        run: &mut Run,
        history: &mut HistoryCollector,
        report: &mut Report,
        x: EntityId,
        y: EntityId,
        outcome: EdgeEdgeOutcome,
    ) -> usize {
        let refs = vec![ds.entity(x).shape, ds.entity(y).shape];
        match outcome {
            EdgeEdgeOutcome::Points(points) => {
                let tol = ds.tolerance(x).max(ds.tolerance(y));
                let found = points.len();
                for (p, t1, t2) in points {
                    let vertex = resolve_vertex(store, ds, history, &p, tol, &[x, y]);
                    run.paves.insert((vertex, x));
                    run.paves.insert((vertex, y));
                    run.record(InterferenceKind::EdgeEdge, x, y, Locus::Point { vertex }, (Some(t1), Some(t2)));
                }
                found
            }
            EdgeEdgeOutcome::Overlap { tolerance } => {
                let base = ds.tolerance(x) + ds.tolerance(y) + ds.fuzzy();
                if tolerance > base {
                    ds.grow_tolerance(x, tolerance);
                    ds.grow_tolerance(y, tolerance);
                }
                run.record(InterferenceKind::EdgeEdge, x, y, Locus::Coincidence, (None, None));
                0
            }
            EdgeEdgeOutcome::Exhausted { tolerance } => {
                report.push(
                    WarningKind::ToleranceExhausted,
                    refs,
                    format!("edge/edge contact still ambiguous at tolerance {tolerance:e}"),
                );
                0
            }
            EdgeEdgeOutcome::Failed(e) => {
                report.push(WarningKind::IntersectionFailed, refs, format!("edge/edge: {e}"));
                0
            }
        }
    }

    fn vertex_face(
        &self,
        store: &EntityStore,
        ds: &mut DataStructure,
        regions: &HashMap<EntityId, FaceRegion>,
        run: &mut Run,
    ) -> Result<(), BooleanError> {
        let pairs = ds.candidate_pairs(EntityKind::Vertex, EntityKind::Face);
        let hits = {
            let ds = &*ds;
            self.evaluate(&pairs, |&(v, f)| {
                let region = regions.get(&f)?;
                if ds.face_vertices(f).contains(&v) {
                    return None;
                }
                let p = ds.point(store, v)?;
                let height = region.frame.height(&p).abs();
                let tol = ds.tolerance(v) + ds.tolerance(f) + ds.fuzzy();
                (height <= tol && region.containment(&p, tol) == Containment::Inside).then_some(height)
            })?
        };
        for (&(v, f), hit) in pairs.iter().zip(hits) {
            if let Some(height) = hit {
                ds.grow_tolerance(v, height);
                run.record(InterferenceKind::VertexFace, v, f, Locus::Point { vertex: v }, (None, None));
            }
        }
        debug!(pairs = pairs.len(), "vertex/face done");
        Ok(())
    }

    fn intersect_edge_face(
        &self,
        store: &EntityStore,
        ds: &DataStructure,
        regions: &HashMap<EntityId, FaceRegion>,
        e: EntityId,
        f: EntityId,
    ) -> Option<EdgeFaceOutcome> {
        if ds.entity(f).children.contains(&e) {
            return None;
        }
        let edge = &store.edges[ds.edge(e)?];
        let face = &store.faces[ds.face(f)?];
        let tol = ds.tolerance(e) + ds.tolerance(f) + ds.fuzzy();
        let hit = match self.geometry.intersect_curve_surface(&edge.curve, edge.range(), &face.surface, tol) {
            Ok(hit) => hit,
            Err(err) => return Some(EdgeFaceOutcome::Failed(err)),
        };
        let Some(region) = regions.get(&f) else {
            // Containment on curved faces is not decidable here.
            return match hit {
                CurveSurfaceHit::Points(p) if p.is_empty() => None,
                _ => Some(EdgeFaceOutcome::Failed(GeomError::Unsupported {
                    first: edge.curve.kind_name(),
                    second: face.surface.kind_name(),
                })),
            };
        };
        match hit {
            CurveSurfaceHit::OnSurface => {
                let Curve::Line(line) = &edge.curve else {
                    return None;
                };
                let spans = overlap_intervals(&region.clip(line, tol), &[edge.range()], tol);
                (!spans.is_empty()).then_some(EdgeFaceOutcome::InFace)
            }
            CurveSurfaceHit::Points(points) => {
                let inside: Vec<(Point3d, f64)> = points
                    .into_iter()
                    .filter(|(p, _)| !near_end(store, ds, e, p, tol))
                    .filter(|(p, _)| region.containment(p, tol) == Containment::Inside)
                    .collect();
                (!inside.is_empty()).then_some(EdgeFaceOutcome::Points(inside))
            }
        }
    }

    fn edge_face(
        &self,
        store: &mut EntityStore,
        ds: &mut DataStructure,
        regions: &HashMap<EntityId, FaceRegion>,
        run: &mut Run,
        history: &mut HistoryCollector,
        report: &mut Report,
    ) -> Result<(), BooleanError> {
        let pairs = ds.candidate_pairs(EntityKind::Edge, EntityKind::Face);
        let outcomes = {
            let (store, ds) = (&*store, &*ds);
            self.evaluate(&pairs, |&(e, f)| self.intersect_edge_face(store, ds, regions, e, f))?
        };
        for (&(e, f), outcome) in pairs.iter().zip(outcomes) {
            match outcome {
                None => {}
                Some(EdgeFaceOutcome::Points(points)) => {
                    let tol = ds.tolerance(e).max(ds.tolerance(f));
                    for (p, t) in points {
                        let vertex = resolve_vertex(store, ds, history, &p, tol, &[e, f]);
                        run.paves.insert((vertex, e));
                        run.record(InterferenceKind::EdgeFace, e, f, Locus::Point { vertex }, (Some(t), None));
                    }
                }
                Some(EdgeFaceOutcome::InFace) => {
                    run.record(InterferenceKind::EdgeFace, e, f, Locus::Coincidence, (None, None));
                }
                Some(EdgeFaceOutcome::Failed(err)) => {
                    report.push(
                        WarningKind::IntersectionFailed,
                        vec![ds.entity(e).shape, ds.entity(f).shape],
                        format!("edge/face: {err}"),
                    );
                }
            }
        }
        debug!(pairs = pairs.len(), "edge/face done");
        Ok(())
    }

    fn intersect_faces(
        &self,
        store: &EntityStore,
        ds: &DataStructure,
        regions: &HashMap<EntityId, FaceRegion>,
        fa: EntityId,
        fb: EntityId,
    ) -> Option<FaceFaceOutcome> {
        let (sa, sb) = (&store.faces[ds.face(fa)?].surface, &store.faces[ds.face(fb)?].surface);
        let tol = ds.tolerance(fa) + ds.tolerance(fb) + ds.fuzzy();
        let curves = match self.geometry.intersect_surfaces(sa, sb, tol) {
            Ok(SurfaceSurfaceHit::Empty) => return None,
            Ok(SurfaceSurfaceHit::Coincident) => return Some(FaceFaceOutcome::Coplanar),
            Ok(SurfaceSurfaceHit::Curves(curves)) => curves,
            Err(err) => return Some(FaceFaceOutcome::Failed(err)),
        };
        let (ra, rb) = (regions.get(&fa)?, regions.get(&fb)?);
        let mut segments = Vec::new();
        for curve in curves {
            let Curve::Line(line) = curve else { continue };
            for (t0, t1) in overlap_intervals(&ra.clip(&line, tol), &rb.clip(&line, tol), tol) {
                segments.push((line.point_at(t0), line.point_at(t1)));
            }
        }
        (!segments.is_empty()).then_some(FaceFaceOutcome::Segments(segments))
    }

    fn face_face(
        &self,
        store: &mut EntityStore,
        ds: &mut DataStructure,
        regions: &HashMap<EntityId, FaceRegion>,
        run: &mut Run,
        history: &mut HistoryCollector,
        report: &mut Report,
    ) -> Result<(), BooleanError> {
        let pairs = ds.candidate_pairs(EntityKind::Face, EntityKind::Face);
        let outcomes = {
            let (store, ds) = (&*store, &*ds);
            self.evaluate(&pairs, |&(a, b)| self.intersect_faces(store, ds, regions, a, b))?
        };
        for (&(fa, fb), outcome) in pairs.iter().zip(outcomes) {
            match outcome {
                None => {}
                Some(FaceFaceOutcome::Coplanar) => {
                    run.record(InterferenceKind::FaceFace, fa, fb, Locus::Coincidence, (None, None));
                }
                Some(FaceFaceOutcome::Segments(segments)) => {
                    let mut edges = Vec::new();
                    for (p0, p1) in segments {
                        if let Some(e) = self.section_edge(store, ds, run, history, fa, fb, &p0, &p1) {
                            edges.push(e);
                        }
                    }
                    if !edges.is_empty() {
                        run.record(InterferenceKind::FaceFace, fa, fb, Locus::Curves { edges }, (None, None));
                    }
                }
                Some(FaceFaceOutcome::Failed(err)) => {
                    report.push(
                        WarningKind::IntersectionFailed,
                        vec![ds.entity(fa).shape, ds.entity(fb).shape],
                        format!("face/face: {err}"),
                    );
                }
            }
        }
        debug!(pairs = pairs.len(), "face/face done");
        Ok(())
    }

    /// Create (or reuse) the section edge between two intersection points
    /// lying on both faces.
    #[allow(clippy::too_many_arguments)]
    fn section_edge(
        &self,
        store: &mut EntityStore,
        ds: &mut DataStructure,
        run: &mut Run,
        history: &mut HistoryCollector,
        fa: EntityId,
        fb: EntityId,
        p0: &Point3d,
        p1: &Point3d,
    ) -> Option<EntityId> {
        let tol = ds.tolerance(fa).max(ds.tolerance(fb));
        let v0 = self.section_vertex(store, ds, run, history, p0, tol, fa, fb);
        let v1 = self.section_vertex(store, ds, run, history, p1, tol, fa, fb);
        let (v0, v1) = (ds.real_vertex(v0), ds.real_vertex(v1));
        if v0 == v1 {
            return None;
        }
        let key = (v0.min(v1), v0.max(v1));
        if let Some(&i) = run.section_by_ends.get(&key) {
            let section = &mut run.table.sections[i];
            for f in [fa, fb] {
                if !section.faces.contains(&f) {
                    section.faces.push(f);
                }
            }
            return Some(section.edge);
        }
        let edge = ds.add_line_edge(store, v0, v1, tol)?;
        for f in [fa, fb] {
            history.add_generated(ds.entity(f).shape, ds.entity(edge).shape);
        }
        run.section_by_ends.insert(key, run.table.sections.len());
        run.table.sections.push(SectionEdge {
            edge,
            faces: vec![fa, fb],
        });
        Some(edge)
    }

    /// Vertex at a section end point. A point on a boundary edge of either
    /// face without a pave there gets one.
    #[allow(clippy::too_many_arguments)]
    fn section_vertex(
        &self,
        store: &mut EntityStore,
        ds: &mut DataStructure,
        run: &mut Run,
        history: &mut HistoryCollector,
        p: &Point3d,
        tol: f64,
        fa: EntityId,
        fb: EntityId,
    ) -> EntityId {
        let v = resolve_vertex(store, ds, history, p, tol, &[fa, fb]);
        let boundary: Vec<EntityId> = [fa, fb]
            .iter()
            .flat_map(|f| ds.entity(*f).children.clone())
            .collect();
        for e in boundary {
            if run.paves.contains(&(v, e)) {
                continue;
            }
            if let Some((t, distance)) = self.vertex_on_edge(store, ds, v, e) {
                ds.grow_tolerance(v, distance);
                run.paves.insert((v, e));
                run.record(InterferenceKind::VertexEdge, v, e, Locus::Point { vertex: v }, (None, Some(t)));
            }
        }
        v
    }

    /// Section edges are checked against vertices and against the other
    /// edges of their faces until no new contact appears.
    #[instrument(skip_all)]
    fn section_passes(
        &self,
        store: &mut EntityStore,
        ds: &mut DataStructure,
        run: &mut Run,
        history: &mut HistoryCollector,
        report: &mut Report,
    ) -> Result<(), BooleanError> {
        let in_face: Vec<(EntityId, EntityId)> = run.table.edges_in_faces();
        let mut checked: HashSet<(EntityId, EntityId)> = HashSet::new();
        for pass in 1..=self.tuning.max_passes {
            self.progress.check(Stage::Interference)?;
            let sections = run.table.sections.clone();
            let vertices: Vec<EntityId> = ds
                .ids_of_kind(EntityKind::Vertex)
                .filter(|&v| ds.is_real_vertex(v))
                .collect();
            let mut found = 0;

            for section in &sections {
                let s = section.edge;
                for &v in &vertices {
                    if run.paves.contains(&(v, s)) || !checked.insert((v, s)) {
                        continue;
                    }
                    if !ds.bounding_box(v).intersects(&ds.bounding_box(s).enlarged(ds.fuzzy())) {
                        continue;
                    }
                    if let Some((t, distance)) = self.vertex_on_edge(store, ds, v, s) {
                        ds.grow_tolerance(v, distance);
                        run.paves.insert((v, s));
                        run.record(InterferenceKind::VertexEdge, v, s, Locus::Point { vertex: v }, (None, Some(t)));
                        found += 1;
                    }
                }

                let mut others: Vec<EntityId> = Vec::new();
                for &f in &section.faces {
                    others.extend(ds.entity(f).children.iter().copied());
                    others.extend(in_face.iter().filter(|(_, face)| *face == f).map(|(e, _)| *e));
                    others.extend(
                        sections
                            .iter()
                            .filter(|o| o.edge != s && o.faces.contains(&f))
                            .map(|o| o.edge),
                    );
                }
                for o in others {
                    let key = (s.min(o), s.max(o));
                    if o == s || !checked.insert(key) {
                        continue;
                    }
                    if !ds.bounding_box(s).enlarged(ds.fuzzy()).intersects(ds.bounding_box(o)) {
                        continue;
                    }
                    let outcome = self.intersect_edges(store, ds, s, o);
                    found += self.merge_edge_edge(store, ds, run, history, report, s, o, outcome);
                }
            }

            debug!(pass, found, "section pass");
            if found == 0 {
                return Ok(());
            }
            if pass == self.tuning.max_passes {
                report.push(
                    WarningKind::PassLimitReached,
                    vec![],
                    format!("section edges still producing contacts after {pass} passes"),
                );
            }
        }
        Ok(())
    }
}

/// True if `p` lies within `tol` (plus the vertex tolerance) of an end
/// vertex of `edge`.
fn near_end(store: &EntityStore, ds: &DataStructure, edge: EntityId, p: &Point3d, tol: f64) -> bool {
    let (a, b) = ds.edge_vertices(edge);
    [a, b].into_iter().any(|v| {
        ds.point(store, v)
            .is_some_and(|q| q.distance_to(p) <= ds.tolerance(v) + tol)
    })
}

/// Existing vertex near `p`, or a new one generated from `sources`.
fn resolve_vertex(
    store: &mut EntityStore,
    ds: &mut DataStructure,
    history: &mut HistoryCollector,
    p: &Point3d,
    tol: f64,
    sources: &[EntityId],
) -> EntityId {
    if let Some(v) = ds.find_vertex_near(store, p, tol + ds.fuzzy()) {
        return v;
    }
    let v = ds.add_vertex(store, *p, tol);
    for &s in sources {
        history.add_generated(ds.entity(s).shape, ds.entity(v).shape);
    }
    debug!(vertex = ?v, "intersection vertex created");
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boolean::ds::Rank;
    use crate::geometry::AnalyticGeometry;
    use crate::topology::primitives::{make_box, make_polyline};
    use crate::topology::shape::Shape;

    fn detect(store: &mut EntityStore, a: Shape, b: Shape) -> (DataStructure, InterferenceTable, Report) {
        let mut ds = DataStructure::new(0.0);
        ds.register(store, &a, Rank::Object).unwrap();
        ds.register(store, &b, Rank::Tool).unwrap();
        let geometry = AnalyticGeometry::default();
        let tuning = Tuning::default();
        let progress = ProgressToken::new();
        let detector = InterferenceDetector {
            geometry: &geometry,
            tuning: &tuning,
            parallel: false,
            progress: &progress,
        };
        let mut history = HistoryCollector::default();
        let mut report = Report::default();
        let table = detector.find_all(store, &mut ds, &mut history, &mut report).unwrap();
        (ds, table, report)
    }

    #[test]
    fn shifted_cubes_share_vertices_and_cut_sections() {
        let mut store = EntityStore::new();
        let a = make_box(&mut store, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0);
        let b = make_box(&mut store, 0.5, 0.0, 0.0, 1.5, 1.0, 1.0);
        let (ds, table, report) = detect(&mut store, Shape::Solid(a), Shape::Solid(b));
        assert!(report.is_clean(), "{report:?}");
        // Vertices of B at x = 0.5 lie on edges of A, and vice versa at x = 1.
        let on_input_edges = table
            .of_kind(InterferenceKind::VertexEdge)
            .filter(|r| !ds.ranks(r.second).is_new())
            .count();
        assert!(on_input_edges >= 8);
        assert_eq!(table.of_kind(InterferenceKind::VertexVertex).count(), 0);
        assert!(!table.sections.is_empty());
        assert!(table.of_kind(InterferenceKind::FaceFace).any(|r| r.locus == Locus::Coincidence));
    }

    #[test]
    fn crossing_wires_meet_at_new_vertex() {
        let mut store = EntityStore::new();
        let a = make_polyline(&mut store, &[Point3d::new(-1.0, 0.0, 0.0), Point3d::new(1.0, 0.0, 0.0)]);
        let b = make_polyline(&mut store, &[Point3d::new(0.0, -1.0, 0.0), Point3d::new(0.0, 1.0, 0.0)]);
        let (ds, table, _) = detect(&mut store, a, b);
        let ee: Vec<_> = table.of_kind(InterferenceKind::EdgeEdge).collect();
        assert_eq!(ee.len(), 1);
        let Locus::Point { vertex } = ee[0].locus else { panic!("expected a point") };
        assert!(ds.ranks(vertex).is_new());
        assert_eq!(table.paves().len(), 2);
    }

    #[test]
    fn touching_vertices_merge() {
        let mut store = EntityStore::new();
        let a = make_box(&mut store, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0);
        let b = make_box(&mut store, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0);
        let (ds, table, _) = detect(&mut store, Shape::Solid(a), Shape::Solid(b));
        let vv: Vec<_> = table.of_kind(InterferenceKind::VertexVertex).collect();
        assert_eq!(vv.len(), 1);
        assert_eq!(ds.real_vertex(vv[0].first), ds.real_vertex(vv[0].second));
        assert!(table.sections.is_empty());
    }

    #[test]
    fn cancelled_token_stops_detection() {
        let mut store = EntityStore::new();
        let a = make_box(&mut store, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0);
        let b = make_box(&mut store, 0.5, 0.5, 0.5, 1.5, 1.5, 1.5);
        let mut ds = DataStructure::new(0.0);
        ds.register(&store, &Shape::Solid(a), Rank::Object).unwrap();
        ds.register(&store, &Shape::Solid(b), Rank::Tool).unwrap();
        let geometry = AnalyticGeometry::default();
        let tuning = Tuning::default();
        let progress = ProgressToken::new();
        progress.cancel();
        let detector = InterferenceDetector {
            geometry: &geometry,
            tuning: &tuning,
            parallel: true,
            progress: &progress,
        };
        let err = detector
            .find_all(&mut store, &mut ds, &mut HistoryCollector::default(), &mut Report::default())
            .unwrap_err();
        assert_eq!(err, BooleanError::Cancelled { stage: Stage::Interference });
    }
}

use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};

use crate::geometry::bbox::BoundingBox;
use crate::geometry::curves::Curve;
use crate::geometry::point::{Point2d, Point3d};
use crate::geometry::surfaces::Surface;
use crate::geometry::vector::Vec3;
use crate::geometry::{Evaluable, SurfaceEvaluable};

// ─── Entity Keys ─────────────────────────────────────────────────────────────

new_key_type! {
    pub struct VertexId;
    pub struct EdgeId;
    pub struct HalfEdgeId;
    pub struct LoopId;
    pub struct FaceId;
    pub struct ShellId;
    pub struct SolidId;
}

// ─── Topological Entities ───────────────────────────────────────────────────
//
// Only parent -> child links are stored. Child -> parent lookups (faces of
// an edge, shells of a face) live in the Boolean registry's owner index.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vertex {
    pub point: Point3d,
    pub tolerance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub curve: Curve,
    pub start_vertex: VertexId,
    pub end_vertex: VertexId,
    /// Parameter range on `curve`, `t_start < t_end`.
    pub t_start: f64,
    pub t_end: f64,
    pub tolerance: f64,
}

impl Edge {
    pub fn range(&self) -> (f64, f64) {
        (self.t_start, self.t_end)
    }

    pub fn is_closed(&self) -> bool {
        self.start_vertex == self.end_vertex
    }
}

/// One oriented use of an edge inside a loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HalfEdge {
    pub edge: EdgeId,
    /// true if the loop runs from `start_vertex` to `end_vertex`.
    pub forward: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loop {
    pub half_edges: Vec<HalfEdgeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Face {
    pub surface: Surface,
    /// true if the face normal agrees with the surface normal.
    pub same_sense: bool,
    /// Counter-clockwise about the face normal.
    pub outer_loop: LoopId,
    /// Clockwise about the face normal.
    pub inner_loops: Vec<LoopId>,
    pub tolerance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShellOrientation {
    /// Outer shell (normals point outward).
    Outward,
    /// Void shell (normals point into the cavity).
    Inward,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shell {
    pub faces: Vec<FaceId>,
    pub orientation: ShellOrientation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solid {
    pub shells: Vec<ShellId>,
}

/// Orthonormal 2D frame of a planar face; `u x v` is the face normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceFrame {
    pub origin: Point3d,
    pub u: Vec3,
    pub v: Vec3,
    pub normal: Vec3,
}

impl FaceFrame {
    pub fn to_2d(&self, p: &Point3d) -> Point2d {
        let d = *p - self.origin;
        Point2d::new(d.dot(&self.u), d.dot(&self.v))
    }

    pub fn to_3d(&self, p: &Point2d) -> Point3d {
        self.origin + self.u * p.x + self.v * p.y
    }

    pub fn direction_2d(&self, d: &Vec3) -> (f64, f64) {
        (d.dot(&self.u), d.dot(&self.v))
    }

    /// Signed offset of `p` along the face normal.
    pub fn height(&self, p: &Point3d) -> f64 {
        (*p - self.origin).dot(&self.normal)
    }
}

// ─── Entity Store ────────────────────────────────────────────────────────────

/// Arena-based storage for all topological entities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityStore {
    pub vertices: SlotMap<VertexId, Vertex>,
    pub edges: SlotMap<EdgeId, Edge>,
    pub half_edges: SlotMap<HalfEdgeId, HalfEdge>,
    pub loops: SlotMap<LoopId, Loop>,
    pub faces: SlotMap<FaceId, Face>,
    pub shells: SlotMap<ShellId, Shell>,
    pub solids: SlotMap<SolidId, Solid>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// (from, to) vertices of a half-edge in loop order.
    pub fn half_edge_vertices(&self, he_id: HalfEdgeId) -> (VertexId, VertexId) {
        let he = &self.half_edges[he_id];
        let edge = &self.edges[he.edge];
        if he.forward {
            (edge.start_vertex, edge.end_vertex)
        } else {
            (edge.end_vertex, edge.start_vertex)
        }
    }

    pub fn face_loops(&self, face_id: FaceId) -> impl Iterator<Item = LoopId> + '_ {
        let face = &self.faces[face_id];
        std::iter::once(face.outer_loop).chain(face.inner_loops.iter().copied())
    }

    /// Distinct edges of a face in loop order.
    pub fn face_edges(&self, face_id: FaceId) -> Vec<EdgeId> {
        let mut out = Vec::new();
        for loop_id in self.face_loops(face_id) {
            for &he_id in &self.loops[loop_id].half_edges {
                let e = self.half_edges[he_id].edge;
                if !out.contains(&e) {
                    out.push(e);
                }
            }
        }
        out
    }

    pub fn solid_faces(&self, solid_id: SolidId) -> Vec<FaceId> {
        self.solids[solid_id]
            .shells
            .iter()
            .flat_map(|&s| self.shells[s].faces.iter().copied())
            .collect()
    }

    /// Points along a loop in traversal order, without repeating the first.
    /// Curved edges contribute `curve_samples` points.
    pub fn loop_points(&self, loop_id: LoopId, curve_samples: usize) -> Vec<Point3d> {
        let mut pts = Vec::new();
        for &he_id in &self.loops[loop_id].half_edges {
            let he = &self.half_edges[he_id];
            let edge = &self.edges[he.edge];
            let n = match edge.curve {
                Curve::Line(_) => 1,
                Curve::Circle(_) => curve_samples.max(2),
            };
            let mut samples = edge.curve.sample(edge.t_start, edge.t_end, n);
            if !he.forward {
                samples.reverse();
            }
            samples.pop();
            pts.extend(samples);
        }
        pts
    }

    /// Frame of a planar face, oriented by `same_sense`.
    pub fn face_frame(&self, face_id: FaceId) -> Option<FaceFrame> {
        let face = &self.faces[face_id];
        let plane = face.surface.as_plane()?;
        let normal = if face.same_sense { plane.normal } else { -plane.normal };
        Some(FaceFrame {
            origin: plane.origin,
            u: plane.u_axis,
            v: normal.cross(&plane.u_axis),
            normal,
        })
    }

    /// Outer ring followed by hole rings, in the face frame.
    pub fn face_rings(&self, face_id: FaceId, frame: &FaceFrame) -> Vec<Vec<Point2d>> {
        self.face_loops(face_id)
            .map(|l| self.loop_points(l, 16).iter().map(|p| frame.to_2d(p)).collect())
            .collect()
    }

    /// Outward normal of a face at a surface parameter.
    pub fn face_normal(&self, face_id: FaceId, u: f64, v: f64) -> Vec3 {
        let face = &self.faces[face_id];
        let n = face.surface.normal_at(u, v);
        if face.same_sense { n } else { -n }
    }

    pub fn edge_bounding_box(&self, edge_id: EdgeId) -> BoundingBox {
        let edge = &self.edges[edge_id];
        let n = match edge.curve {
            Curve::Line(_) => 1,
            Curve::Circle(_) => 16,
        };
        BoundingBox::from_points(&edge.curve.sample(edge.t_start, edge.t_end, n)).enlarged(edge.tolerance)
    }

    pub fn face_bounding_box(&self, face_id: FaceId) -> BoundingBox {
        let face = &self.faces[face_id];
        let mut bb = BoundingBox::empty();
        for e in self.face_edges(face_id) {
            bb.add_box(&self.edge_bounding_box(e));
        }
        if let Surface::Sphere(s) = &face.surface {
            let r = Vec3::new(s.radius, s.radius, s.radius);
            bb.add_point(&(s.center - r));
            bb.add_point(&(s.center + r));
        }
        bb.enlarged(face.tolerance)
    }

    pub fn shell_bounding_box(&self, shell_id: ShellId) -> BoundingBox {
        let mut bb = BoundingBox::empty();
        for &f in &self.shells[shell_id].faces {
            bb.add_box(&self.face_bounding_box(f));
        }
        bb
    }

    /// Count topological entities for a shell: (vertices, edges, faces).
    pub fn count_topology(&self, shell_id: ShellId) -> (usize, usize, usize) {
        let shell = &self.shells[shell_id];
        let mut edges = std::collections::HashSet::new();
        let mut vertices = std::collections::HashSet::new();
        for &face_id in &shell.faces {
            for e in self.face_edges(face_id) {
                edges.insert(e);
                vertices.insert(self.edges[e].start_vertex);
                vertices.insert(self.edges[e].end_vertex);
            }
        }
        (vertices.len(), edges.len(), shell.faces.len())
    }
}

use super::brep::*;
use crate::geometry::curves::{Curve, Line3d};
use crate::geometry::point::Point3d;
use crate::geometry::surfaces::Surface;

/// Construction helpers. Every entity is created fresh; nothing already in
/// the store is mutated, so operands stay valid while results are built
/// around them.
impl EntityStore {
    pub fn add_vertex(&mut self, point: Point3d, tolerance: f64) -> VertexId {
        self.vertices.insert(Vertex { point, tolerance })
    }

    /// Straight edge between two vertices, parameterised by arc length.
    /// Returns `None` when the vertices coincide.
    pub fn add_line_edge(&mut self, start: VertexId, end: VertexId, tolerance: f64) -> Option<EdgeId> {
        let (p0, p1) = (self.vertices[start].point, self.vertices[end].point);
        let line = Line3d::from_points(p0, p1)?;
        Some(self.add_edge(Curve::Line(line), start, end, (0.0, p0.distance_to(&p1)), tolerance))
    }

    pub fn add_edge(
        &mut self,
        curve: Curve,
        start: VertexId,
        end: VertexId,
        (t_start, t_end): (f64, f64),
        tolerance: f64,
    ) -> EdgeId {
        self.edges.insert(Edge {
            curve,
            start_vertex: start,
            end_vertex: end,
            t_start,
            t_end,
            tolerance,
        })
    }

    /// Loop from `(edge, forward)` uses in traversal order.
    pub fn add_loop(&mut self, uses: &[(EdgeId, bool)]) -> LoopId {
        let half_edges = uses
            .iter()
            .map(|&(edge, forward)| self.half_edges.insert(HalfEdge { edge, forward }))
            .collect();
        self.loops.insert(Loop { half_edges })
    }

    pub fn add_face(
        &mut self,
        surface: Surface,
        same_sense: bool,
        outer_loop: LoopId,
        inner_loops: Vec<LoopId>,
        tolerance: f64,
    ) -> FaceId {
        self.faces.insert(Face {
            surface,
            same_sense,
            outer_loop,
            inner_loops,
            tolerance,
        })
    }

    pub fn add_shell(&mut self, faces: Vec<FaceId>, orientation: ShellOrientation) -> ShellId {
        self.shells.insert(Shell { faces, orientation })
    }

    pub fn add_solid(&mut self, shells: Vec<ShellId>) -> SolidId {
        self.solids.insert(Solid { shells })
    }

    /// Copy of `loop_id` traversed backwards.
    pub fn reversed_loop(&mut self, loop_id: LoopId) -> LoopId {
        let uses: Vec<(EdgeId, bool)> = self.loops[loop_id]
            .half_edges
            .iter()
            .rev()
            .map(|&he| {
                let he = &self.half_edges[he];
                (he.edge, !he.forward)
            })
            .collect();
        self.add_loop(&uses)
    }

    /// New face on the same surface and edges with the opposite normal.
    pub fn reversed_face(&mut self, face_id: FaceId) -> FaceId {
        let face = self.faces[face_id].clone();
        let outer = self.reversed_loop(face.outer_loop);
        let inner = face.inner_loops.iter().map(|&l| self.reversed_loop(l)).collect();
        self.add_face(face.surface, !face.same_sense, outer, inner, face.tolerance)
    }
}

use std::collections::HashMap;

use tracing::{info, instrument};

use crate::topology::brep::*;

/// Result of a topological consistency check of one shell.
#[derive(Debug, Clone)]
pub struct ShellAudit {
    /// `V - E + F - H` is even and at most 2 (H counts inner loops).
    pub euler_valid: bool,
    pub genus: i64,
    pub all_faces_closed: bool,
    /// Every edge is used exactly once in each direction.
    pub all_edges_two_faced: bool,
    pub errors: Vec<TopologyError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TopologyError {
    EulerViolation { v: usize, e: usize, f: usize, holes: usize },
    OpenLoop { loop_id: LoopId },
    FreeEdge { edge: EdgeId },
    NonManifoldEdge { edge: EdgeId, uses: usize },
    MisorientedEdge { edge: EdgeId },
}

impl ShellAudit {
    /// Closed and consistently oriented.
    pub fn is_closed(&self) -> bool {
        self.all_faces_closed && self.all_edges_two_faced
    }

    pub fn all_valid(&self) -> bool {
        self.is_closed() && self.euler_valid
    }
}

fn is_loop_closed(store: &EntityStore, loop_id: LoopId) -> bool {
    let hes = &store.loops[loop_id].half_edges;
    if hes.is_empty() {
        return false;
    }
    (0..hes.len()).all(|i| {
        let (_, to) = store.half_edge_vertices(hes[i]);
        let (from, _) = store.half_edge_vertices(hes[(i + 1) % hes.len()]);
        to == from
    })
}

/// Audit an arbitrary face set as if it were one shell.
pub fn audit_faces(store: &EntityStore, faces: &[FaceId]) -> ShellAudit {
    let mut errors = Vec::new();
    let mut all_faces_closed = true;
    let mut uses: HashMap<EdgeId, (usize, usize)> = HashMap::new();
    let mut vertices = std::collections::HashSet::new();
    let mut holes = 0;

    for &face_id in faces {
        holes += store.faces[face_id].inner_loops.len();
        for loop_id in store.face_loops(face_id) {
            if !is_loop_closed(store, loop_id) {
                all_faces_closed = false;
                errors.push(TopologyError::OpenLoop { loop_id });
            }
            for &he_id in &store.loops[loop_id].half_edges {
                let he = &store.half_edges[he_id];
                let entry = uses.entry(he.edge).or_default();
                if he.forward {
                    entry.0 += 1;
                } else {
                    entry.1 += 1;
                }
                let edge = &store.edges[he.edge];
                vertices.insert(edge.start_vertex);
                vertices.insert(edge.end_vertex);
            }
        }
    }

    let mut all_edges_two_faced = true;
    let mut edges: Vec<_> = uses.iter().collect();
    edges.sort_by_key(|(e, _)| **e);
    for (&edge, &(fwd, bwd)) in edges {
        match fwd + bwd {
            1 => errors.push(TopologyError::FreeEdge { edge }),
            2 if fwd == 1 => continue,
            2 => errors.push(TopologyError::MisorientedEdge { edge }),
            n => errors.push(TopologyError::NonManifoldEdge { edge, uses: n }),
        }
        all_edges_two_faced = false;
    }

    let (v, e, f) = (vertices.len(), uses.len(), faces.len());
    let chi = v as i64 - e as i64 + f as i64 - holes as i64;
    let euler_valid = chi <= 2 && chi % 2 == 0;
    if !euler_valid {
        errors.push(TopologyError::EulerViolation { v, e, f, holes });
    }

    ShellAudit {
        euler_valid,
        genus: (2 - chi) / 2,
        all_faces_closed,
        all_edges_two_faced,
        errors,
    }
}

pub fn audit_shell(store: &EntityStore, shell_id: ShellId) -> ShellAudit {
    audit_faces(store, &store.shells[shell_id].faces)
}

/// Audit every shell of a solid.
#[instrument(skip(store))]
pub fn verify_solid(store: &EntityStore, solid_id: SolidId) -> Vec<ShellAudit> {
    let audits: Vec<ShellAudit> = store.solids[solid_id]
        .shells
        .iter()
        .map(|&s| audit_shell(store, s))
        .collect();
    info!(
        shells = audits.len(),
        closed = audits.iter().all(ShellAudit::is_closed),
        error_count = audits.iter().map(|a| a.errors.len()).sum::<usize>(),
        "solid audit complete"
    );
    audits
}

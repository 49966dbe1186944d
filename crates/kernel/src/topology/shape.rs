use serde::{Deserialize, Serialize};

use super::brep::{EdgeId, EntityStore, FaceId, ShellId, SolidId, VertexId};

/// Kind of a topological entity, ordered by decreasing dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Solid,
    Shell,
    Face,
    Edge,
    Vertex,
}

impl EntityKind {
    pub fn dimension(self) -> u8 {
        match self {
            EntityKind::Solid | EntityKind::Shell => 3,
            EntityKind::Face => 2,
            EntityKind::Edge => 1,
            EntityKind::Vertex => 0,
        }
    }
}

/// Typed reference to one entity of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityRef {
    Vertex(VertexId),
    Edge(EdgeId),
    Face(FaceId),
    Shell(ShellId),
    Solid(SolidId),
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Vertex(_) => EntityKind::Vertex,
            EntityRef::Edge(_) => EntityKind::Edge,
            EntityRef::Face(_) => EntityKind::Face,
            EntityRef::Shell(_) => EntityKind::Shell,
            EntityRef::Solid(_) => EntityKind::Solid,
        }
    }
}

/// An operand or a result: one entity, a compound of shapes, or nothing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Shape {
    #[default]
    Empty,
    Vertex(VertexId),
    Edge(EdgeId),
    Face(FaceId),
    Shell(ShellId),
    Solid(SolidId),
    Compound(Vec<Shape>),
}

impl From<EntityRef> for Shape {
    fn from(r: EntityRef) -> Self {
        match r {
            EntityRef::Vertex(v) => Shape::Vertex(v),
            EntityRef::Edge(e) => Shape::Edge(e),
            EntityRef::Face(f) => Shape::Face(f),
            EntityRef::Shell(s) => Shape::Shell(s),
            EntityRef::Solid(s) => Shape::Solid(s),
        }
    }
}

impl Shape {
    /// Builds the canonical shape for a list of entities: nothing, the
    /// single entity, or a compound.
    pub fn from_entities(mut items: Vec<EntityRef>) -> Shape {
        match items.len() {
            0 => Shape::Empty,
            1 => Shape::from(items.remove(0)),
            _ => Shape::Compound(items.into_iter().map(Shape::from).collect()),
        }
    }

    pub fn entity(&self) -> Option<EntityRef> {
        match self {
            Shape::Vertex(v) => Some(EntityRef::Vertex(*v)),
            Shape::Edge(e) => Some(EntityRef::Edge(*e)),
            Shape::Face(f) => Some(EntityRef::Face(*f)),
            Shape::Shell(s) => Some(EntityRef::Shell(*s)),
            Shape::Solid(s) => Some(EntityRef::Solid(*s)),
            Shape::Empty | Shape::Compound(_) => None,
        }
    }

    /// Top-level entities with compounds flattened.
    pub fn leaves(&self) -> Vec<EntityRef> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<EntityRef>) {
        match self {
            Shape::Empty => {}
            Shape::Compound(items) => items.iter().for_each(|s| s.collect_leaves(out)),
            other => out.extend(other.entity()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.leaves().is_empty()
    }

    pub fn solids(&self) -> Vec<SolidId> {
        self.leaves()
            .into_iter()
            .filter_map(|r| match r {
                EntityRef::Solid(s) => Some(s),
                _ => None,
            })
            .collect()
    }
}

impl EntityStore {
    pub fn contains(&self, r: EntityRef) -> bool {
        match r {
            EntityRef::Vertex(id) => self.vertices.contains_key(id),
            EntityRef::Edge(id) => self.edges.contains_key(id),
            EntityRef::Face(id) => self.faces.contains_key(id),
            EntityRef::Shell(id) => self.shells.contains_key(id),
            EntityRef::Solid(id) => self.solids.contains_key(id),
        }
    }

    /// Direct sub-entities. Faces list their edges in loop order.
    pub fn children(&self, r: EntityRef) -> Vec<EntityRef> {
        match r {
            EntityRef::Solid(id) => self.solids[id].shells.iter().map(|&s| EntityRef::Shell(s)).collect(),
            EntityRef::Shell(id) => self.shells[id].faces.iter().map(|&f| EntityRef::Face(f)).collect(),
            EntityRef::Face(id) => self.face_edges(id).into_iter().map(EntityRef::Edge).collect(),
            EntityRef::Edge(id) => {
                let e = &self.edges[id];
                if e.is_closed() {
                    vec![EntityRef::Vertex(e.start_vertex)]
                } else {
                    vec![EntityRef::Vertex(e.start_vertex), EntityRef::Vertex(e.end_vertex)]
                }
            }
            EntityRef::Vertex(_) => vec![],
        }
    }

    /// Every entity reachable from `shape`, each listed once, parents
    /// before children.
    pub fn explore(&self, shape: &Shape) -> Vec<EntityRef> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        let mut stack: Vec<EntityRef> = shape.leaves().into_iter().rev().collect();
        while let Some(r) = stack.pop() {
            if !seen.insert(r) {
                continue;
            }
            out.push(r);
            stack.extend(self.children(r).into_iter().rev());
        }
        out
    }

    pub fn explore_kind(&self, shape: &Shape, kind: EntityKind) -> Vec<EntityRef> {
        self.explore(shape).into_iter().filter(|r| r.kind() == kind).collect()
    }
}

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::topology::brep::EntityStore;
use crate::topology::shape::{EntityRef, Shape};

/// Fate of one input entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityStatus {
    /// The entity itself is part of the result.
    Unchanged,
    /// Replaced by these result entities (split, merged or re-oriented).
    Modified(Vec<EntityRef>),
    /// No image in the result.
    Deleted,
}

/// Part of an input edge that collapsed below tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VanishedFragment {
    pub edge: EntityRef,
    pub range: (f64, f64),
}

/// Incremental record of input -> output relations, filled by every stage.
#[derive(Debug, Clone, Default)]
pub struct HistoryCollector {
    inputs: Vec<EntityRef>,
    images: HashMap<EntityRef, Vec<EntityRef>>,
    generated: HashMap<EntityRef, Vec<EntityRef>>,
    vanished: Vec<VanishedFragment>,
}

fn push_unique(list: &mut Vec<EntityRef>, r: EntityRef) {
    if !list.contains(&r) {
        list.push(r);
    }
}

impl HistoryCollector {
    pub fn add_input(&mut self, r: EntityRef) {
        if !self.images.contains_key(&r) {
            self.inputs.push(r);
            self.images.insert(r, Vec::new());
        }
    }

    pub fn is_input(&self, r: EntityRef) -> bool {
        self.images.contains_key(&r)
    }

    /// `image` replaces (part of) the input `source`.
    pub fn add_image(&mut self, source: EntityRef, image: EntityRef) {
        if let Some(list) = self.images.get_mut(&source) {
            push_unique(list, image);
        }
    }

    /// `created` is new geometry produced from `source` (section edges of
    /// faces, intersection vertices of edges).
    pub fn add_generated(&mut self, source: EntityRef, created: EntityRef) {
        if self.is_input(source) {
            push_unique(self.generated.entry(source).or_default(), created);
        }
    }

    pub fn add_vanished(&mut self, edge: EntityRef, range: (f64, f64)) {
        self.vanished.push(VanishedFragment { edge, range });
    }

    /// Resolve every record against the final shape.
    pub fn finalize(self, store: &EntityStore, result: &Shape) -> History {
        let in_result: HashSet<EntityRef> = store.explore(result).into_iter().collect();
        let mut status = HashMap::with_capacity(self.inputs.len());
        for &input in &self.inputs {
            let mut images: Vec<EntityRef> = self.images[&input]
                .iter()
                .copied()
                .filter(|r| in_result.contains(r))
                .collect();
            if in_result.contains(&input) {
                push_unique(&mut images, input);
            }
            let s = match images.as_slice() {
                [] => EntityStatus::Deleted,
                [only] if *only == input => EntityStatus::Unchanged,
                _ => EntityStatus::Modified(images),
            };
            status.insert(input, s);
        }
        let generated = self
            .generated
            .into_iter()
            .filter_map(|(k, v)| {
                let kept: Vec<EntityRef> = v.into_iter().filter(|r| in_result.contains(r)).collect();
                (!kept.is_empty()).then_some((k, kept))
            })
            .collect();
        debug!(inputs = self.inputs.len(), "history finalized");
        History {
            inputs: self.inputs,
            status,
            generated,
            vanished: self.vanished,
        }
    }
}

/// Queryable history of a finished operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    inputs: Vec<EntityRef>,
    status: HashMap<EntityRef, EntityStatus>,
    generated: HashMap<EntityRef, Vec<EntityRef>>,
    vanished: Vec<VanishedFragment>,
}

impl History {
    /// Every registered input entity, in registration order.
    pub fn inputs(&self) -> &[EntityRef] {
        &self.inputs
    }

    /// `None` for entities that were not part of either operand.
    pub fn status(&self, r: EntityRef) -> Option<&EntityStatus> {
        self.status.get(&r)
    }

    /// Result entities replacing `r`; empty when `r` is unchanged or deleted.
    pub fn modified(&self, r: EntityRef) -> Vec<EntityRef> {
        match self.status.get(&r) {
            Some(EntityStatus::Modified(images)) => images.clone(),
            _ => Vec::new(),
        }
    }

    pub fn is_deleted(&self, r: EntityRef) -> bool {
        matches!(self.status.get(&r), Some(EntityStatus::Deleted))
    }

    pub fn generated(&self, r: EntityRef) -> Vec<EntityRef> {
        self.generated.get(&r).cloned().unwrap_or_default()
    }

    pub fn vanished_fragments(&self) -> &[VanishedFragment] {
        &self.vanished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::primitives::make_box;

    #[test]
    fn statuses_resolve_against_result() {
        let mut store = EntityStore::new();
        let a = make_box(&mut store, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0);
        let b = make_box(&mut store, 3.0, 0.0, 0.0, 4.0, 1.0, 1.0);
        let c = make_box(&mut store, 6.0, 0.0, 0.0, 7.0, 1.0, 1.0);
        let (ra, rb, rc) = (EntityRef::Solid(a), EntityRef::Solid(b), EntityRef::Solid(c));

        let mut h = HistoryCollector::default();
        h.add_input(ra);
        h.add_input(rb);
        h.add_input(rb);
        h.add_image(rb, rc);
        h.add_generated(ra, rc);
        h.add_generated(rc, ra);

        let result = Shape::Compound(vec![Shape::Solid(a), Shape::Solid(c)]);
        let history = h.finalize(&store, &result);
        assert_eq!(history.inputs(), &[ra, rb]);
        assert_eq!(history.status(ra), Some(&EntityStatus::Unchanged));
        assert_eq!(history.modified(rb), vec![rc]);
        assert!(!history.is_deleted(rb));
        assert_eq!(history.generated(ra), vec![rc]);
        assert!(history.generated(rc).is_empty());
        assert_eq!(history.status(rc), None);
    }

    #[test]
    fn missing_images_mean_deleted() {
        let mut store = EntityStore::new();
        let a = make_box(&mut store, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0);
        let mut h = HistoryCollector::default();
        h.add_input(EntityRef::Solid(a));
        h.add_vanished(EntityRef::Solid(a), (0.0, 1e-9));
        let history = h.finalize(&store, &Shape::Empty);
        assert!(history.is_deleted(EntityRef::Solid(a)));
        assert!(history.modified(EntityRef::Solid(a)).is_empty());
        assert_eq!(history.vanished_fragments().len(), 1);
    }
}

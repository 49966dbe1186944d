//! General Fuse Boolean operations on B-Rep shapes.
//!
//! The pipeline runs in five stages over a shared registry of both
//! operands: registration ([`ds`]), interference detection
//! ([`interference`]), pave and common blocks ([`pave`]), face splitting
//! and classification ([`split`], [`classify`]), and result assembly
//! ([`builder`]). [`engine::BooleanOperation`] drives one run.

pub mod builder;
pub mod classify;
pub mod disjoint_set;
pub mod ds;
pub mod engine;
pub mod history;
pub mod interference;
pub mod options;
pub mod pave;
pub mod progress;
pub mod report;
pub mod split;

use crate::topology::brep::EntityStore;
use crate::topology::shape::Shape;
use engine::{BooleanOperation, BooleanOutput};
use options::{BooleanConfig, Operation};
use progress::ProgressToken;
use report::BooleanError;

/// Trait for Boolean operations on B-Rep shapes.
///
/// Implement [`BooleanEngine::perform`] to provide an alternative backend
/// or a mock; the named operations are provided on top of it.
pub trait BooleanEngine {
    fn perform(
        &self,
        store: &mut EntityStore,
        object: &Shape,
        tool: &Shape,
        operation: Operation,
    ) -> Result<BooleanOutput, BooleanError>;

    fn fuse(&self, store: &mut EntityStore, object: &Shape, tool: &Shape) -> Result<BooleanOutput, BooleanError> {
        self.perform(store, object, tool, Operation::Fuse)
    }

    /// Subtract `tool` from `object`.
    fn cut(&self, store: &mut EntityStore, object: &Shape, tool: &Shape) -> Result<BooleanOutput, BooleanError> {
        self.perform(store, object, tool, Operation::Cut)
    }

    fn common(&self, store: &mut EntityStore, object: &Shape, tool: &Shape) -> Result<BooleanOutput, BooleanError> {
        self.perform(store, object, tool, Operation::Common)
    }

    fn section(&self, store: &mut EntityStore, object: &Shape, tool: &Shape) -> Result<BooleanOutput, BooleanError> {
        self.perform(store, object, tool, Operation::Section)
    }
}

/// Default engine: [`BooleanOperation`] with a fixed fuzzy value and
/// parallel hint.
#[derive(Debug, Clone, Default)]
pub struct DefaultBooleanEngine {
    pub fuzzy_tolerance: f64,
    pub parallel: bool,
    pub progress: ProgressToken,
}

impl BooleanEngine for DefaultBooleanEngine {
    fn perform(
        &self,
        store: &mut EntityStore,
        object: &Shape,
        tool: &Shape,
        operation: Operation,
    ) -> Result<BooleanOutput, BooleanError> {
        let config = BooleanConfig::new(object.clone(), tool.clone(), operation)
            .with_fuzzy(self.fuzzy_tolerance)
            .with_parallel(self.parallel);
        BooleanOperation::new(config).perform(store, &self.progress)
    }
}

pub mod geometry;
pub mod topology;
pub mod boolean;
pub mod validation;

// Re-export the main entry points at crate root for convenience.
pub use boolean::engine::{BooleanOperation, BooleanOutput, common, cut, fuse, section};
pub use boolean::history::{EntityStatus, History};
pub use boolean::options::{BooleanConfig, Operation, Tuning};
pub use boolean::progress::{ProgressToken, Stage};
pub use boolean::report::{BooleanError, Report, Warning, WarningKind};
pub use boolean::{BooleanEngine, DefaultBooleanEngine};
pub use geometry::{Evaluable, GeometryEngine, SurfaceEvaluable};
pub use topology::brep::EntityStore;
pub use topology::shape::{EntityKind, EntityRef, Shape};

/// Global tolerance configuration for geometric comparisons.
#[derive(Debug, Clone, Copy)]
pub struct Tolerance {
    /// Points closer than this are considered coincident (meters).
    pub coincidence: f64,
    /// Angles smaller than this (radians) are considered zero.
    pub angular: f64,
    /// Parameter-space tolerance for curve/surface evaluations.
    pub parametric: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            coincidence: 1e-7,
            angular: 1e-10,
            parametric: 1e-9,
        }
    }
}

/// Default tolerance used by primitives and new entities.
pub fn default_tolerance() -> Tolerance {
    Tolerance::default()
}

use serde::{Deserialize, Serialize};

use super::report::BooleanError;
use crate::topology::shape::Shape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Fuse,
    Cut,
    Common,
    Section,
}

/// Empirically tuned constants. Defaults are calibrated against the
/// regression scenarios in `tests/`; load other values with [`Tuning::from_json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Sample points tried before a fragment defaults to `OnBoundary`.
    pub classification_attempts: usize,
    /// Rays cast per membership test (at most 7).
    pub ray_count: usize,
    /// Turning angles closer than this (radians) count as a tie.
    pub turning_angle_tie: f64,
    /// Fixed-point passes over new section edges.
    pub max_passes: usize,
    /// Tolerance multiplier per retry of an ambiguous intersection.
    pub tolerance_growth_factor: f64,
    pub tolerance_growth_attempts: usize,
    /// Interior samples used to confirm two pave blocks coincide.
    pub common_block_samples: usize,
    /// Pairs or fragments per cancellation checkpoint.
    pub batch_size: usize,
    /// Offset of face samples along the normal, in multiples of the tolerance.
    pub normal_offset_factor: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            classification_attempts: 4,
            ray_count: 5,
            turning_angle_tie: 1e-9,
            max_passes: 4,
            tolerance_growth_factor: 2.0,
            tolerance_growth_attempts: 3,
            common_block_samples: 3,
            batch_size: 256,
            normal_offset_factor: 1e3,
        }
    }
}

impl Tuning {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// In-memory configuration of one Boolean run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanConfig {
    /// (object, tool)
    pub operands: (Shape, Shape),
    pub operation: Operation,
    /// Added to the summed entity tolerances in every coincidence test.
    pub fuzzy_tolerance: f64,
    pub parallel_hint: bool,
    #[serde(default)]
    pub tuning: Tuning,
}

impl BooleanConfig {
    pub fn new(object: Shape, tool: Shape, operation: Operation) -> Self {
        Self {
            operands: (object, tool),
            operation,
            fuzzy_tolerance: 0.0,
            parallel_hint: false,
            tuning: Tuning::default(),
        }
    }

    pub fn with_fuzzy(mut self, fuzzy: f64) -> Self {
        self.fuzzy_tolerance = fuzzy;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel_hint = parallel;
        self
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn validate(&self) -> Result<(), BooleanError> {
        if !self.fuzzy_tolerance.is_finite() || self.fuzzy_tolerance < 0.0 {
            return Err(BooleanError::invalid(format!(
                "fuzzy tolerance must be finite and non-negative, got {}",
                self.fuzzy_tolerance
            )));
        }
        if self.operands.0.is_empty() || self.operands.1.is_empty() {
            return Err(BooleanError::invalid("empty operand"));
        }
        let t = &self.tuning;
        if t.ray_count == 0 || t.batch_size == 0 || t.tolerance_growth_factor <= 1.0 {
            return Err(BooleanError::invalid("tuning constants out of range"));
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::progress::Stage;
use crate::topology::shape::EntityRef;

/// Hard failures: no shape is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BooleanError {
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("operation cancelled during {stage:?}")]
    Cancelled { stage: Stage },

    #[error("no valid output producible: {reason}")]
    NoValidOutput { reason: String },
}

impl BooleanError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        BooleanError::InvalidArgument { reason: reason.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarningKind {
    /// Intersection stayed ambiguous after every tolerance growth attempt.
    ToleranceExhausted,
    /// A wire or shell junction could not be resolved.
    AssemblyAmbiguous,
    /// Section curves were still producing new interferences at the pass limit.
    PassLimitReached,
    /// The geometry engine could not intersect a pair.
    IntersectionFailed,
    /// Membership stayed undecided; the fragment defaulted to `OnBoundary`.
    ClassificationInconclusive,
    /// An edge fragment within tolerance of zero length vanished.
    SmallEdge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub entities: Vec<EntityRef>,
    pub message: String,
}

/// Recoverable conditions accumulated over one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub warnings: Vec<Warning>,
}

impl Report {
    pub fn push(&mut self, kind: WarningKind, entities: Vec<EntityRef>, message: impl Into<String>) {
        let message = message.into();
        warn!(?kind, ?entities, "{message}");
        self.warnings.push(Warning { kind, entities, message });
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn count(&self, kind: WarningKind) -> usize {
        self.warnings.iter().filter(|w| w.kind == kind).count()
    }

    pub fn has(&self, kind: WarningKind) -> bool {
        self.count(kind) > 0
    }

    pub fn extend(&mut self, other: Report) {
        self.warnings.extend(other.warnings);
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

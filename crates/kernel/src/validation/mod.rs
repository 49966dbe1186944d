//! Checks on built shapes: topological audit of shells and exact
//! volumes of planar and full-revolution B-Reps.

pub mod audit;
pub mod volume;

pub use audit::{ShellAudit, TopologyError, audit_faces, audit_shell, verify_solid};
pub use volume::{VolumeVerification, face_area, shape_volume, solid_volume, verify_boolean_volume_identity};

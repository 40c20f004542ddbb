//! Core types: artifacts and step status.

mod artifact;
mod status;

pub use artifact::{ArtifactKind, AuxArtifact, Modality, Scan, Transform};
pub use status::StepStatus;

//! Artifact store: where every artifact of a subject lives.
//!
//! All paths are derived from `(output_dir, subject, label, suffix)` and
//! nothing else, so two runs over the same configuration always agree on
//! where to look.

mod catalog;
mod naming;

pub use catalog::ArtifactId;
pub use naming::{
    path_for, subject_dir, JSON_SUFFIX, LOG_SUFFIX, SCENE_FILE_NAME, TRANSFORM_SUFFIX,
    VOLUME_SUFFIX,
};

use crate::core::{AuxArtifact, Scan, Transform};
use std::path::{Path, PathBuf};

const STAGING_DIR: &str = ".staging";
const SCRATCH_DIR: &str = ".scratch";

/// Resolves catalog artifacts to storage paths for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    output_dir: PathBuf,
    subject: String,
}

impl ArtifactStore {
    /// Creates a store rooted at `output_dir` for `subject`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, subject: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            subject: subject.into(),
        }
    }

    /// Returns the subject id.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the directory holding the subject's artifacts.
    #[must_use]
    pub fn dir(&self) -> PathBuf {
        subject_dir(&self.output_dir, &self.subject)
    }

    /// Returns the storage path of an artifact.
    #[must_use]
    pub fn path(&self, id: ArtifactId) -> PathBuf {
        path_for(&self.output_dir, &self.subject, &id.label(), id.suffix())
    }

    /// Returns the display name of an artifact (its file stem).
    #[must_use]
    pub fn display_name(&self, id: ArtifactId) -> String {
        format!("{}_{}", self.subject, id.label())
    }

    /// Returns a scan handle for an image artifact.
    ///
    /// The oriented MR carries the brain mask as its companion.
    #[must_use]
    pub fn scan(&self, id: ArtifactId) -> Scan {
        let modality = id.modality().unwrap_or(crate::core::Modality::T1w);
        let scan = Scan::new(self.path(id), self.display_name(id), modality);
        if id == ArtifactId::MrOriented {
            scan.with_mask(self.path(ArtifactId::BrainMask))
        } else {
            scan
        }
    }

    /// Returns a transform handle.
    #[must_use]
    pub fn transform(&self, id: ArtifactId) -> Transform {
        Transform::new(self.path(id), self.display_name(id))
    }

    /// Returns an auxiliary artifact handle.
    #[must_use]
    pub fn auxiliary(&self, id: ArtifactId) -> AuxArtifact {
        AuxArtifact::new(self.path(id), self.display_name(id))
    }

    /// Returns the path of the scene hand-off file.
    #[must_use]
    pub fn scene_path(&self) -> PathBuf {
        self.dir().join(SCENE_FILE_NAME)
    }

    /// Returns the staging directory a step writes into before publishing.
    #[must_use]
    pub fn staging_dir(&self, step: &str) -> PathBuf {
        self.dir().join(STAGING_DIR).join(step)
    }

    /// Returns the scratch directory for a step's intermediate files.
    #[must_use]
    pub fn scratch_dir(&self, step: &str) -> PathBuf {
        self.dir().join(SCRATCH_DIR).join(step)
    }

    /// Returns true if `path` lives under the subject directory.
    #[must_use]
    pub fn owns(&self, path: &Path) -> bool {
        path.starts_with(self.dir())
    }
}

//! Artifact types produced and consumed by steps.
//!
//! An artifact is only ever a handle on a file: a later processing stage
//! produces a new artifact at a new path instead of mutating an old one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Imaging modality of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// T1-weighted magnetic resonance.
    T1w,
    /// Computed tomography.
    Ct,
}

impl Modality {
    /// Returns the tag used in artifact file names.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::T1w => "t1w",
            Self::Ct => "ct",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// What an artifact file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A volumetric image.
    Scan,
    /// A spatial mapping between two scan spaces.
    Transform,
    /// A parameter or log byproduct kept for diagnostics.
    Auxiliary,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan => write!(f, "scan"),
            Self::Transform => write!(f, "transform"),
            Self::Auxiliary => write!(f, "auxiliary"),
        }
    }
}

/// A volumetric image artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scan {
    /// Where the volume is stored.
    pub path: PathBuf,
    /// Display name used by the viewer.
    pub name: String,
    /// Companion mask volume, if one is produced alongside the scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<PathBuf>,
    /// Imaging modality.
    pub modality: Modality,
}

impl Scan {
    /// Creates a new scan handle.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, modality: Modality) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            mask: None,
            modality,
        }
    }

    /// Sets the companion mask path.
    #[must_use]
    pub fn with_mask(mut self, mask: impl Into<PathBuf>) -> Self {
        self.mask = Some(mask.into());
        self
    }

    /// Returns the volume path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the backing file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

/// A spatial transform artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transform {
    /// Where the transform is stored.
    pub path: PathBuf,
    /// Descriptive name.
    pub name: String,
}

impl Transform {
    /// Creates a new transform handle.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

/// A byproduct that nothing downstream consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxArtifact {
    /// Where the file is stored.
    pub path: PathBuf,
    /// Descriptive name.
    pub name: String,
}

impl AuxArtifact {
    /// Creates a new auxiliary artifact handle.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modality_tags() {
        assert_eq!(Modality::T1w.to_string(), "t1w");
        assert_eq!(Modality::Ct.to_string(), "ct");
    }

    #[test]
    fn test_scan_with_mask() {
        let scan = Scan::new("/out/P01/P01_head_t1w.mnc", "P01_head_t1w", Modality::T1w)
            .with_mask("/out/P01/P01_head_t1w_mask.mnc");

        assert_eq!(scan.path(), Path::new("/out/P01/P01_head_t1w.mnc"));
        assert_eq!(
            scan.mask.as_deref(),
            Some(Path::new("/out/P01/P01_head_t1w_mask.mnc"))
        );
        assert!(!scan.exists());
    }

    #[test]
    fn test_scan_serialization_omits_absent_mask() {
        let scan = Scan::new("a.mnc", "a", Modality::Ct);
        let json = serde_json::to_value(&scan).unwrap();

        assert_eq!(json["modality"], "ct");
        assert!(json.get("mask").is_none());
    }
}

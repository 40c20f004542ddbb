//! Deterministic artifact naming.

use std::path::{Path, PathBuf};

/// File suffix for volumetric images.
pub const VOLUME_SUFFIX: &str = ".mnc";

/// File suffix for linear transforms.
pub const TRANSFORM_SUFFIX: &str = ".xfm";

/// File suffix for structured parameter records.
pub const JSON_SUFFIX: &str = ".json";

/// File suffix for captured tool logs.
pub const LOG_SUFFIX: &str = ".log";

/// Name of the scene hand-off file inside the subject directory.
pub const SCENE_FILE_NAME: &str = "scene.xml";

/// Returns the directory that holds every artifact of `subject`.
#[must_use]
pub fn subject_dir(output_dir: &Path, subject: &str) -> PathBuf {
    output_dir.join(subject)
}

/// Maps an artifact to its storage path.
///
/// The result is `output_dir/subject/{subject}_{label}{suffix}`. The function
/// is pure: it performs no I/O and cannot fail. For a fixed output directory
/// and subject, distinct labels always yield distinct file names.
#[must_use]
pub fn path_for(output_dir: &Path, subject: &str, label: &str, suffix: &str) -> PathBuf {
    subject_dir(output_dir, subject).join(format!("{subject}_{label}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_for_layout() {
        let path = path_for(Path::new("/data/out"), "P01", "full_head_image_t1w", VOLUME_SUFFIX);
        assert_eq!(path, PathBuf::from("/data/out/P01/P01_full_head_image_t1w.mnc"));
    }

    #[test]
    fn test_path_for_is_deterministic() {
        let a = path_for(Path::new("out"), "P01", "mr_to_tal_transform", TRANSFORM_SUFFIX);
        let b = path_for(Path::new("out"), "P01", "mr_to_tal_transform", TRANSFORM_SUFFIX);
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_labels_yield_distinct_paths() {
        let out = Path::new("out");
        let labels = ["a", "b", "a_t1w", "a_ct", "full_head_image_denoised_t1w"];
        let paths: std::collections::HashSet<_> = labels
            .iter()
            .map(|label| path_for(out, "S7", label, VOLUME_SUFFIX))
            .collect();
        assert_eq!(paths.len(), labels.len());
    }

    #[test]
    fn test_subjects_are_namespaced() {
        let out = Path::new("out");
        assert_ne!(
            path_for(out, "P01", "x", VOLUME_SUFFIX),
            path_for(out, "P02", "x", VOLUME_SUFFIX)
        );
    }
}

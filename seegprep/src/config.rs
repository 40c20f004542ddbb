//! Pipeline configuration.
//!
//! [`PipelineConfig`] is built once from the command line and never mutated;
//! every component receives it explicitly. Tunables that are not positional
//! arguments live in [`PreprocessSettings`], which can be loaded from a JSON
//! document where every field is optional.

use crate::errors::ConfigError;
use crate::store::ArtifactStore;
use crate::tools::ToolSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name pattern of the DICOM slices inside a series directory.
pub const DICOM_FILE_PREFIX: &str = "IM";

/// Locations of the fixed anatomical models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Stereotactic model volume.
    #[serde(default = "default_model_scan")]
    pub scan: PathBuf,
    /// Brain mask of the stereotactic model.
    #[serde(default = "default_model_mask")]
    pub mask: PathBuf,
    /// Template library used by brain extraction.
    #[serde(default = "default_beast_library")]
    pub beast_library: PathBuf,
}

const MODEL_DIR: &str = "/ipl/quarantine/models/icbm152_model_09c";

fn default_model_scan() -> PathBuf {
    Path::new(MODEL_DIR).join("mni_icbm152_t1_tal_nlin_sym_09c.mnc")
}

fn default_model_mask() -> PathBuf {
    Path::new(MODEL_DIR).join("mni_icbm152_t1_tal_nlin_sym_09c_mask.mnc")
}

fn default_beast_library() -> PathBuf {
    PathBuf::from("/ipl/quarantine/models/beast")
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            scan: default_model_scan(),
            mask: default_model_mask(),
            beast_library: default_beast_library(),
        }
    }
}

/// Parameters of the linear MR-to-model registration.
///
/// The defaults (no scaling, six degrees of freedom, normalized mutual
/// information) were flagged for review where they were first written down,
/// so they are kept overridable rather than hard-coded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearRegistrationConfig {
    /// Pass the no-scale flag to the registration tool.
    pub noscale: bool,
    /// Registration type flag, e.g. `-lsq6`.
    pub registration_type: String,
    /// Objective function flag, e.g. `-nmi`.
    pub objective: String,
}

impl Default for LinearRegistrationConfig {
    fn default() -> Self {
        Self {
            noscale: true,
            registration_type: "-lsq6".to_string(),
            objective: "-nmi".to_string(),
        }
    }
}

/// Registration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Parameter file for the rigid CT-to-MR registration.
    pub ct_to_mr_parameters: PathBuf,
    /// Name of the result volume the rigid tool writes into its output directory.
    pub rigid_result_file: String,
    /// MR-to-model linear registration parameters.
    pub mr_to_tal: LinearRegistrationConfig,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            ct_to_mr_parameters: PathBuf::from("parameters_register_ct_to_mr_rigid.txt"),
            rigid_result_file: "result.0.mnc".to_string(),
            mr_to_tal: LinearRegistrationConfig::default(),
        }
    }
}

/// One argument template per external operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// DICOM series to volume conversion.
    pub dicom_to_volume: ToolSpec,
    /// Denoising.
    pub denoise: ToolSpec,
    /// Nonuniformity field estimation.
    pub estimate_nonuniformity: ToolSpec,
    /// Nonuniformity field application.
    pub apply_nonuniformity: ToolSpec,
    /// Intensity normalization against the model.
    pub normalize_intensity: ToolSpec,
    /// Rigid registration with a parameter file.
    pub rigid_registration: ToolSpec,
    /// Linear registration to the model.
    pub linear_registration: ToolSpec,
    /// Scale removal from a linear transform.
    pub remove_scale: ToolSpec,
    /// Resampling through a transform.
    pub resample: ToolSpec,
    /// Brain extraction.
    pub brain_extraction: ToolSpec,
    /// Mask application.
    pub apply_mask: ToolSpec,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            dicom_to_volume: ToolSpec::new(
                "dcm2mnc",
                ["{dicom_files}", "{out_dir}", "-anon", "-fname", "{name}", "-dname", ""],
            ),
            denoise: ToolSpec::new("mincnlm", ["-clobber", "-mt", "1", "{input}", "{output}"]),
            estimate_nonuniformity: ToolSpec::new(
                "nu_estimate",
                ["-clobber", "-distance", "200", "-mask", "{model_mask}", "{input}", "{output}"],
            ),
            apply_nonuniformity: ToolSpec::new(
                "nu_evaluate",
                ["-clobber", "-mapping", "{field}", "{input}", "{output}"],
            ),
            normalize_intensity: ToolSpec::new(
                "volume_pol",
                ["--order", "1", "--min", "0", "--max", "100", "--clobber", "{input}", "{model}", "{output}"],
            ),
            rigid_registration: ToolSpec::new(
                "elastix",
                ["-f", "{fixed}", "-m", "{moving}", "-out", "{out_dir}", "-p", "{parameters}"],
            ),
            linear_registration: ToolSpec::new(
                "bestlinreg_s2",
                ["-clobber", "{noscale}", "{registration_type}", "{objective}", "{input}", "{model}", "{output}"],
            ),
            remove_scale: ToolSpec::new(
                "xfm_noscale",
                ["-clobber", "-unscale", "{unscale}", "{input}", "{output}"],
            ),
            resample: ToolSpec::new(
                "mincresample",
                ["-clobber", "-transformation", "{transform}", "-like", "{model}", "{input}", "{output}"],
            ),
            brain_extraction: ToolSpec::new(
                "mincbeast",
                [
                    "-clobber",
                    "-fill",
                    "-median",
                    "-same_resolution",
                    "-configuration",
                    "{library}/default.1mm.conf",
                    "{library}",
                    "{input}",
                    "{output}",
                ],
            ),
            apply_mask: ToolSpec::new("mincmask", ["-clobber", "{input}", "{mask}", "{output}"]),
        }
    }
}

/// How the runner treats existing artifacts and running tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Fail a step that runs longer than this many seconds.
    #[serde(default)]
    pub step_timeout_seconds: Option<f64>,
    /// Write outputs into a staging directory and rename them into place.
    #[serde(default = "default_true")]
    pub atomic_publish: bool,
    /// Re-run steps whose inputs changed after their outputs were produced.
    #[serde(default = "default_true")]
    pub rebuild_stale: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            step_timeout_seconds: None,
            atomic_publish: true,
            rebuild_stale: true,
        }
    }
}

impl RunnerConfig {
    /// Returns the step timeout, if one is configured.
    ///
    /// Values too large for a [`Duration`] mean no limit.
    #[must_use]
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_seconds
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// Optional settings layered over the positional arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// Anatomical models.
    pub models: ModelConfig,
    /// Registration parameters.
    pub registration: RegistrationConfig,
    /// External tool templates.
    pub tools: ToolsConfig,
    /// Runner behaviour.
    pub runner: RunnerConfig,
}

impl PreprocessSettings {
    /// Parses settings from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid settings JSON.
    pub fn from_json_str(json: &str, origin: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Loads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json, path)
    }
}

/// Immutable configuration of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    subject: String,
    input_dir: PathBuf,
    pre_imp_mr: String,
    post_imp_ct: String,
    output_dir: PathBuf,
    settings: PreprocessSettings,
}

impl PipelineConfig {
    /// Creates a configuration from the positional arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the subject id is empty or unsafe as a file name.
    pub fn new(
        input_dir: impl Into<PathBuf>,
        pre_imp_mr: impl Into<String>,
        post_imp_ct: impl Into<String>,
        subject: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let subject = subject.into();
        validate_subject(&subject)?;

        Ok(Self {
            subject,
            input_dir: input_dir.into(),
            pre_imp_mr: pre_imp_mr.into(),
            post_imp_ct: post_imp_ct.into(),
            output_dir: output_dir.into(),
            settings: PreprocessSettings::default(),
        })
    }

    /// Replaces the optional settings.
    #[must_use]
    pub fn with_settings(mut self, settings: PreprocessSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Returns the subject id.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the directory containing both DICOM series.
    #[must_use]
    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Returns the output directory (the parent of the subject directory).
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Returns the pre-implant MR DICOM series directory.
    #[must_use]
    pub fn mr_series_dir(&self) -> PathBuf {
        self.input_dir.join(&self.pre_imp_mr)
    }

    /// Returns the post-implant CT DICOM series directory.
    #[must_use]
    pub fn ct_series_dir(&self) -> PathBuf {
        self.input_dir.join(&self.post_imp_ct)
    }

    /// Returns the optional settings.
    #[must_use]
    pub fn settings(&self) -> &PreprocessSettings {
        &self.settings
    }

    /// Returns the artifact store for this run.
    #[must_use]
    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(&self.output_dir, &self.subject)
    }

    /// Checks that the directories the run reads from already exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingDirectory`] for the first missing one.
    pub fn check_directories(&self) -> Result<(), ConfigError> {
        for dir in [self.output_dir.clone(), self.mr_series_dir(), self.ct_series_dir()] {
            if !dir.is_dir() {
                return Err(ConfigError::missing_directory(dir));
            }
        }
        Ok(())
    }
}

fn validate_subject(subject: &str) -> Result<(), ConfigError> {
    if subject.trim().is_empty() {
        return Err(ConfigError::EmptySubject);
    }
    let safe = subject
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !safe || subject == "." || subject == ".." {
        return Err(ConfigError::InvalidSubject {
            subject: subject.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_validation() {
        assert!(PipelineConfig::new("in", "MR001", "CT001", "P01", "out").is_ok());
        assert!(matches!(
            PipelineConfig::new("in", "MR001", "CT001", "  ", "out"),
            Err(ConfigError::EmptySubject)
        ));
        assert!(matches!(
            PipelineConfig::new("in", "MR001", "CT001", "../P01", "out"),
            Err(ConfigError::InvalidSubject { .. })
        ));
        assert!(PipelineConfig::new("in", "MR001", "CT001", "..", "out").is_err());
    }

    #[test]
    fn test_series_dirs() {
        let config = PipelineConfig::new("/in", "MR001", "CT001", "P01", "/out").unwrap();
        assert_eq!(config.mr_series_dir(), PathBuf::from("/in/MR001"));
        assert_eq!(config.ct_series_dir(), PathBuf::from("/in/CT001"));
        assert_eq!(config.store().dir(), PathBuf::from("/out/P01"));
    }

    #[test]
    fn test_linear_registration_defaults() {
        let config = LinearRegistrationConfig::default();
        assert!(config.noscale);
        assert_eq!(config.registration_type, "-lsq6");
        assert_eq!(config.objective, "-nmi");
    }

    #[test]
    fn test_partial_settings_keep_defaults() {
        let json = r#"{
            "registration": { "mr_to_tal": { "objective": "-xcorr" } },
            "runner": { "step_timeout_seconds": 3600 }
        }"#;
        let settings = PreprocessSettings::from_json_str(json, Path::new("settings.json")).unwrap();

        assert_eq!(settings.registration.mr_to_tal.objective, "-xcorr");
        assert!(settings.registration.mr_to_tal.noscale);
        assert_eq!(settings.registration.rigid_result_file, "result.0.mnc");
        assert_eq!(settings.runner.step_timeout(), Some(Duration::from_secs(3600)));
        assert!(settings.runner.atomic_publish);
        assert_eq!(settings.tools, ToolsConfig::default());
        assert_eq!(settings.models, ModelConfig::default());
    }

    #[test]
    fn test_tool_override() {
        let json = r#"{ "tools": { "denoise": { "program": "/opt/bin/anlm", "args": ["{input}", "{output}"] } } }"#;
        let settings = PreprocessSettings::from_json_str(json, Path::new("s.json")).unwrap();

        assert_eq!(settings.tools.denoise.program, "/opt/bin/anlm");
        assert_eq!(settings.tools.apply_mask.program, "mincmask");
    }

    #[test]
    fn test_invalid_settings_report_origin() {
        let err = PreprocessSettings::from_json_str("{ not json", Path::new("bad.json")).unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }

    #[test]
    fn test_non_positive_timeout_is_ignored() {
        let runner = RunnerConfig {
            step_timeout_seconds: Some(0.0),
            ..RunnerConfig::default()
        };
        assert_eq!(runner.step_timeout(), None);
    }

    #[test]
    fn test_unrepresentable_timeout_means_no_limit() {
        let runner = RunnerConfig {
            step_timeout_seconds: Some(1e30),
            ..RunnerConfig::default()
        };
        assert_eq!(runner.step_timeout(), None);

        let json = r#"{ "runner": { "step_timeout_seconds": 1e300 } }"#;
        let settings = PreprocessSettings::from_json_str(json, Path::new("settings.json")).unwrap();
        assert_eq!(settings.runner.step_timeout(), None);
    }

    #[test]
    fn test_check_directories() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("in/MR001")).unwrap();
        std::fs::create_dir_all(root.path().join("out")).unwrap();

        let config = PipelineConfig::new(
            root.path().join("in"),
            "MR001",
            "CT001",
            "P01",
            root.path().join("out"),
        )
        .unwrap();

        match config.check_directories() {
            Err(ConfigError::MissingDirectory { path }) => {
                assert_eq!(path, root.path().join("in/CT001"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

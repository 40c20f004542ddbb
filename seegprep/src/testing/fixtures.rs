//! On-disk fixtures.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::{ModelConfig, PipelineConfig, PreprocessSettings, RegistrationConfig};
use crate::errors::ConfigError;

/// Subject id used by [`SubjectFixture`].
pub const FIXTURE_SUBJECT: &str = "P01";
/// MR series directory name used by [`SubjectFixture`].
pub const FIXTURE_MR_SERIES: &str = "MR001";
/// CT series directory name used by [`SubjectFixture`].
pub const FIXTURE_CT_SERIES: &str = "CT001";

/// A temporary input tree, model set and empty output directory.
///
/// Layout:
///
/// ```text
/// <root>/input/MR001/IM1..IM3
/// <root>/input/CT001/IM1..IM2
/// <root>/models/{model.mnc, model_mask.mnc, beast/, rigid.txt}
/// <root>/output/
/// ```
#[derive(Debug)]
pub struct SubjectFixture {
    root: TempDir,
}

impl SubjectFixture {
    /// Creates the fixture tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary tree cannot be written.
    pub fn new() -> io::Result<Self> {
        let root = tempfile::tempdir()?;
        let fixture = Self { root };

        for (series, count) in [(FIXTURE_MR_SERIES, 3), (FIXTURE_CT_SERIES, 2)] {
            let dir = fixture.input_dir().join(series);
            std::fs::create_dir_all(&dir)?;
            for i in 1..=count {
                std::fs::write(dir.join(format!("IM{i}")), format!("{series} slice {i}"))?;
            }
        }

        let models = fixture.models_dir();
        std::fs::create_dir_all(models.join("beast"))?;
        std::fs::write(models.join("model.mnc"), b"model")?;
        std::fs::write(models.join("model_mask.mnc"), b"mask")?;
        std::fs::write(models.join("rigid.txt"), b"(Transform \"EulerTransform\")")?;

        std::fs::create_dir_all(fixture.output_dir())?;
        Ok(fixture)
    }

    /// Returns the fixture root.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Returns the input directory holding both series.
    #[must_use]
    pub fn input_dir(&self) -> PathBuf {
        self.root().join("input")
    }

    /// Returns the models directory.
    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.root().join("models")
    }

    /// Returns the output directory.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.root().join("output")
    }

    /// Returns the subject's artifact directory.
    #[must_use]
    pub fn subject_dir(&self) -> PathBuf {
        self.output_dir().join(FIXTURE_SUBJECT)
    }

    /// Settings pointing at the fixture's models.
    #[must_use]
    pub fn settings(&self) -> PreprocessSettings {
        let models = self.models_dir();
        PreprocessSettings {
            models: ModelConfig {
                scan: models.join("model.mnc"),
                mask: models.join("model_mask.mnc"),
                beast_library: models.join("beast"),
            },
            registration: RegistrationConfig {
                ct_to_mr_parameters: models.join("rigid.txt"),
                ..RegistrationConfig::default()
            },
            ..PreprocessSettings::default()
        }
    }

    /// Pipeline configuration for the fixture subject.
    ///
    /// # Errors
    ///
    /// Never fails for the fixture's subject id; the result mirrors
    /// [`PipelineConfig::new`].
    pub fn config(&self) -> Result<PipelineConfig, ConfigError> {
        Ok(PipelineConfig::new(
            self.input_dir(),
            FIXTURE_MR_SERIES,
            FIXTURE_CT_SERIES,
            FIXTURE_SUBJECT,
            self.output_dir(),
        )?
        .with_settings(self.settings()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_layout() {
        let fixture = SubjectFixture::new().unwrap();
        let config = fixture.config().unwrap();

        config.check_directories().unwrap();
        assert!(config.mr_series_dir().join("IM3").is_file());
        assert!(config.ct_series_dir().join("IM2").is_file());
        assert!(config.settings().models.scan.is_file());
        assert!(!fixture.subject_dir().exists());
    }
}

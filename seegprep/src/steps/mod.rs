//! Step descriptors.
//!
//! A step is a named unit of work with declared input and output paths.
//! Completion is keyed strictly on its declared outputs, never on its position
//! in the pipeline, so the runner does not need to know about ordering.

mod action;
mod catalog;

pub use action::{ActionStep, ArgValue, PathRef, StepAction};
pub use catalog::{
    preprocessing_steps, ALIAS_HEAD_IMAGE, APPLY_NONUNIFORMITY, CONVERT, DENOISE,
    ESTIMATE_NONUNIFORMITY, EXTRACT_BRAIN, NORMALIZE_INTENSITY, REGISTER_CT_TO_MR,
    REGISTER_MR_TO_MODEL, STEP_ORDER, WARP_TO_ORIENTED,
};

use crate::errors::ToolError;
use crate::tools::{ToolExecutor, ToolInvocation, ToolRun};
use async_trait::async_trait;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

/// Trait for pipeline steps.
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Returns the name of the step.
    fn name(&self) -> &str;

    /// Paths the step reads that earlier steps produce.
    ///
    /// Externally supplied inputs (DICOM series, models, parameter files)
    /// are not listed.
    fn declared_inputs(&self) -> &[PathBuf];

    /// Paths the step must leave behind.
    fn declared_outputs(&self) -> &[PathBuf];

    /// Executes the step.
    ///
    /// Outputs must be written where [`StepContext::resolve`] says, which
    /// may be a staging directory rather than the final path.
    async fn execute(&self, ctx: &StepContext<'_>) -> Result<(), ToolError>;
}

/// Everything a step needs while executing.
pub struct StepContext<'a> {
    step: &'a str,
    executor: &'a dyn ToolExecutor,
    outputs: &'a [PathBuf],
    staging_dir: Option<PathBuf>,
    scratch_dir: PathBuf,
}

impl<'a> StepContext<'a> {
    /// Creates a context that writes outputs to their final paths.
    #[must_use]
    pub fn new(
        step: &'a str,
        executor: &'a dyn ToolExecutor,
        outputs: &'a [PathBuf],
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            step,
            executor,
            outputs,
            staging_dir: None,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Redirects declared outputs into `dir`.
    #[must_use]
    pub fn with_staging(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Returns the name of the executing step.
    #[must_use]
    pub fn step_name(&self) -> &str {
        self.step
    }

    /// Returns the step's scratch directory.
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Returns the staging directory, when outputs are staged.
    #[must_use]
    pub fn staging_dir(&self) -> Option<&Path> {
        self.staging_dir.as_deref()
    }

    /// Maps a path to where this step actually reads or writes it.
    ///
    /// Declared outputs map into the staging directory when staging is on;
    /// every other path is returned unchanged.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match (&self.staging_dir, path.file_name()) {
            (Some(staging), Some(name)) if self.outputs.iter().any(|p| p == path) => {
                staging.join(name)
            }
            _ => path.to_path_buf(),
        }
    }

    /// Runs an invocation and checks the files it promised.
    ///
    /// # Errors
    ///
    /// Returns the executor's error, or [`ToolError::MissingOutput`] if the
    /// tool exited cleanly without creating an expected file.
    pub async fn run_tool(&self, invocation: &ToolInvocation) -> Result<ToolRun, ToolError> {
        let run = self.executor.run(invocation).await?;
        invocation.verify_outputs()?;
        Ok(run)
    }
}

impl Debug for StepContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("step", &self.step)
            .field("staging_dir", &self.staging_dir)
            .field("scratch_dir", &self.scratch_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::MockToolExecutor;

    #[test]
    fn test_resolve_maps_only_declared_outputs() {
        let executor = MockToolExecutor::new();
        let outputs = vec![PathBuf::from("/o/P01/P01_denoised.mnc")];
        let ctx = StepContext::new("denoise", &executor, &outputs, "/o/P01/.scratch/denoise")
            .with_staging("/o/P01/.staging/denoise");

        assert_eq!(
            ctx.resolve(Path::new("/o/P01/P01_denoised.mnc")),
            PathBuf::from("/o/P01/.staging/denoise/P01_denoised.mnc")
        );
        assert_eq!(
            ctx.resolve(Path::new("/o/P01/P01_full_head_image_t1w.mnc")),
            PathBuf::from("/o/P01/P01_full_head_image_t1w.mnc")
        );
    }

    #[test]
    fn test_resolve_without_staging_is_identity() {
        let executor = MockToolExecutor::new();
        let outputs = vec![PathBuf::from("/o/P01/a.mnc")];
        let ctx = StepContext::new("s", &executor, &outputs, "/tmp/s");
        assert_eq!(ctx.resolve(Path::new("/o/P01/a.mnc")), PathBuf::from("/o/P01/a.mnc"));
        assert!(ctx.staging_dir().is_none());
    }

    #[tokio::test]
    async fn test_run_tool_checks_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut executor = MockToolExecutor::new();
        executor.expect_run().times(1).returning(|_| Ok(ToolRun::default()));

        let outputs: Vec<PathBuf> = Vec::new();
        let ctx = StepContext::new("s", &executor, &outputs, dir.path());
        let invocation = ToolInvocation::new("mincnlm").expects(dir.path().join("never.mnc"));

        let err = ctx.run_tool(&invocation).await.unwrap_err();
        assert!(matches!(err, ToolError::MissingOutput { .. }));
    }
}

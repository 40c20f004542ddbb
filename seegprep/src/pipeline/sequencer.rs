//! The pipeline sequencer.

use super::report::{PipelineReport, StepReport};
use super::runner::IdempotentRunner;
use crate::config::PipelineConfig;
use crate::errors::{ConfigError, PipelineValidationError, PreprocessError};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::scene::{SceneDescription, SceneExporter, SceneRole};
use crate::steps::{preprocessing_steps, Step};
use crate::store::{ArtifactId, ArtifactStore};
use crate::tools::ToolExecutor;
use crate::utils::{generate_run_id, iso_timestamp, sha256_file};
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// The final scans, by scene role.
    pub scene: SceneDescription,
    /// What each step did.
    pub report: PipelineReport,
}

/// Runs the preprocessing chain for one subject.
pub struct Preprocessor {
    config: PipelineConfig,
    store: ArtifactStore,
    executor: Arc<dyn ToolExecutor>,
    events: Arc<dyn EventSink>,
    exporter: SceneExporter,
    steps: Vec<Box<dyn Step>>,
    report_path: Option<PathBuf>,
}

impl Preprocessor {
    /// Creates a preprocessor running the standard step chain.
    #[must_use]
    pub fn new(config: PipelineConfig, executor: Arc<dyn ToolExecutor>) -> Self {
        let store = config.store();
        let steps = preprocessing_steps(&config);
        Self {
            config,
            store,
            executor,
            events: Arc::new(NoOpEventSink),
            exporter: SceneExporter::default(),
            steps,
            report_path: None,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the step chain.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<Box<dyn Step>>) -> Self {
        self.steps = steps;
        self
    }

    /// Replaces the scene exporter.
    #[must_use]
    pub fn with_exporter(mut self, exporter: SceneExporter) -> Self {
        self.exporter = exporter;
        self
    }

    /// Writes the run report to `path` when the run ends, failed or not.
    #[must_use]
    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    /// Returns the artifact store.
    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Returns the step chain.
    #[must_use]
    pub fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }

    /// Checks that the step chain is well-founded.
    ///
    /// Step names and declared outputs must be unique, outputs must live in
    /// the subject directory, and every input inside the subject directory
    /// must be an output of an earlier step.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineValidationError`] describing the first violation.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        let mut names = HashSet::new();
        let mut producers: HashMap<&PathBuf, &str> = HashMap::new();

        for step in &self.steps {
            let name = step.name();
            if !names.insert(name) {
                return Err(PipelineValidationError::new(format!("Duplicate step name '{name}'"))
                    .with_steps(vec![name.to_string()]));
            }

            for input in step.declared_inputs() {
                if self.store.owns(input) && !producers.contains_key(input) {
                    return Err(PipelineValidationError::new(format!(
                        "Step '{name}' reads {} which no earlier step produces",
                        input.display()
                    ))
                    .with_steps(vec![name.to_string()]));
                }
            }

            for output in step.declared_outputs() {
                if !self.store.owns(output) {
                    return Err(PipelineValidationError::new(format!(
                        "Step '{name}' writes {} outside the subject directory",
                        output.display()
                    ))
                    .with_steps(vec![name.to_string()]));
                }
                if let Some(previous) = producers.insert(output, name) {
                    return Err(PipelineValidationError::new(format!(
                        "Steps '{previous}' and '{name}' both produce {}",
                        output.display()
                    ))
                    .with_steps(vec![previous.to_string(), name.to_string()]));
                }
            }
        }
        Ok(())
    }

    /// Describes the final scans for each scene role.
    #[must_use]
    pub fn scene_description(&self) -> SceneDescription {
        SceneDescription::new()
            .with_role(SceneRole::PostImplantCt, self.store.scan(ArtifactId::CtOriented))
            .with_role(SceneRole::PreImplantMrHead, self.store.scan(ArtifactId::MrOriented))
            .with_role(SceneRole::PreImplantMrBrain, self.store.scan(ArtifactId::BrainOriented))
    }

    /// Runs every step in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first step failure; artifacts already published stay in
    /// place for a resumed run.
    pub async fn run_pipeline(&self) -> Result<PipelineRun, PreprocessError> {
        self.execute(false).await
    }

    /// Runs every step, then writes `scene.xml` into the subject directory.
    ///
    /// # Errors
    ///
    /// Returns the first step failure or a scene export error.
    pub async fn run(&self) -> Result<PipelineRun, PreprocessError> {
        self.execute(true).await
    }

    async fn execute(&self, export_scene: bool) -> Result<PipelineRun, PreprocessError> {
        let mut report = PipelineReport::new(generate_run_id(), self.config.subject());
        info!(
            run_id = %report.run_id,
            subject = self.config.subject(),
            "Starting preprocessing"
        );
        self.events
            .emit(
                events::PIPELINE_STARTED,
                Some(json!({
                    "run_id": report.run_id.to_string(),
                    "subject": self.config.subject(),
                    "started_at": iso_timestamp(report.started_at),
                })),
            )
            .await;

        let outcome = self.execute_steps(&mut report, export_scene).await;
        report.finished_at = Some(Utc::now());

        match &outcome {
            Ok(_) => {
                info!(
                    executed = report.executed_steps().len(),
                    skipped = report.skipped_steps().len(),
                    "Preprocessing completed"
                );
                self.events
                    .emit(
                        events::PIPELINE_COMPLETED,
                        Some(json!({
                            "run_id": report.run_id.to_string(),
                            "executed": report.executed_steps(),
                            "skipped": report.skipped_steps(),
                        })),
                    )
                    .await;
            }
            Err(err) => {
                error!(step = err.step().unwrap_or("-"), error = %err, "Preprocessing failed");
                self.events
                    .emit(
                        events::PIPELINE_FAILED,
                        Some(json!({
                            "run_id": report.run_id.to_string(),
                            "step": err.step(),
                            "error": err.to_string(),
                        })),
                    )
                    .await;
            }
        }

        if let Some(path) = &self.report_path {
            match report.write_json(path) {
                Ok(()) => info!(path = %path.display(), "Report written"),
                Err(write_err) if outcome.is_ok() => return Err(write_err),
                Err(write_err) => {
                    warn!(path = %path.display(), error = %write_err, "Could not write report");
                }
            }
        }
        outcome.map(|scene| PipelineRun { scene, report })
    }

    async fn execute_steps(
        &self,
        report: &mut PipelineReport,
        export_scene: bool,
    ) -> Result<SceneDescription, PreprocessError> {
        if !self.config.output_dir().is_dir() {
            return Err(ConfigError::missing_directory(self.config.output_dir()).into());
        }
        self.validate()?;
        tokio::fs::create_dir_all(self.store.dir()).await?;

        let mut runner = IdempotentRunner::new(
            self.store.clone(),
            self.executor.clone(),
            self.events.clone(),
            self.config.settings().runner.clone(),
        );
        for step in &self.steps {
            let start = Instant::now();
            match runner.run(step.as_ref()).await {
                Ok(step_report) => report.steps.push(step_report),
                Err(err) => {
                    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                    report.steps.push(StepReport::failed(
                        step.name(),
                        step.declared_outputs().to_vec(),
                        duration_ms,
                        err.to_string(),
                    ));
                    return Err(err);
                }
            }
        }

        let scene = self.scene_description();
        for (role, scan) in scene.iter() {
            if scan.exists() {
                report
                    .digests
                    .insert(role.as_str().to_string(), sha256_file(&scan.path).await?);
            }
        }

        if export_scene {
            let scene_path = self.store.scene_path();
            self.exporter.export(&scene, &self.store.dir(), &scene_path)?;
            self.events
                .emit(
                    events::SCENE_EXPORTED,
                    Some(json!({ "path": scene_path.display().to_string() })),
                )
                .await;
            report.scene_path = Some(scene_path);
        }
        Ok(scene)
    }
}

impl std::fmt::Debug for Preprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preprocessor")
            .field("config", &self.config)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::ActionStep;
    use crate::tools::MockToolExecutor;

    fn preprocessor() -> Preprocessor {
        let config = PipelineConfig::new("/in", "MR001", "CT001", "P01", "/out").unwrap();
        Preprocessor::new(config, Arc::new(MockToolExecutor::new()))
    }

    #[test]
    fn test_standard_chain_is_valid() {
        preprocessor().validate().unwrap();
    }

    #[test]
    fn test_input_without_producer_is_rejected() {
        let p = preprocessor();
        let dir = p.store().dir();
        let p = p.with_steps(vec![Box::new(
            ActionStep::new("denoise")
                .input(dir.join("P01_missing.mnc"))
                .output(dir.join("P01_denoised.mnc")),
        )]);

        let err = p.validate().unwrap_err();
        assert_eq!(err.steps, vec!["denoise"]);
        assert!(err.message.contains("no earlier step produces"));
    }

    #[test]
    fn test_external_inputs_are_allowed() {
        let p = preprocessor();
        let dir = p.store().dir();
        let p = p.with_steps(vec![Box::new(
            ActionStep::new("convert")
                .input("/in/MR001")
                .output(dir.join("P01_pre_imp_mr_t1w.mnc")),
        )]);
        p.validate().unwrap();
    }

    #[test]
    fn test_colliding_outputs_are_rejected() {
        let p = preprocessor();
        let out = p.store().dir().join("P01_a.mnc");
        let p = p.with_steps(vec![
            Box::new(ActionStep::new("first").output(&out)),
            Box::new(ActionStep::new("second").output(&out)),
        ]);

        let err = p.validate().unwrap_err();
        assert_eq!(err.steps, vec!["first", "second"]);
    }

    #[test]
    fn test_outputs_outside_subject_dir_are_rejected() {
        let p = preprocessor().with_steps(vec![Box::new(ActionStep::new("stray").output("/tmp/x.mnc"))]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_scene_description_uses_final_scans() {
        let p = preprocessor();
        let scene = p.scene_description();
        assert_eq!(
            scene.get(SceneRole::PreImplantMrBrain).unwrap().path,
            p.store().path(ArtifactId::BrainOriented)
        );
        assert_eq!(
            scene.get(SceneRole::PostImplantCt).unwrap().name,
            "P01_full_head_image_oriented_space_ct"
        );
    }

    #[tokio::test]
    async fn test_missing_output_dir_fails_before_any_step() {
        let root = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(
            root.path(),
            "MR001",
            "CT001",
            "P01",
            root.path().join("absent"),
        )
        .unwrap();
        let mut executor = MockToolExecutor::new();
        executor.expect_run().times(0);

        let err = Preprocessor::new(config, Arc::new(executor))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, PreprocessError::Config(ConfigError::MissingDirectory { .. })));
        assert!(!root.path().join("absent").exists());
    }
}

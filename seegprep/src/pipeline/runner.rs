//! The idempotent step runner.
//!
//! A step whose declared outputs all exist is skipped. Otherwise it is
//! executed and its outputs are checked afterwards. With atomic publish on,
//! tools write into a per-step staging directory and outputs are renamed into
//! place only once every one of them exists, so a crash mid-step never leaves
//! a file that satisfies the existence check.

use crate::config::RunnerConfig;
use crate::errors::{
    ExternalToolFailure, PreprocessError, StepIncompleteError, StepTimeoutError,
};
use crate::events::{self, EventSink};
use crate::steps::{Step, StepContext};
use crate::store::ArtifactStore;
use crate::tools::ToolExecutor;
use serde_json::json;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{debug, info, warn};

use super::report::StepReport;

/// Why a step has to run.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Fresh,
    Missing(PathBuf),
    InputRebuilt(PathBuf),
    InputNewer(PathBuf),
}

impl Verdict {
    fn reason(&self) -> String {
        match self {
            Self::Fresh => "outputs present".to_string(),
            Self::Missing(path) => format!("missing {}", path.display()),
            Self::InputRebuilt(path) => format!("input {} was rebuilt", path.display()),
            Self::InputNewer(path) => format!("input {} is newer than outputs", path.display()),
        }
    }
}

/// Runs steps, skipping those whose outputs are already present.
pub struct IdempotentRunner {
    store: ArtifactStore,
    executor: Arc<dyn ToolExecutor>,
    events: Arc<dyn EventSink>,
    config: RunnerConfig,
    refreshed: HashSet<PathBuf>,
}

impl IdempotentRunner {
    /// Creates a runner for one subject.
    #[must_use]
    pub fn new(
        store: ArtifactStore,
        executor: Arc<dyn ToolExecutor>,
        events: Arc<dyn EventSink>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            executor,
            events,
            config,
            refreshed: HashSet::new(),
        }
    }

    /// Paths produced by steps this runner executed.
    #[must_use]
    pub fn refreshed(&self) -> &HashSet<PathBuf> {
        &self.refreshed
    }

    /// Runs one step.
    ///
    /// # Errors
    ///
    /// Returns [`ExternalToolFailure`] if a tool fails,
    /// [`StepIncompleteError`] if declared outputs are absent afterwards and
    /// [`StepTimeoutError`] if the step exceeds the configured timeout.
    pub async fn run(&mut self, step: &dyn Step) -> Result<StepReport, PreprocessError> {
        let name = step.name();
        let outputs = step.declared_outputs();

        let verdict = self.verdict(step);
        if verdict == Verdict::Fresh {
            info!(step = name, "Skipping step, outputs present");
            self.events
                .emit(events::STEP_SKIPPED, Some(json!({ "step": name })))
                .await;
            return Ok(StepReport::skipped(name, outputs.to_vec()));
        }

        let reason = verdict.reason();
        if matches!(verdict, Verdict::InputRebuilt(_) | Verdict::InputNewer(_)) {
            warn!(step = name, reason = %reason, "Rebuilding stale outputs");
        }
        info!(step = name, reason = %reason, "Running step");
        self.events
            .emit(events::STEP_STARTED, Some(json!({ "step": name, "reason": &reason })))
            .await;

        let start = Instant::now();
        let result = self.execute(step).await;
        self.cleanup(name).await;

        match result {
            Ok(()) => {
                let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                self.refreshed.extend(outputs.iter().cloned());
                info!(step = name, duration_ms, "Step completed");
                self.events
                    .emit(
                        events::STEP_COMPLETED,
                        Some(json!({ "step": name, "duration_ms": duration_ms })),
                    )
                    .await;
                Ok(StepReport::completed(name, outputs.to_vec(), duration_ms).with_reason(reason))
            }
            Err(err) => {
                warn!(step = name, error = %err, "Step failed");
                self.events
                    .emit(
                        events::STEP_FAILED,
                        Some(json!({ "step": name, "error": err.to_string() })),
                    )
                    .await;
                Err(err)
            }
        }
    }

    fn verdict(&self, step: &dyn Step) -> Verdict {
        let outputs = step.declared_outputs();
        if let Some(missing) = outputs.iter().find(|p| !p.exists()) {
            return Verdict::Missing(missing.clone());
        }
        if !self.config.rebuild_stale {
            return Verdict::Fresh;
        }

        let inputs = step.declared_inputs();
        if let Some(rebuilt) = inputs.iter().find(|p| self.refreshed.contains(*p)) {
            return Verdict::InputRebuilt(rebuilt.clone());
        }

        let Some(oldest_output) = outputs.iter().filter_map(|p| modified(p)).min() else {
            return Verdict::Fresh;
        };
        inputs
            .iter()
            .find(|p| modified(p).is_some_and(|t| t > oldest_output))
            .map_or(Verdict::Fresh, |p| Verdict::InputNewer(p.clone()))
    }

    async fn execute(&self, step: &dyn Step) -> Result<(), PreprocessError> {
        let name = step.name();
        let outputs = step.declared_outputs();
        let io_failure = |e: std::io::Error| -> PreprocessError {
            ExternalToolFailure::new(name, crate::errors::ToolError::io(name, &e))
                .with_expected_outputs(outputs.to_vec())
                .into()
        };

        let scratch = self.store.scratch_dir(name);
        let mut ctx = StepContext::new(name, self.executor.as_ref(), outputs, &scratch);

        if self.config.atomic_publish {
            let staging = self.store.staging_dir(name);
            remove_dir(&staging).await.map_err(io_failure)?;
            tokio::fs::create_dir_all(&staging).await.map_err(io_failure)?;
            ctx = ctx.with_staging(staging);
        } else {
            for output in outputs {
                remove_file(output).await.map_err(io_failure)?;
            }
        }

        let executed = match self.config.step_timeout() {
            Some(limit) => tokio::time::timeout(limit, step.execute(&ctx))
                .await
                .map_err(|_| StepTimeoutError {
                    step: name.to_string(),
                    timeout_seconds: limit.as_secs_f64(),
                })?,
            None => step.execute(&ctx).await,
        };
        executed.map_err(|source| {
            ExternalToolFailure::new(name, source).with_expected_outputs(outputs.to_vec())
        })?;

        let missing: Vec<PathBuf> = outputs
            .iter()
            .filter(|p| !ctx.resolve(p).exists())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(StepIncompleteError::new(name, missing).into());
        }

        if ctx.staging_dir().is_some() {
            for output in outputs {
                let staged = ctx.resolve(output);
                debug!(step = name, path = %output.display(), "Publishing output");
                tokio::fs::rename(&staged, output).await.map_err(io_failure)?;
            }
        }
        Ok(())
    }

    async fn cleanup(&self, step: &str) {
        for dir in [self.store.staging_dir(step), self.store.scratch_dir(step)] {
            if let Err(e) = remove_dir(&dir).await {
                warn!(step, dir = %dir.display(), error = %e, "Failed to remove work directory");
            }
            if let Some(parent) = dir.parent() {
                // Only succeeds once the last step's directory is gone.
                let _ = tokio::fs::remove_dir(parent).await;
            }
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

async fn remove_dir(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn remove_file(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepStatus;
    use crate::errors::ToolError;
    use crate::events::{CollectingEventSink, NoOpEventSink};
    use crate::steps::{ActionStep, ArgValue, StepAction};
    use crate::tools::{MockToolExecutor, ToolRun, ToolSpec};
    use async_trait::async_trait;
    use std::time::Duration;

    fn write_expected_outputs(executor: &mut MockToolExecutor) {
        executor.expect_run().returning(|inv| {
            for path in &inv.expected_outputs {
                std::fs::write(path, inv.program.as_bytes()).unwrap();
            }
            Ok(ToolRun::default())
        });
    }

    fn denoise_step(store: &ArtifactStore, input: &Path) -> ActionStep {
        let output = store.dir().join("P01_denoised.mnc");
        ActionStep::new("denoise").input(input).output(&output).action(
            StepAction::tool(&ToolSpec::new("mincnlm", ["{input}", "{output}"]))
                .bind("input", ArgValue::path(input))
                .bind("output", ArgValue::path(&output))
                .writes(&output),
        )
    }

    fn setup() -> (tempfile::TempDir, ArtifactStore, PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(root.path(), "P01");
        std::fs::create_dir_all(store.dir()).unwrap();
        let input = store.dir().join("P01_head.mnc");
        std::fs::write(&input, b"head").unwrap();
        (root, store, input)
    }

    #[tokio::test]
    async fn test_runs_then_skips() {
        let (_root, store, input) = setup();
        let mut executor = MockToolExecutor::new();
        write_expected_outputs(&mut executor);
        let sink = Arc::new(CollectingEventSink::new());
        let step = denoise_step(&store, &input);

        let mut runner = IdempotentRunner::new(
            store.clone(),
            Arc::new(executor),
            sink.clone(),
            RunnerConfig::default(),
        );
        let first = runner.run(&step).await.unwrap();
        assert_eq!(first.status, StepStatus::Completed);
        assert!(step.declared_outputs()[0].exists());
        assert!(!store.staging_dir("denoise").exists());
        assert!(!store.dir().join(".staging").exists());

        let mut never = MockToolExecutor::new();
        never.expect_run().times(0);
        let mut rerun = IdempotentRunner::new(
            store.clone(),
            Arc::new(never),
            sink.clone(),
            RunnerConfig::default(),
        );
        let second = rerun.run(&step).await.unwrap();
        assert_eq!(second.status, StepStatus::Skipped);

        assert_eq!(
            sink.event_types(),
            vec!["step.started", "step.completed", "step.skipped"]
        );
    }

    #[tokio::test]
    async fn test_missing_output_is_step_incomplete() {
        let (_root, store, input) = setup();
        let output = store.dir().join("P01_denoised.mnc");
        let other = store.dir().join("P01_other.mnc");
        let step = ActionStep::new("denoise")
            .input(&input)
            .output(&output)
            .output(&other)
            .action(
                StepAction::tool(&ToolSpec::new("mincnlm", ["{input}", "{output}"]))
                    .bind("input", ArgValue::path(&input))
                    .bind("output", ArgValue::path(&output))
                    .writes(&output),
            );

        let mut executor = MockToolExecutor::new();
        write_expected_outputs(&mut executor);
        let mut runner = IdempotentRunner::new(
            store.clone(),
            Arc::new(executor),
            Arc::new(NoOpEventSink),
            RunnerConfig::default(),
        );

        match runner.run(&step).await {
            Err(PreprocessError::StepIncomplete(err)) => {
                assert_eq!(err.step, "denoise");
                assert_eq!(err.missing, vec![other]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // Nothing was published.
        assert!(!output.exists());
        assert!(runner.refreshed().is_empty());
    }

    #[tokio::test]
    async fn test_tool_failure_names_step_and_outputs() {
        let (_root, store, input) = setup();
        let step = denoise_step(&store, &input);
        let mut executor = MockToolExecutor::new();
        executor.expect_run().times(1).returning(|_| {
            Err(ToolError::ExitStatus {
                command: "mincnlm".to_string(),
                code: Some(1),
                stderr: "boom".to_string(),
            })
        });

        let mut runner = IdempotentRunner::new(
            store.clone(),
            Arc::new(executor),
            Arc::new(NoOpEventSink),
            RunnerConfig::default(),
        );
        let err = runner.run(&step).await.unwrap_err();

        assert_eq!(err.step(), Some("denoise"));
        match err {
            PreprocessError::ExternalTool(failure) => {
                assert_eq!(failure.expected_outputs, step.declared_outputs().to_vec());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rebuilt_input_makes_step_stale() {
        let (_root, store, input) = setup();
        let step = denoise_step(&store, &input);
        std::fs::write(&step.declared_outputs()[0], b"old").unwrap();

        let mut executor = MockToolExecutor::new();
        write_expected_outputs(&mut executor);
        let mut runner = IdempotentRunner::new(
            store.clone(),
            Arc::new(executor),
            Arc::new(NoOpEventSink),
            RunnerConfig::default(),
        );
        runner.refreshed.insert(input.clone());

        let report = runner.run(&step).await.unwrap();
        assert_eq!(report.status, StepStatus::Completed);
        assert!(report.reason.unwrap().contains("was rebuilt"));
        assert_eq!(std::fs::read(&step.declared_outputs()[0]).unwrap(), b"mincnlm");
    }

    #[tokio::test]
    async fn test_pure_existence_check_when_staleness_disabled() {
        let (_root, store, input) = setup();
        let step = denoise_step(&store, &input);
        std::fs::write(&step.declared_outputs()[0], b"old").unwrap();

        let mut executor = MockToolExecutor::new();
        executor.expect_run().times(0);
        let config = RunnerConfig {
            rebuild_stale: false,
            ..RunnerConfig::default()
        };
        let mut runner =
            IdempotentRunner::new(store, Arc::new(executor), Arc::new(NoOpEventSink), config);
        runner.refreshed.insert(input);

        let report = runner.run(&step).await.unwrap();
        assert_eq!(report.status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_direct_writes_without_atomic_publish() {
        let (_root, store, input) = setup();
        let step = denoise_step(&store, &input);
        let output = step.declared_outputs()[0].clone();

        let mut executor = MockToolExecutor::new();
        let expected = output.clone();
        executor
            .expect_run()
            .withf(move |inv| inv.expected_outputs == vec![expected.clone()])
            .returning(|inv| {
                for path in &inv.expected_outputs {
                    std::fs::write(path, b"direct").unwrap();
                }
                Ok(ToolRun::default())
            });
        let config = RunnerConfig {
            atomic_publish: false,
            ..RunnerConfig::default()
        };
        let mut runner =
            IdempotentRunner::new(store, Arc::new(executor), Arc::new(NoOpEventSink), config);

        runner.run(&step).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"direct");
    }

    #[derive(Debug)]
    struct SlowStep {
        outputs: Vec<PathBuf>,
    }

    #[async_trait]
    impl Step for SlowStep {
        fn name(&self) -> &str {
            "slow"
        }

        fn declared_inputs(&self) -> &[PathBuf] {
            &[]
        }

        fn declared_outputs(&self) -> &[PathBuf] {
            &self.outputs
        }

        async fn execute(&self, _ctx: &StepContext<'_>) -> Result<(), ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_timed_out_step_is_failed() {
        let (_root, store, _input) = setup();
        let step = SlowStep {
            outputs: vec![store.dir().join("P01_slow.mnc")],
        };
        let config = RunnerConfig {
            step_timeout_seconds: Some(0.05),
            ..RunnerConfig::default()
        };
        let sink = Arc::new(CollectingEventSink::new());
        let mut runner =
            IdempotentRunner::new(store, Arc::new(MockToolExecutor::new()), sink.clone(), config);

        let err = runner.run(&step).await.unwrap_err();
        assert!(matches!(err, PreprocessError::StepTimeout(_)));
        assert_eq!(err.step(), Some("slow"));
        assert_eq!(sink.steps_with("step.failed"), vec!["slow"]);
        assert!(!step.outputs[0].exists());
    }
}

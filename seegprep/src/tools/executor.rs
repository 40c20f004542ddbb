//! Running external tools.

use super::invocation::ToolInvocation;
use crate::errors::ToolError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::debug;

/// Number of trailing stderr bytes kept in error reports.
const STDERR_TAIL_BYTES: usize = 2048;

/// What a finished tool run reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolRun {
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// Wall-clock time spent.
    pub duration: Duration,
    /// Tail of the process's standard error.
    pub stderr_tail: String,
}

/// Runs typed invocations.
///
/// Implementations must not interpret arguments through a shell.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Runs one invocation to completion.
    ///
    /// A non-zero exit is an error. Checking `expected_outputs` is left to
    /// the caller.
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolRun, ToolError>;
}

/// Executes invocations as child processes.
///
/// Children are killed when the returned future is dropped, so a step
/// timeout in the runner also stops the tool it was waiting on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    /// Creates a process executor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolExecutor for ProcessExecutor {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolRun, ToolError> {
        debug!(command = %invocation.command_line(), "Running external tool");
        let start = Instant::now();

        let output = tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::spawn(&invocation.program, e.to_string()))?;

        if let Some(ref path) = invocation.stdout_path {
            tokio::fs::write(path, &output.stdout)
                .await
                .map_err(|e| ToolError::io(&invocation.program, &e))?;
        }

        let stderr_tail = tail(&output.stderr, STDERR_TAIL_BYTES);
        let run = ToolRun {
            exit_code: output.status.code(),
            duration: start.elapsed(),
            stderr_tail,
        };

        if output.status.success() {
            debug!(
                program = %invocation.program,
                duration_ms = u64::try_from(run.duration.as_millis()).unwrap_or(u64::MAX),
                "External tool finished"
            );
            Ok(run)
        } else {
            Err(ToolError::ExitStatus {
                command: invocation.command_line(),
                code: run.exit_code,
                stderr: run.stderr_tail,
            })
        }
    }
}

fn tail(bytes: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    let mut start = text.len().saturating_sub(max);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_last_bytes() {
        assert_eq!(tail(b"hello world\n", 5), "world");
        assert_eq!(tail(b"short", 100), "short");
        assert_eq!(tail(b"error: bad header\n\n\n", 10), "bad header");
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("volume \u{e9}t\u{e9}".as_bytes(), 4), "t\u{e9}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_executor_success_and_stdout_capture() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("out.log");
        let invocation = ToolInvocation::new("echo")
            .args(["registration", "done"])
            .with_stdout_to(&log);

        let run = ProcessExecutor::new().run(&invocation).await.unwrap();

        assert_eq!(run.exit_code, Some(0));
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "registration done\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_executor_reports_exit_status() {
        let invocation = ToolInvocation::new("false");
        let err = ProcessExecutor::new().run(&invocation).await.unwrap_err();
        assert!(matches!(err, ToolError::ExitStatus { code: Some(1), .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_run_does_not_wait_for_child() {
        let invocation = ToolInvocation::new("sleep").args(["30"]);
        let executor = ProcessExecutor::new();
        let start = Instant::now();

        let result = tokio::time::timeout(Duration::from_millis(100), executor.run(&invocation)).await;

        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_process_executor_reports_missing_program() {
        let invocation = ToolInvocation::new("seegprep-definitely-not-installed");
        let err = ProcessExecutor::new().run(&invocation).await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}

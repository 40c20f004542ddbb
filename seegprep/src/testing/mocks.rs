//! Scripted tool executors.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;

use crate::errors::ToolError;
use crate::tools::{ToolExecutor, ToolInvocation, ToolRun};

/// An executor that records invocations and fakes their outputs.
///
/// Each invocation creates its expected outputs (and its captured stdout
/// file) with content derived from the program name and file name only, so
/// repeated runs produce identical files.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    invocations: Mutex<Vec<ToolInvocation>>,
    failing: Mutex<HashSet<String>>,
    silent: Mutex<HashSet<String>>,
}

impl ScriptedExecutor {
    /// Creates an executor where every program succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `program` exit with status 1.
    pub fn fail_program(&self, program: impl Into<String>) {
        self.failing.lock().insert(program.into());
    }

    /// Makes `program` exit cleanly without writing anything.
    pub fn skip_outputs_for(&self, program: impl Into<String>) {
        self.silent.lock().insert(program.into());
    }

    /// Returns every recorded invocation.
    #[must_use]
    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().clone()
    }

    /// Returns the number of recorded invocations.
    #[must_use]
    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().len()
    }

    /// Returns the invoked programs, in order.
    #[must_use]
    pub fn programs(&self) -> Vec<String> {
        self.invocations.lock().iter().map(|i| i.program.clone()).collect()
    }

    /// Clears recorded invocations and scripted behaviour.
    pub fn reset(&self) {
        self.invocations.lock().clear();
        self.failing.lock().clear();
        self.silent.lock().clear();
    }
}

fn write_fake(program: &str, path: &Path) -> Result<(), ToolError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ToolError::io(program, &e))?;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    std::fs::write(path, format!("{program}:{name}\n")).map_err(|e| ToolError::io(program, &e))
}

#[async_trait]
impl ToolExecutor for ScriptedExecutor {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolRun, ToolError> {
        self.invocations.lock().push(invocation.clone());
        let program = invocation.program.as_str();

        if self.failing.lock().contains(program) {
            return Err(ToolError::ExitStatus {
                command: invocation.command_line(),
                code: Some(1),
                stderr: "scripted failure".to_string(),
            });
        }

        if !self.silent.lock().contains(program) {
            for path in &invocation.expected_outputs {
                write_fake(program, path)?;
            }
            if let Some(ref path) = invocation.stdout_path {
                write_fake(program, path)?;
            }
        }

        Ok(ToolRun {
            exit_code: Some(0),
            ..ToolRun::default()
        })
    }
}

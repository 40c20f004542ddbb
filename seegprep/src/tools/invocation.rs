//! Typed external-command invocations.

use super::spec::{Bindings, ToolSpec};
use crate::errors::ToolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// One fully rendered external command.
///
/// Besides the program and its arguments, an invocation records which files
/// it must leave behind, so success can be checked without knowing anything
/// about the tool itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Executable name or path.
    pub program: String,
    /// Ordered argument list.
    pub args: Vec<String>,
    /// Files the command must create.
    #[serde(default)]
    pub expected_outputs: Vec<PathBuf>,
    /// File receiving the command's standard output, if captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_path: Option<PathBuf>,
}

impl ToolInvocation {
    /// Creates an invocation with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            expected_outputs: Vec::new(),
            stdout_path: None,
        }
    }

    /// Renders a [`ToolSpec`] into an invocation.
    ///
    /// # Errors
    ///
    /// Fails if the argument template cannot be rendered.
    pub fn from_spec(spec: &ToolSpec, bindings: &Bindings) -> Result<Self, ToolError> {
        Ok(Self {
            program: spec.program.clone(),
            args: spec.render(bindings)?,
            expected_outputs: Vec::new(),
            stdout_path: None,
        })
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Declares a file the command must create.
    #[must_use]
    pub fn expects(mut self, path: impl Into<PathBuf>) -> Self {
        self.expected_outputs.push(path.into());
        self
    }

    /// Captures standard output into `path`.
    #[must_use]
    pub fn with_stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_path = Some(path.into());
        self
    }

    /// Returns the command line for diagnostics.
    ///
    /// Arguments containing whitespace or quotes are single-quoted. The
    /// string is for display only; it is never handed to a shell.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote_for_display)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Returns the first expected output that does not exist.
    #[must_use]
    pub fn first_missing_output(&self) -> Option<&Path> {
        self.expected_outputs
            .iter()
            .map(PathBuf::as_path)
            .find(|path| !path.exists())
    }

    /// Checks that every expected output exists.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::MissingOutput`] naming the first absent file.
    pub fn verify_outputs(&self) -> Result<(), ToolError> {
        match self.first_missing_output() {
            Some(path) => Err(ToolError::MissingOutput {
                command: self.command_line(),
                path: path.to_path_buf(),
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

fn quote_for_display(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    if arg.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        format!("'{}'", arg.replace('\'', r"'\''"))
    } else {
        arg.to_string()
    }
}

//! Error types for the preprocessing pipeline.
//!
//! Failures are never recovered locally: the pipeline aborts at the first
//! failing step and every artifact already published stays in place for a
//! resumed run. Each error carries enough context (step name, command line,
//! expected paths) to be reported to the operator as-is.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// The pipeline configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// An external tool failed while a step was executing.
    #[error("{0}")]
    ExternalTool(#[from] ExternalToolFailure),

    /// A step finished but some declared outputs are absent.
    #[error("{0}")]
    StepIncomplete(#[from] StepIncompleteError),

    /// A step exceeded its time limit.
    #[error("{0}")]
    StepTimeout(#[from] StepTimeoutError),

    /// The step chain is not well-founded.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A scene role was not supplied to the exporter.
    #[error("{0}")]
    MissingRole(#[from] MissingRoleError),

    /// The scene template and the supplied slot values disagree.
    #[error("{0}")]
    TemplateSubstitution(#[from] TemplateSubstitutionError),

    /// Tera rejected the scene template.
    #[error("Scene template rendering error: {0}")]
    SceneTemplate(#[from] tera::Error),

    /// A path could not be prepared outside any step.
    #[error("{0}")]
    Tool(#[from] ToolError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PreprocessError {
    /// Returns the name of the step that failed, when the error is tied to one.
    #[must_use]
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::ExternalTool(err) => Some(&err.step),
            Self::StepIncomplete(err) => Some(&err.step),
            Self::StepTimeout(err) => Some(&err.step),
            _ => None,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        let kind = match self {
            Self::Config(_) => "ConfigError",
            Self::ExternalTool(_) => "ExternalToolFailure",
            Self::StepIncomplete(_) => "StepIncompleteError",
            Self::StepTimeout(_) => "StepTimeoutError",
            Self::Validation(_) => "PipelineValidationError",
            Self::MissingRole(_) => "MissingRoleError",
            Self::TemplateSubstitution(_) => "TemplateSubstitutionError",
            Self::SceneTemplate(_) => "SceneTemplateError",
            Self::Tool(_) => "ToolError",
            Self::Serialization(_) => "SerializationError",
            Self::Io(_) => "IoError",
        };
        map.insert("type".to_string(), serde_json::json!(kind));
        if let Some(step) = self.step() {
            map.insert("step".to_string(), serde_json::json!(step));
        }
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

impl From<serde_json::Error> for PreprocessError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised while building a [`PipelineConfig`](crate::config::PipelineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The subject identifier is empty or whitespace-only.
    #[error("Subject id cannot be empty or whitespace-only")]
    EmptySubject,

    /// The subject identifier contains characters unsafe for file names.
    #[error("Subject id '{subject}' may only contain letters, digits, '_', '-' and '.'")]
    InvalidSubject {
        /// The offending subject id.
        subject: String,
    },

    /// A directory that must already exist is missing.
    #[error("Directory does not exist: {}", .path.display())]
    MissingDirectory {
        /// The missing directory.
        path: PathBuf,
    },

    /// A settings file could not be read.
    #[error("Failed to read settings from {}: {source}", .path.display())]
    Read {
        /// The settings file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A settings file could not be parsed.
    #[error("Failed to parse settings from {}: {reason}", .path.display())]
    Parse {
        /// The settings file.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },
}

impl ConfigError {
    /// Creates a missing directory error.
    #[must_use]
    pub fn missing_directory(path: impl Into<PathBuf>) -> Self {
        Self::MissingDirectory { path: path.into() }
    }
}

/// Errors related to a single external tool invocation.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The process could not be started.
    #[error("Failed to start `{program}`: {reason}")]
    Spawn {
        /// The program name.
        program: String,
        /// The reason reported by the OS.
        reason: String,
    },

    /// The process exited unsuccessfully.
    #[error("`{command}` exited with {}: {stderr}", describe_exit(.code))]
    ExitStatus {
        /// The full command line.
        command: String,
        /// The exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// The tail of the process's standard error.
        stderr: String,
    },

    /// The process succeeded but did not create an expected file.
    #[error("`{command}` did not produce {}", .path.display())]
    MissingOutput {
        /// The full command line.
        command: String,
        /// The missing output.
        path: PathBuf,
    },

    /// An argument template references a placeholder with no binding.
    #[error("Argument template for `{program}` references unbound placeholder '{{{placeholder}}}'")]
    UnboundPlaceholder {
        /// The program name.
        program: String,
        /// The placeholder name.
        placeholder: String,
    },

    /// A list placeholder was used inside a larger argument.
    #[error("Placeholder '{{{placeholder}}}' for `{program}` expands to several arguments and must stand alone")]
    ListInsideArgument {
        /// The program name.
        program: String,
        /// The placeholder name.
        placeholder: String,
    },

    /// A path cannot be passed as a UTF-8 argument.
    #[error("Path is not valid UTF-8: {}", .path.display())]
    NonUtf8Path {
        /// The offending path.
        path: PathBuf,
    },

    /// A DICOM series directory holds no matching files.
    #[error("No files matching '{pattern}' in {}", .dir.display())]
    EmptySeries {
        /// The series directory.
        dir: PathBuf,
        /// The file name pattern.
        pattern: String,
    },

    /// Filesystem work around the tool failed.
    #[error("IO error around `{program}`: {reason}")]
    Io {
        /// The program (or internal action) involved.
        program: String,
        /// The IO error message.
        reason: String,
    },
}

impl ToolError {
    /// Creates a spawn error.
    #[must_use]
    pub fn spawn(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Spawn {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Creates an IO error for the given program or action.
    #[must_use]
    pub fn io(program: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            program: program.into(),
            reason: err.to_string(),
        }
    }

    /// Creates a non-UTF-8 path error.
    #[must_use]
    pub fn non_utf8(path: &Path) -> Self {
        Self::NonUtf8Path {
            path: path.to_path_buf(),
        }
    }
}

/// An external tool failed while executing a step.
#[derive(Debug, Clone, Error)]
#[error("Step '{step}' failed: {source}")]
pub struct ExternalToolFailure {
    /// The step name.
    pub step: String,
    /// Outputs the step was expected to produce.
    pub expected_outputs: Vec<PathBuf>,
    /// The underlying tool error.
    #[source]
    pub source: ToolError,
}

impl ExternalToolFailure {
    /// Creates a new external tool failure.
    #[must_use]
    pub fn new(step: impl Into<String>, source: ToolError) -> Self {
        Self {
            step: step.into(),
            expected_outputs: Vec::new(),
            source,
        }
    }

    /// Sets the outputs the step was expected to produce.
    #[must_use]
    pub fn with_expected_outputs(mut self, outputs: Vec<PathBuf>) -> Self {
        self.expected_outputs = outputs;
        self
    }
}

/// Declared outputs were absent after a step executed.
#[derive(Debug, Clone, Error)]
#[error("Step '{step}' finished without producing: {}", display_paths(.missing))]
pub struct StepIncompleteError {
    /// The step name.
    pub step: String,
    /// The declared outputs that do not exist.
    pub missing: Vec<PathBuf>,
}

impl StepIncompleteError {
    /// Creates a new step incomplete error.
    #[must_use]
    pub fn new(step: impl Into<String>, missing: Vec<PathBuf>) -> Self {
        Self {
            step: step.into(),
            missing,
        }
    }
}

/// A step exceeded the configured time limit.
#[derive(Debug, Clone, Error)]
#[error("Step '{step}' timed out after {timeout_seconds}s")]
pub struct StepTimeoutError {
    /// The step name.
    pub step: String,
    /// The timeout in seconds.
    pub timeout_seconds: f64,
}

/// Error raised when the step chain is not well-founded.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The steps involved in the error.
    pub steps: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            steps: Vec::new(),
        }
    }

    /// Sets the steps involved.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = steps;
        self
    }
}

/// A required scene role was not supplied.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Scene role '{role}' has no scan")]
pub struct MissingRoleError {
    /// The missing role.
    pub role: String,
}

impl MissingRoleError {
    /// Creates a new missing role error.
    #[must_use]
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }
}

/// The scene template's slots and the supplied values disagree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateSubstitutionError {
    /// The template names a slot for which no value was supplied.
    #[error("Scene template slot '{{{{ {slot} }}}}' has no value")]
    Unbound {
        /// The slot name.
        slot: String,
    },

    /// A value was supplied for a slot the template does not contain.
    #[error("Value supplied for slot '{slot}' which the scene template does not contain")]
    Unused {
        /// The slot name.
        slot: String,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"))
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_incomplete_lists_missing_paths() {
        let err = StepIncompleteError::new(
            "denoise",
            vec![PathBuf::from("/out/P01/a.mnc"), PathBuf::from("/out/P01/b.mnc")],
        );

        let message = err.to_string();
        assert!(message.contains("denoise"));
        assert!(message.contains("/out/P01/a.mnc, /out/P01/b.mnc"));
    }

    #[test]
    fn test_exit_status_message() {
        let err = ToolError::ExitStatus {
            command: "mincnlm in.mnc out.mnc".to_string(),
            code: Some(2),
            stderr: "bad input".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "`mincnlm in.mnc out.mnc` exited with status 2: bad input"
        );

        let killed = ToolError::ExitStatus {
            command: "mincnlm".to_string(),
            code: None,
            stderr: String::new(),
        };
        assert!(killed.to_string().contains("a signal"));
    }

    #[test]
    fn test_preprocess_error_names_failing_step() {
        let err: PreprocessError = ExternalToolFailure::new(
            "estimate_nonuniformity",
            ToolError::spawn("nu_estimate", "No such file or directory"),
        )
        .into();

        assert_eq!(err.step(), Some("estimate_nonuniformity"));
        let dict = err.to_dict();
        assert_eq!(dict.get("type").unwrap(), "ExternalToolFailure");
        assert_eq!(dict.get("step").unwrap(), "estimate_nonuniformity");
    }

    #[test]
    fn test_template_substitution_messages() {
        let unbound = TemplateSubstitutionError::Unbound {
            slot: "brain_image_path".to_string(),
        };
        assert_eq!(
            unbound.to_string(),
            "Scene template slot '{{ brain_image_path }}' has no value"
        );
    }

    #[test]
    fn test_unbound_placeholder_message() {
        let err = ToolError::UnboundPlaceholder {
            program: "mincresample".to_string(),
            placeholder: "transform".to_string(),
        };
        assert!(err.to_string().contains("'{transform}'"));
    }

    #[test]
    fn test_missing_role_is_not_tied_to_step() {
        let err: PreprocessError = MissingRoleError::new("post_implant_ct").into();
        assert!(err.step().is_none());
        assert!(err.to_string().contains("post_implant_ct"));
    }
}

//! Declarative steps built from a list of actions.

use super::{Step, StepContext};
use crate::config::DICOM_FILE_PREFIX;
use crate::errors::ToolError;
use crate::tools::{path_arg, Binding, Bindings, ToolInvocation, ToolSpec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A value bound to a tool argument placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    /// A path, redirected to staging when it is one of the step's outputs.
    Path(PathBuf),
    /// Literal text.
    Text(String),
    /// Zero or more whole arguments.
    List(Vec<String>),
    /// Every `IM*` file of a DICOM series directory, sorted by name.
    DicomSeries(PathBuf),
    /// The directory a (possibly staged) path is written into.
    DirOf(PathBuf),
    /// The file stem of a path.
    StemOf(PathBuf),
    /// The step's scratch directory, created on demand.
    Scratch,
}

impl ArgValue {
    /// Creates a path value.
    #[must_use]
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// Creates a text value.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Expands to `[flag]` when `enabled`, to nothing otherwise.
    #[must_use]
    pub fn flag(flag: &str, enabled: bool) -> Self {
        Self::List(if enabled { vec![flag.to_string()] } else { Vec::new() })
    }

    async fn bind(&self, ctx: &StepContext<'_>) -> Result<Binding, ToolError> {
        Ok(match self {
            Self::Path(path) => Binding::Value(path_arg(&ctx.resolve(path))?),
            Self::Text(text) => Binding::Value(text.clone()),
            Self::List(items) => Binding::List(items.clone()),
            Self::DicomSeries(dir) => Binding::List(dicom_files(dir).await?),
            Self::DirOf(path) => {
                let resolved = ctx.resolve(path);
                let dir = resolved.parent().unwrap_or_else(|| Path::new("."));
                Binding::Value(path_arg(dir)?)
            }
            Self::StemOf(path) => {
                let stem = path.file_stem().ok_or_else(|| ToolError::non_utf8(path))?;
                Binding::Value(stem.to_str().ok_or_else(|| ToolError::non_utf8(path))?.to_string())
            }
            Self::Scratch => {
                tokio::fs::create_dir_all(ctx.scratch_dir())
                    .await
                    .map_err(|e| ToolError::io(ctx.step_name(), &e))?;
                Binding::Value(path_arg(ctx.scratch_dir())?)
            }
        })
    }
}

async fn dicom_files(dir: &Path) -> Result<Vec<String>, ToolError> {
    let pattern = format!("{DICOM_FILE_PREFIX}*");
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ToolError::io("dicom series", &e))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ToolError::io("dicom series", &e))?
    {
        let is_slice = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(DICOM_FILE_PREFIX));
        let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
        if is_slice && is_file {
            files.push(path_arg(&entry.path())?);
        }
    }

    if files.is_empty() {
        return Err(ToolError::EmptySeries {
            dir: dir.to_path_buf(),
            pattern,
        });
    }
    files.sort();
    Ok(files)
}

/// A file location used by an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathRef {
    /// A store path, staged when it is one of the step's outputs.
    Artifact(PathBuf),
    /// A file inside the step's scratch directory.
    Scratch(String),
}

impl PathRef {
    fn resolve(&self, ctx: &StepContext<'_>) -> PathBuf {
        match self {
            Self::Artifact(path) => ctx.resolve(path),
            Self::Scratch(name) => ctx.scratch_dir().join(name),
        }
    }
}

/// One unit of work inside a step.
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Run an external tool rendered from a template.
    Tool {
        /// Program and argument template.
        spec: ToolSpec,
        /// Placeholder bindings.
        args: Vec<(String, ArgValue)>,
        /// Files the tool must create.
        outputs: Vec<PathRef>,
        /// File receiving the tool's standard output.
        stdout: Option<PathBuf>,
    },
    /// Copy a file.
    Copy {
        /// Source.
        from: PathRef,
        /// Destination.
        to: PathBuf,
    },
    /// Write a JSON document.
    WriteJson {
        /// Destination.
        path: PathBuf,
        /// Document.
        value: serde_json::Value,
    },
}

impl StepAction {
    /// Creates a tool action with no bindings.
    #[must_use]
    pub fn tool(spec: &ToolSpec) -> Self {
        Self::Tool {
            spec: spec.clone(),
            args: Vec::new(),
            outputs: Vec::new(),
            stdout: None,
        }
    }

    /// Binds a placeholder of a tool action.
    #[must_use]
    pub fn bind(mut self, name: &str, value: ArgValue) -> Self {
        if let Self::Tool { ref mut args, .. } = self {
            args.push((name.to_string(), value));
        }
        self
    }

    /// Declares a store path the tool action writes.
    #[must_use]
    pub fn writes(mut self, path: impl Into<PathBuf>) -> Self {
        if let Self::Tool { ref mut outputs, .. } = self {
            outputs.push(PathRef::Artifact(path.into()));
        }
        self
    }

    /// Declares a scratch file the tool action writes.
    #[must_use]
    pub fn writes_scratch(mut self, name: impl Into<String>) -> Self {
        if let Self::Tool { ref mut outputs, .. } = self {
            outputs.push(PathRef::Scratch(name.into()));
        }
        self
    }

    /// Captures the tool's standard output into `path`.
    #[must_use]
    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        if let Self::Tool { ref mut stdout, .. } = self {
            *stdout = Some(path.into());
        }
        self
    }

    async fn perform(&self, ctx: &StepContext<'_>) -> Result<(), ToolError> {
        match self {
            Self::Tool {
                spec,
                args,
                outputs,
                stdout,
            } => {
                let mut bindings = Bindings::new();
                for (name, value) in args {
                    bindings.insert(name.clone(), value.bind(ctx).await?);
                }

                let mut invocation = ToolInvocation::from_spec(spec, &bindings)?;
                for output in outputs {
                    invocation = invocation.expects(output.resolve(ctx));
                }
                if let Some(path) = stdout {
                    invocation = invocation.with_stdout_to(ctx.resolve(path));
                }

                ctx.run_tool(&invocation).await?;
            }
            Self::Copy { from, to } => {
                let from = from.resolve(ctx);
                let to = ctx.resolve(to);
                debug!(step = ctx.step_name(), from = %from.display(), to = %to.display(), "Copying artifact");
                tokio::fs::copy(&from, &to)
                    .await
                    .map_err(|e| ToolError::io("copy", &e))?;
            }
            Self::WriteJson { path, value } => {
                let bytes = serde_json::to_vec_pretty(value).map_err(|e| ToolError::Io {
                    program: "write_json".to_string(),
                    reason: e.to_string(),
                })?;
                tokio::fs::write(ctx.resolve(path), bytes)
                    .await
                    .map_err(|e| ToolError::io("write_json", &e))?;
            }
        }
        Ok(())
    }
}

/// A step made of sequential actions.
#[derive(Debug, Clone)]
pub struct ActionStep {
    name: String,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
    actions: Vec<StepAction>,
}

impl ActionStep {
    /// Creates an empty step.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Declares an input.
    #[must_use]
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    /// Declares an output.
    #[must_use]
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// Appends an action.
    #[must_use]
    pub fn action(mut self, action: StepAction) -> Self {
        self.actions.push(action);
        self
    }
}

#[async_trait]
impl Step for ActionStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn declared_inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    fn declared_outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<(), ToolError> {
        for action in &self.actions {
            action.perform(ctx).await?;
        }
        Ok(())
    }
}

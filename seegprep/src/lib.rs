//! # seegprep
//!
//! Resumable preprocessing of SEEG implantation imaging.
//!
//! One run takes a subject's pre-implant MR and post-implant CT DICOM series
//! through conversion, denoising, bias-field correction, intensity
//! normalization, CT-to-MR registration, stereotactic orientation and brain
//! extraction, then writes a `scene.xml` for the visualization front end.
//!
//! - **Artifact store**: every intermediate has one deterministic path
//! - **Idempotent runner**: a step whose outputs exist is skipped, so an
//!   interrupted run resumes where it stopped
//! - **External tools**: typed argument templates, never a shell
//! - **Scene export**: a fixed template filled with the final scans
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use seegprep::prelude::*;
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::new("/data/in", "MR001", "CT001", "P01", "/data/out")?;
//! config.check_directories()?;
//!
//! let run = Preprocessor::new(config, Arc::new(ProcessExecutor::new()))
//!     .with_event_sink(Arc::new(LoggingEventSink::default()))
//!     .run()
//!     .await?;
//! println!("{} steps executed", run.report.executed_steps().len());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod pipeline;
pub mod scene;
pub mod steps;
pub mod store;
pub mod testing;
pub mod tools;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{PipelineConfig, PreprocessSettings, RunnerConfig};
    pub use crate::core::{Modality, Scan, StepStatus, Transform};
    pub use crate::errors::{
        ConfigError, ExternalToolFailure, MissingRoleError, PipelineValidationError,
        PreprocessError, StepIncompleteError, StepTimeoutError,
        TemplateSubstitutionError, ToolError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{PipelineReport, PipelineRun, Preprocessor, StepReport};
    pub use crate::scene::{SceneDescription, SceneExporter, SceneRole};
    pub use crate::steps::{preprocessing_steps, Step, StepContext};
    pub use crate::store::{path_for, ArtifactId, ArtifactStore};
    pub use crate::tools::{ProcessExecutor, ToolExecutor, ToolInvocation, ToolSpec};
    pub use crate::utils::{generate_run_id, iso_timestamp};
}

//! Pipeline lifecycle events.
//!
//! The runner and sequencer report progress through an [`EventSink`]. Event
//! payloads are JSON objects; step events always carry a `step` field.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run began.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// Every step and the scene export finished.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// The run aborted.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
/// A step's outputs were already present and fresh.
pub const STEP_SKIPPED: &str = "step.skipped";
/// A step began executing.
pub const STEP_STARTED: &str = "step.started";
/// A step executed and published its outputs.
pub const STEP_COMPLETED: &str = "step.completed";
/// A step failed.
pub const STEP_FAILED: &str = "step.failed";
/// The scene description was written.
pub const SCENE_EXPORTED: &str = "scene.exported";

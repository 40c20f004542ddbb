//! Pipeline execution.
//!
//! This module provides:
//! - The idempotent step runner
//! - The sequencer that validates and runs the fixed step chain
//! - Run reports

mod report;
mod runner;
mod sequencer;

pub use report::{PipelineReport, StepReport};
pub use runner::IdempotentRunner;
pub use sequencer::{PipelineRun, Preprocessor};

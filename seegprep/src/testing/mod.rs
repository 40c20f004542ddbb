//! Testing utilities for preprocessing pipelines.
//!
//! This module provides:
//! - A scripted tool executor that fakes tool outputs
//! - Temporary subject trees with DICOM series and models

mod fixtures;
mod mocks;

pub use fixtures::{FIXTURE_CT_SERIES, FIXTURE_MR_SERIES, FIXTURE_SUBJECT, SubjectFixture};
pub use mocks::ScriptedExecutor;

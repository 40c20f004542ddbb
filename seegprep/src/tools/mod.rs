//! External tool integration.
//!
//! This module provides:
//! - Argument templates ([`ToolSpec`]) rendered against [`Bindings`]
//! - Typed invocations that record the files they must create
//! - The [`ToolExecutor`] seam and its process-backed implementation

mod executor;
mod invocation;
mod spec;

pub use executor::{ProcessExecutor, ToolExecutor, ToolRun};
#[cfg(test)]
pub use executor::MockToolExecutor;
pub use invocation::ToolInvocation;
pub use spec::{path_arg, Binding, Bindings, ToolSpec};

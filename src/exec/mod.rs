// src/exec/mod.rs

//! Job execution layer.
//!
//! - [`backend`] provides the `ExecutorBackend` trait and the
//!   `RealExecutorBackend` the runtime uses in production, which tests can
//!   replace with a fake implementation.
//! - [`job_runner`] runs one job end to end, including its cache.
//! - [`process`] spawns step processes and keeps a bounded output tail.
//! - [`step_command`] renders shell and docker steps into commands.
//! - [`tools`] checks required tools and probes their versions.

pub mod backend;
pub mod job_runner;
pub mod process;
pub mod step_command;
pub mod tools;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use job_runner::JobRunner;
pub use process::{CommandSpec, ProcessOutput, ProcessRunner, ShellProcessRunner};
pub use tools::{StaticToolProbe, SystemToolProbe, ToolProbe};

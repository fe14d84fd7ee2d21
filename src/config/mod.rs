// src/config/mod.rs

//! Workflow loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`), which doubles as the
//!   wire form of jobs sent to the remote queue.
//! - Load a workflow file from disk (`loader.rs`).
//! - Convert and validate it into [`crate::model::Job`]s (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_workflow_path, load_and_validate, load_from_path};
pub use model::{
    CacheConfig, DefaultSection, JobConfig, MatrixConfig, RawWorkflowFile, StepConfig,
    StepKindConfig, Workflow, WorkflowSection,
};

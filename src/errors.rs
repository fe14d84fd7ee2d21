// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! These are the errors that abort a whole run (workflow loading, graph
//! construction). Failures scoped to a single job are carried as values in
//! [`crate::engine::JobFailure`] instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BetterciError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Duplicate job names found: {0:?}")]
    DuplicateJobName(Vec<String>),

    #[error("Job '{job}' needs missing job '{dependency}'. Known jobs: {known:?}")]
    UnknownDependency {
        job: String,
        dependency: String,
        known: Vec<String>,
    },

    #[error("Cycle detected in job graph: {0}")]
    DagCycle(String),

    #[error("Job '{0}' must have at least one step")]
    EmptySteps(String),

    #[error("Unknown job '{requested}'. Known jobs: {known:?}")]
    UnknownJob {
        requested: String,
        known: Vec<String>,
    },

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BetterciError>;

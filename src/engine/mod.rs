// src/engine/mod.rs

//! Orchestration engine for betterci.
//!
//! This module ties together:
//! - the job scheduler
//! - the main runtime event loop that reacts to:
//!   - job completion events
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical job name type used throughout the engine.
pub type JobName = String;

/// Category of a per-job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A required tool is not on PATH.
    MissingTool,
    /// A step's working directory does not exist.
    MissingWorkingDir,
    /// A step exited non-zero.
    StepFailed,
    /// A step's process could not be started.
    SpawnFailed,
    /// The runner itself broke (e.g. a panicked task).
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::MissingTool => "missing tool",
            FailureKind::MissingWorkingDir => "missing working directory",
            FailureKind::StepFailed => "step failed",
            FailureKind::SpawnFailed => "spawn failed",
            FailureKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// Structured description of why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub job: JobName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub message: String,
    /// Ordered extra fields: `exit_code`, `cmd`, `cwd`, `hint`, ...
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tail: Option<String>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, job: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            job: job.into(),
            step: None,
            message: message.into(),
            details: BTreeMap::new(),
            output_tail: None,
        }
    }

    pub fn in_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }

    pub fn with_tail(mut self, tail: impl Into<String>) -> Self {
        let tail = tail.into();
        if !tail.trim().is_empty() {
            self.output_tail = Some(tail);
        }
        self
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step {
            Some(step) => write!(f, "[{}] job '{}' step '{}': {}", self.kind, self.job, step, self.message),
            None => write!(f, "[{}] job '{}': {}", self.kind, self.job, self.message),
        }
    }
}

/// Terminal result of one job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every step ran and exited zero. Cache save problems are warnings.
    Succeeded { warnings: Vec<String> },
    /// Restored from cache with `skip_on_hit`; no step ran.
    Skipped { warnings: Vec<String> },
    Failed(JobFailure),
}

impl JobOutcome {
    pub fn warnings(&self) -> &[String] {
        match self {
            JobOutcome::Succeeded { warnings } | JobOutcome::Skipped { warnings } => warnings,
            JobOutcome::Failed(_) => &[],
        }
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            JobOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Events flowing into the runtime from executors and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A dispatched job reached a terminal outcome.
    JobCompleted { job: JobName, outcome: JobOutcome },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;

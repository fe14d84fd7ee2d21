// src/dag/mod.rs

//! Job graph and scheduling.
//!
//! - [`graph`] builds and validates the dependency graph.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   jobs are ready, dispatches within the worker limit, and propagates
//!   failures.
//! - [`job_state`] provides per-job state and the scheduled-job type.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] applies individual state transitions.

pub mod graph;
pub mod job_state;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use graph::JobGraph;
pub use job_state::{JobState, ScheduledJob};
pub use scheduler::{Scheduler, SchedulerOptions, default_workers};
pub use scheduler_step::SchedulerStep;

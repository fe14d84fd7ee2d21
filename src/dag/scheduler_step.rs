// src/dag/scheduler_step.rs

//! Step-by-step result type for the scheduler.

use crate::dag::job_state::ScheduledJob;
use crate::engine::JobName;

/// Structured result of feeding one completion into the scheduler.
///
/// Useful for tests that want to step the graph by hand and assert on what
/// changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Pending descendants that can no longer run because of this step's
    /// failure.
    pub newly_blocked: Vec<JobName>,
    /// Whether this step made the scheduler stop dispatching.
    pub halted: bool,
    /// Whether nothing is running and nothing more will be dispatched.
    pub run_finished: bool,
    /// The dispatched jobs themselves.
    pub dispatched: Vec<ScheduledJob>,
}

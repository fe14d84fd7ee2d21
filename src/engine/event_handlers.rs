// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::dag::{ScheduledJob, Scheduler};
use crate::engine::{JobName, JobOutcome};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these jobs to the executor.
    DispatchJobs(Vec<ScheduledJob>),
    /// Nothing is running and nothing more will be dispatched.
    RequestExit,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    fn from_dispatch(scheduler: &Scheduler, dispatched: Vec<ScheduledJob>) -> Self {
        let mut commands = Vec::new();
        if !dispatched.is_empty() {
            commands.push(CoreCommand::DispatchJobs(dispatched));
        }
        let keep_running = !scheduler.is_finished();
        if !keep_running {
            commands.push(CoreCommand::RequestExit);
        }
        CoreStep {
            commands,
            keep_running,
        }
    }
}

/// Seed the run: dispatch the initial ready set.
pub fn handle_start(scheduler: &mut Scheduler) -> CoreStep {
    let dispatched = scheduler.dispatch_ready();
    CoreStep::from_dispatch(scheduler, dispatched)
}

/// Handle a job completion: record the outcome, release or block
/// dependents, and dispatch whatever became ready.
pub fn handle_job_completion(
    scheduler: &mut Scheduler,
    outcomes: &mut BTreeMap<JobName, JobOutcome>,
    job: JobName,
    outcome: JobOutcome,
) -> CoreStep {
    match &outcome {
        JobOutcome::Succeeded { warnings } => {
            info!(job = %job, warnings = warnings.len(), "job succeeded");
        }
        JobOutcome::Skipped { .. } => {
            info!(job = %job, "job skipped (cache hit)");
        }
        JobOutcome::Failed(failure) => {
            warn!(job = %job, kind = %failure.kind, "job failed: {}", failure.message);
        }
    }

    let step = scheduler.step_completion(&job, &outcome);
    if step.halted {
        info!(job = %job, "fail-fast: no further jobs will be dispatched");
    }
    outcomes.entry(job).or_insert(outcome);

    CoreStep::from_dispatch(scheduler, step.dispatched)
}

/// Handle a shutdown request: halt dispatch and wait for in-flight jobs.
pub fn handle_shutdown(scheduler: &mut Scheduler) -> CoreStep {
    if scheduler.request_halt() {
        warn!(
            in_flight = scheduler.in_flight(),
            "shutdown requested; waiting for running jobs to finish"
        );
    }
    CoreStep::from_dispatch(scheduler, Vec::new())
}

// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - handing `ScheduledJob`s to the executor backend
//! - handling Ctrl+C / shutdown
//!
//! The core can be unit tested without any Tokio, channels, filesystem, or
//! processes.

use std::collections::BTreeMap;

use crate::dag::Scheduler;
use crate::engine::event_handlers::{
    CoreStep, handle_job_completion, handle_shutdown, handle_start,
};
use crate::engine::{FailureKind, JobFailure, JobName, JobOutcome, RuntimeEvent};
use crate::report::{JobReport, RunReport};

/// Pure core runtime state.
///
/// This owns the scheduler and the outcomes reported so far. It has no
/// channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    outcomes: BTreeMap<JobName, JobOutcome>,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Whether the run is over (for tests).
    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Dispatch the initial ready set.
    pub fn start(&mut self) -> CoreStep {
        handle_start(&mut self.scheduler)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::JobCompleted { job, outcome } => {
                handle_job_completion(&mut self.scheduler, &mut self.outcomes, job, outcome)
            }
            RuntimeEvent::ShutdownRequested => handle_shutdown(&mut self.scheduler),
        }
    }

    /// Fail every job still running with an internal error and stop
    /// dispatching. Used when the executor stops reporting completions.
    /// Returns the names of the abandoned jobs.
    pub fn abandon_in_flight(&mut self, reason: &str) -> Vec<JobName> {
        let running = self.scheduler.running_jobs();
        if running.is_empty() {
            return running;
        }
        self.scheduler.request_halt();
        for name in &running {
            let failure = JobFailure::new(FailureKind::Internal, name, reason);
            handle_job_completion(
                &mut self.scheduler,
                &mut self.outcomes,
                name.clone(),
                JobOutcome::Failed(failure),
            );
        }
        running
    }

    /// Combine scheduler states with reported outcomes into the final report.
    pub fn into_report(self) -> RunReport {
        let mut outcomes = self.outcomes;
        let jobs = self
            .scheduler
            .results()
            .into_iter()
            .map(|(name, status)| {
                let mut report = JobReport::with_status(status);
                if let Some(outcome) = outcomes.remove(&name) {
                    report.warnings = outcome.warnings().to_vec();
                    report.failure = outcome.failure().cloned();
                }
                (name, report)
            })
            .collect();
        RunReport { jobs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::SchedulerOptions;
    use crate::engine::CoreCommand;
    use crate::model::{Job, Step};
    use crate::types::JobStatus;

    fn job(name: &str, needs: &[&str]) -> Job {
        let mut builder = Job::builder(name).step(Step::shell("run", "true"));
        for dep in needs {
            builder = builder.needs(*dep);
        }
        builder.build().unwrap()
    }

    fn dispatched(step: &CoreStep) -> Vec<String> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::DispatchJobs(jobs) => Some(jobs.iter().map(|j| j.name.clone())),
                CoreCommand::RequestExit => None,
            })
            .flatten()
            .collect()
    }

    fn core(jobs: Vec<Job>) -> CoreRuntime {
        let options = SchedulerOptions {
            max_workers: 4,
            fail_fast: true,
        };
        CoreRuntime::new(Scheduler::new(jobs, options).unwrap())
    }

    #[test]
    fn completion_dispatches_dependents_and_finishes() {
        let mut core = core(vec![job("a", &[]), job("b", &["a"])]);
        let step = core.start();
        assert_eq!(dispatched(&step), vec!["a"]);
        assert!(step.keep_running);

        let step = core.step(RuntimeEvent::JobCompleted {
            job: "a".into(),
            outcome: JobOutcome::Succeeded {
                warnings: vec!["cache save failed".into()],
            },
        });
        assert_eq!(dispatched(&step), vec!["b"]);

        let step = core.step(RuntimeEvent::JobCompleted {
            job: "b".into(),
            outcome: JobOutcome::Succeeded { warnings: vec![] },
        });
        assert!(!step.keep_running);
        assert!(matches!(step.commands.last(), Some(CoreCommand::RequestExit)));

        let report = core.into_report();
        assert_eq!(report.status_of("b"), Some(JobStatus::Ok));
        assert_eq!(report.jobs["a"].warnings, vec!["cache save failed"]);
    }

    #[test]
    fn shutdown_waits_for_in_flight_jobs() {
        let mut core = core(vec![job("a", &[]), job("b", &["a"])]);
        core.start();

        let step = core.step(RuntimeEvent::ShutdownRequested);
        assert!(step.keep_running);

        let step = core.step(RuntimeEvent::JobCompleted {
            job: "a".into(),
            outcome: JobOutcome::Succeeded { warnings: vec![] },
        });
        assert!(dispatched(&step).is_empty());
        assert!(!step.keep_running);
        assert_eq!(core.into_report().status_of("b"), Some(JobStatus::NotRun));
    }

    #[test]
    fn abandoned_jobs_fail_with_internal_error() {
        let mut core = core(vec![job("a", &[]), job("b", &[]), job("c", &["a"])]);
        assert_eq!(dispatched(&core.start()), vec!["a", "b"]);
        core.step(RuntimeEvent::JobCompleted {
            job: "b".into(),
            outcome: JobOutcome::Succeeded { warnings: vec![] },
        });

        assert_eq!(core.abandon_in_flight("executor went away"), vec!["a"]);
        assert!(core.is_finished());
        assert!(core.abandon_in_flight("again").is_empty());

        let report = core.into_report();
        assert_eq!(report.status_of("a"), Some(JobStatus::Failed));
        assert_eq!(report.status_of("b"), Some(JobStatus::Ok));
        assert_eq!(report.status_of("c"), Some(JobStatus::NotRun));
        let failure = report.jobs["a"].failure.as_ref().expect("internal failure");
        assert_eq!(failure.kind, FailureKind::Internal);
        assert_eq!(failure.message, "executor went away");
        assert_ne!(report.exit_code(), 0);
    }

    #[test]
    fn failure_details_reach_the_report() {
        let mut core = core(vec![job("a", &[])]);
        core.start();
        let failure = JobFailure::new(FailureKind::MissingTool, "a", "missing tool 'npm'");
        core.step(RuntimeEvent::JobCompleted {
            job: "a".into(),
            outcome: JobOutcome::Failed(failure.clone()),
        });
        let report = core.into_report();
        assert_eq!(report.jobs["a"].status, JobStatus::Failed);
        assert_eq!(report.jobs["a"].failure.as_ref(), Some(&failure));
        assert_eq!(report.exit_code(), 1);
    }
}

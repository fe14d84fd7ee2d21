// src/dag/scheduler.rs

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use crate::dag::graph::JobGraph;
use crate::dag::job_state::{JobInfo, JobState, ScheduledJob};
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::StateManager;
use crate::engine::{JobName, JobOutcome};
use crate::errors::Result;
use crate::model::Job;
use crate::types::JobStatus;

/// Default worker count: host parallelism minus one, at least one.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .saturating_sub(1)
        .max(1)
}

/// Knobs for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Upper bound on simultaneously running jobs.
    pub max_workers: usize,
    /// Stop dispatching new jobs after the first failure.
    pub fail_fast: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_workers: default_workers(),
            fail_fast: true,
        }
    }
}

/// Scheduler holds the immutable graph plus the mutable state of one run.
///
/// It is responsible for:
/// - keeping the ready queue (in-degree zero, not yet dispatched)
/// - bounding dispatch by `max_workers`
/// - releasing dependents when a job succeeds or is cache-skipped
/// - halting dispatch on failure (fail-fast) or on shutdown
///
/// It is pure and synchronous; the engine feeds it completions and
/// forwards what it dispatches to an executor. Each job is dispatched at
/// most once.
#[derive(Debug)]
pub struct Scheduler {
    graph: JobGraph,
    jobs: BTreeMap<JobName, JobInfo>,
    ready: VecDeque<JobName>,
    options: SchedulerOptions,
    halted: bool,
}

impl Scheduler {
    /// Validate `jobs` into a graph and seed the ready queue with every job
    /// that has no dependencies, in declaration order.
    pub fn new(jobs: Vec<Job>, options: SchedulerOptions) -> Result<Self> {
        let graph = JobGraph::build(&jobs)?;

        let mut table = BTreeMap::new();
        let mut ready = VecDeque::new();
        for job in jobs {
            let in_degree = graph.in_degree(&job.name);
            let info = JobInfo::new(Arc::new(job), in_degree);
            if info.state == JobState::Ready {
                ready.push_back(info.name.clone());
            }
            table.insert(info.name.clone(), info);
        }

        debug!(
            jobs = table.len(),
            roots = ready.len(),
            max_workers = options.max_workers,
            fail_fast = options.fail_fast,
            "scheduler initialised"
        );

        Ok(Self {
            graph,
            jobs: table,
            ready,
            options: SchedulerOptions {
                max_workers: options.max_workers.max(1),
                ..options
            },
            halted: false,
        })
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    pub fn options(&self) -> SchedulerOptions {
        self.options
    }

    /// Job names, sorted.
    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    /// Current state of `job`, if known.
    pub fn run_state_of(&self, job: &str) -> Option<JobState> {
        self.jobs.get(job).map(|info| info.state)
    }

    /// Number of jobs dispatched and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.jobs
            .values()
            .filter(|info| info.state == JobState::Running)
            .count()
    }

    /// Names of jobs dispatched and not yet completed, sorted.
    pub fn running_jobs(&self) -> Vec<JobName> {
        self.jobs
            .values()
            .filter(|info| info.state == JobState::Running)
            .map(|info| info.name.clone())
            .collect()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Nothing is running and nothing more will be dispatched.
    pub fn is_finished(&self) -> bool {
        self.in_flight() == 0 && (self.halted || self.ready.is_empty())
    }

    /// Dispatch as many ready jobs as there are free worker slots.
    pub fn dispatch_ready(&mut self) -> Vec<ScheduledJob> {
        if self.halted {
            return Vec::new();
        }
        let free = self.options.max_workers.saturating_sub(self.in_flight());
        if free == 0 {
            return Vec::new();
        }
        let mut manager = StateManager::new(&self.graph, &mut self.jobs);
        manager.take_dispatchable(&mut self.ready, free)
    }

    /// Stop dispatching; in-flight jobs still report their completions.
    ///
    /// Returns `true` if this call changed anything.
    pub fn request_halt(&mut self) -> bool {
        if self.halted {
            return false;
        }
        info!(
            in_flight = self.in_flight(),
            queued = self.ready.len(),
            "scheduler halted; no further jobs will be dispatched"
        );
        self.halted = true;
        true
    }

    /// Handle completion of a dispatched job (production API).
    pub fn handle_completion(&mut self, job: &str, outcome: &JobOutcome) -> Vec<ScheduledJob> {
        self.step_completion(job, outcome).dispatched
    }

    /// Manual-step variant of `handle_completion` that returns a rich
    /// [`SchedulerStep`].
    pub fn step_completion(&mut self, job: &str, outcome: &JobOutcome) -> SchedulerStep {
        let state = match outcome {
            JobOutcome::Succeeded { .. } => JobState::Succeeded,
            JobOutcome::Skipped { .. } => JobState::Skipped,
            JobOutcome::Failed(_) => JobState::Failed,
        };

        let mut step = SchedulerStep::default();
        let mut manager = StateManager::new(&self.graph, &mut self.jobs);
        if !manager.mark_terminal(job, state) {
            step.run_finished = self.is_finished();
            return step;
        }

        if state.final_status().unlocks_dependents() {
            let newly_ready = manager.release_dependents(job);
            self.ready.extend(newly_ready);
        } else {
            step.newly_blocked = manager.blocked_descendants(job);
            if !step.newly_blocked.is_empty() {
                warn!(
                    job = %job,
                    blocked = ?step.newly_blocked,
                    "job failed; dependents will not run"
                );
            }
            if self.options.fail_fast {
                step.halted = self.request_halt();
            }
        }

        step.dispatched = self.dispatch_ready();
        step.run_finished = self.is_finished();
        step
    }

    /// Final status of every job. Jobs that never reached a terminal state
    /// are `not-run`.
    pub fn results(&self) -> BTreeMap<JobName, JobStatus> {
        self.jobs
            .iter()
            .map(|(name, info)| (name.clone(), info.state.final_status()))
            .collect()
    }
}

// src/dag/state_manager.rs

//! State transitions for jobs in the scheduler.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, info, warn};

use crate::dag::job_state::{JobInfo, JobState, ScheduledJob};
use crate::dag::JobGraph;
use crate::engine::JobName;

/// Applies transitions to the scheduler's job table.
pub struct StateManager<'a> {
    graph: &'a JobGraph,
    jobs: &'a mut BTreeMap<JobName, JobInfo>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a JobGraph, jobs: &'a mut BTreeMap<JobName, JobInfo>) -> Self {
        Self { graph, jobs }
    }

    /// Record a terminal state for a running job.
    ///
    /// Returns `false` (and changes nothing) if the job is unknown or was
    /// not running, so a duplicate completion can never double-release
    /// dependents.
    pub fn mark_terminal(&mut self, name: &str, state: JobState) -> bool {
        debug_assert!(state.is_terminal());
        match self.jobs.get_mut(name) {
            Some(info) if info.state == JobState::Running => {
                info.state = state;
                true
            }
            Some(info) => {
                warn!(job = %name, state = ?info.state, "completion for job that is not running; ignoring");
                false
            }
            None => {
                warn!(job = %name, "completion for unknown job; ignoring");
                false
            }
        }
    }

    /// Decrement the unresolved-dependency count of every direct dependent
    /// of `finished`. Dependents reaching zero move `Pending → Ready` and
    /// are returned in graph order.
    pub fn release_dependents(&mut self, finished: &str) -> Vec<JobName> {
        let mut newly_ready = Vec::new();
        for dependent in self.graph.dependents_of(finished) {
            let Some(info) = self.jobs.get_mut(dependent) else {
                warn!(job = %dependent, "node in graph not present in job table");
                continue;
            };
            info.remaining_deps = info.remaining_deps.saturating_sub(1);
            if info.remaining_deps == 0 && info.state == JobState::Pending {
                debug!(job = %info.name, "dependencies satisfied; marking Ready");
                info.state = JobState::Ready;
                newly_ready.push(info.name.clone());
            }
        }
        newly_ready
    }

    /// Descendants of `failed` that can no longer become ready.
    pub fn blocked_descendants(&self, failed: &str) -> Vec<JobName> {
        self.graph
            .descendants_of(failed)
            .into_iter()
            .filter(|name| {
                self.jobs
                    .get(name)
                    .is_some_and(|info| info.state == JobState::Pending)
            })
            .collect()
    }

    /// Pop up to `slots` names off `ready`, mark them `Running`, and return
    /// them for dispatch.
    pub fn take_dispatchable(
        &mut self,
        ready: &mut VecDeque<JobName>,
        slots: usize,
    ) -> Vec<ScheduledJob> {
        let mut scheduled = Vec::new();
        while scheduled.len() < slots {
            let Some(name) = ready.pop_front() else {
                break;
            };
            let Some(info) = self.jobs.get_mut(&name) else {
                continue;
            };
            if info.state != JobState::Ready {
                continue;
            }
            info!(job = %info.name, "dispatching job");
            info.state = JobState::Running;
            scheduled.push(ScheduledJob::from_job_info(info));
        }
        scheduled
    }
}

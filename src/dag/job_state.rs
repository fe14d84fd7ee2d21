// src/dag/job_state.rs

//! Per-job scheduling state.

use std::sync::Arc;

use crate::engine::JobName;
use crate::model::Job;
use crate::types::JobStatus;

/// Lifecycle of a job within one run.
///
/// `Pending → Ready → Running → {Succeeded, Skipped, Failed}`. A job whose
/// dependency failed, or which was never dispatched because the run halted,
/// stays in `Pending`/`Ready` and is reported as `not-run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Waiting on at least one dependency.
    Pending,
    /// All dependencies satisfied; queued for a worker.
    Ready,
    /// Dispatched to the executor.
    Running,
    Succeeded,
    /// Restored from cache with `skip_on_hit`; no step ran.
    Skipped,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Skipped | JobState::Failed)
    }

    /// Final status for the run report.
    pub fn final_status(self) -> JobStatus {
        match self {
            JobState::Succeeded => JobStatus::Ok,
            JobState::Skipped => JobStatus::SkippedCache,
            JobState::Failed => JobStatus::Failed,
            JobState::Pending | JobState::Ready | JobState::Running => JobStatus::NotRun,
        }
    }
}

/// Static job definition plus mutable scheduling state.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub name: JobName,
    pub job: Arc<Job>,
    /// Dependencies that have not yet succeeded or been skipped.
    pub remaining_deps: usize,
    pub state: JobState,
}

impl JobInfo {
    pub fn new(job: Arc<Job>, in_degree: usize) -> Self {
        let state = if in_degree == 0 {
            JobState::Ready
        } else {
            JobState::Pending
        };
        Self {
            name: job.name.clone(),
            job,
            remaining_deps: in_degree,
            state,
        }
    }
}

/// A job the scheduler wants the executor to run now.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub name: JobName,
    pub job: Arc<Job>,
}

impl ScheduledJob {
    pub fn from_job_info(info: &JobInfo) -> Self {
        Self {
            name: info.name.clone(),
            job: Arc::clone(&info.job),
        }
    }
}

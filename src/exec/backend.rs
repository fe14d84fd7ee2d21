// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of spawning work
//! directly. This makes it easy to swap in a fake executor in tests.
//!
//! - `RealExecutorBackend` is the implementation used by `betterci run`.
//!   It spawns one Tokio task per dispatched job, runs it through a
//!   [`JobRunner`], and reports the outcome as `JobCompleted`.
//! - Tests can provide their own `ExecutorBackend` that, for example,
//!   records which jobs were dispatched and emits scripted outcomes.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;

use crate::dag::ScheduledJob;
use crate::engine::{FailureKind, JobFailure, JobOutcome, RuntimeEvent};
use crate::errors::Result;
use crate::exec::job_runner::JobRunner;

/// Trait abstracting how dispatched jobs are executed.
///
/// Production code uses [`RealExecutorBackend`]; tests can provide their own
/// implementation that doesn't spawn real processes. Every dispatched job
/// must eventually produce exactly one `JobCompleted` event.
pub trait ExecutorBackend: Send {
    /// Start the given jobs. Must not wait for them to finish.
    fn spawn_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    runner: Arc<JobRunner>,
    repo_root: Arc<PathBuf>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
}

impl RealExecutorBackend {
    pub fn new(
        runner: Arc<JobRunner>,
        repo_root: PathBuf,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
    ) -> Self {
        Self {
            runner,
            repo_root: Arc::new(repo_root),
            runtime_tx,
        }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        for scheduled in jobs {
            let runner = Arc::clone(&self.runner);
            let root = Arc::clone(&self.repo_root);
            let tx = self.runtime_tx.clone();

            tokio::spawn(async move {
                let name = scheduled.name.clone();
                let job = Arc::clone(&scheduled.job);

                // Run in a nested task so a panic still yields a completion.
                let handle = tokio::spawn(async move { runner.run(job, &root).await });
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        error!(job = %name, error = %err, "job task panicked");
                        JobOutcome::Failed(JobFailure::new(
                            FailureKind::Internal,
                            &name,
                            format!("job task failed: {err}"),
                        ))
                    }
                };

                if tx
                    .send(RuntimeEvent::JobCompleted { job: name.clone(), outcome })
                    .await
                    .is_err()
                {
                    error!(job = %name, "runtime gone; dropping job completion");
                }
            });
        }

        Box::pin(async { Ok(()) })
    }
}

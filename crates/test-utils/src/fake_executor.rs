use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use betterci::dag::ScheduledJob;
use betterci::engine::{FailureKind, JobFailure, JobOutcome, RuntimeEvent};
use betterci::errors::Result;
use betterci::exec::ExecutorBackend;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct LogInner {
    dispatched: Vec<String>,
    running: usize,
    max_running: usize,
}

/// What a [`FakeExecutor`] saw, shared with the test.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    inner: Arc<Mutex<LogInner>>,
}

impl ExecutionLog {
    /// Job names in dispatch order.
    pub fn dispatched(&self) -> Vec<String> {
        self.inner.lock().unwrap().dispatched.clone()
    }

    /// Highest number of jobs that were "running" at once.
    pub fn max_concurrency(&self) -> usize {
        self.inner.lock().unwrap().max_running
    }

    fn started(&self, job: &str) {
        let mut guard = self.inner.lock().unwrap();
        guard.dispatched.push(job.to_string());
        guard.running += 1;
        guard.max_running = guard.max_running.max(guard.running);
    }

    fn finished(&self) {
        self.inner.lock().unwrap().running -= 1;
    }
}

/// A fake executor that:
/// - records which jobs were dispatched and how many overlapped
/// - reports a scripted outcome per job after an optional delay
///   (`Succeeded` unless scripted otherwise).
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    outcomes: HashMap<String, JobOutcome>,
    delay: Duration,
    log: ExecutionLog,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            runtime_tx,
            outcomes: HashMap::new(),
            delay: Duration::ZERO,
            log: ExecutionLog::default(),
        }
    }

    pub fn outcome(mut self, job: &str, outcome: JobOutcome) -> Self {
        self.outcomes.insert(job.to_string(), outcome);
        self
    }

    /// Script `job` to fail as if its step exited with `exit_code`.
    pub fn fail(self, job: &str, exit_code: i32) -> Self {
        let failure = JobFailure::new(
            FailureKind::StepFailed,
            job,
            format!("exited with code {exit_code}"),
        )
        .in_step("run")
        .detail("exit_code", exit_code);
        self.outcome(job, JobOutcome::Failed(failure))
    }

    /// Script `job` as a cache hit with `skip_on_hit`.
    pub fn skip(self, job: &str) -> Self {
        self.outcome(job, JobOutcome::Skipped { warnings: vec![] })
    }

    /// Keep every job "running" for `delay` before it completes.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn log(&self) -> ExecutionLog {
        self.log.clone()
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        for scheduled in jobs {
            let outcome = self
                .outcomes
                .get(&scheduled.name)
                .cloned()
                .unwrap_or(JobOutcome::Succeeded { warnings: vec![] });
            let tx = self.runtime_tx.clone();
            let log = self.log.clone();
            let delay = self.delay;

            log.started(&scheduled.name);
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                log.finished();
                let _ = tx
                    .send(RuntimeEvent::JobCompleted {
                        job: scheduled.name,
                        outcome,
                    })
                    .await;
            });
        }
        Box::pin(async { Ok(()) })
    }
}

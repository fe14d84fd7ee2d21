// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::ScheduledJob;
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::report::RunReport;

use super::core::CoreRuntime;
use super::event_handlers::CoreStep;
use super::{CoreCommand, RuntimeEvent};

/// Drives the scheduler in response to `RuntimeEvent`s and delegates actual
/// job execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. This struct handles async IO: reading events from
/// channels and dispatching jobs to the executor.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(core: CoreRuntime, event_rx: mpsc::Receiver<RuntimeEvent>, executor: E) -> Self {
        Self {
            core,
            event_rx,
            executor,
        }
    }

    /// Main event loop.
    ///
    /// - Dispatches the initial ready set.
    /// - Consumes `RuntimeEvent`s from `event_rx` and feeds them into the core.
    /// - Executes commands returned by the core.
    /// - Returns the final report once nothing is running and nothing more
    ///   will be dispatched.
    pub async fn run(mut self) -> Result<RunReport> {
        info!("betterci runtime started");

        let step = self.core.start();
        let mut keep_running = self.apply(step).await?;

        while keep_running {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    let abandoned = self
                        .core
                        .abandon_in_flight("executor stopped reporting before the job completed");
                    warn!(
                        jobs = ?abandoned,
                        "runtime event channel closed with jobs still in flight"
                    );
                    break;
                }
            };

            debug!(?event, "runtime received event");
            let step = self.core.step(event);
            keep_running = self.apply(step).await?;
        }

        info!("runtime exiting");
        Ok(self.core.into_report())
    }

    async fn apply(&mut self, step: CoreStep) -> Result<bool> {
        for command in step.commands {
            self.execute_command(command).await?;
        }
        Ok(step.keep_running)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchJobs(jobs) => {
                self.spawn_jobs(jobs).await?;
            }
            CoreCommand::RequestExit => {
                debug!("core issued RequestExit command");
            }
        }
        Ok(())
    }

    async fn spawn_jobs(&mut self, jobs: Vec<ScheduledJob>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }

        let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        debug!(?names, "spawning ready jobs");

        self.executor.spawn_jobs(jobs).await
    }
}

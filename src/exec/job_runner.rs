// src/exec/job_runner.rs

//! Runs one job: tool preflight, cache restore, steps, cache save + prune.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheStore, Manifest};
use crate::engine::{FailureKind, JobFailure, JobOutcome};
use crate::exec::process::ProcessRunner;
use crate::exec::step_command::{host_workdir, render_step};
use crate::exec::tools::{ToolProbe, tool_hint};
use crate::model::Job;

/// Executes jobs against a repository checkout.
///
/// Holds no per-job state; one runner is shared by every job of a run (and
/// by every lease an agent processes).
#[derive(Clone)]
pub struct JobRunner {
    cache: Arc<CacheStore>,
    tools: Arc<dyn ToolProbe>,
    process: Arc<dyn ProcessRunner>,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl JobRunner {
    pub fn new(
        cache: Arc<CacheStore>,
        tools: Arc<dyn ToolProbe>,
        process: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            cache,
            tools,
            process,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Run `job` in `repo_root` to a terminal outcome. Never panics on job
    /// errors; every problem becomes a `Failed` outcome or a warning.
    pub async fn run(&self, job: Arc<Job>, repo_root: &Path) -> JobOutcome {
        info!(job = %job.name, steps = job.steps().len(), "starting job");

        if let Err(failure) = self.preflight_tools(&job) {
            return JobOutcome::Failed(failure);
        }
        if let Err(failure) = preflight_workdirs(&job, repo_root) {
            return JobOutcome::Failed(failure);
        }

        let mut warnings = Vec::new();
        let caching = job.cache.is_active();
        let mut restored_key = None;

        if caching {
            match self.restore(&job, repo_root).await {
                Ok((true, _)) if job.cache.skip_on_hit => {
                    info!(job = %job.name, "cache hit with skip_on_hit; not running steps");
                    return JobOutcome::Skipped { warnings };
                }
                Ok((_, key)) => restored_key = Some(key),
                Err(message) => {
                    warn!(job = %job.name, "{message}");
                    warnings.push(message);
                }
            }
        }

        for step in job.steps() {
            let spec = render_step(&job, step, repo_root);
            info!(job = %job.name, step = %step.name, cmd = %step.run, "running step");

            let output = match self.process.run(&spec).await {
                Ok(output) => output,
                Err(err) => {
                    return JobOutcome::Failed(
                        JobFailure::new(FailureKind::SpawnFailed, &job.name, format!("{err:#}"))
                            .in_step(&step.name)
                            .detail("cmd", &step.run)
                            .detail("cwd", step.cwd_or_default()),
                    );
                }
            };

            if !output.success() {
                return JobOutcome::Failed(
                    JobFailure::new(
                        FailureKind::StepFailed,
                        &job.name,
                        format!("exited with code {}", output.exit_code),
                    )
                    .in_step(&step.name)
                    .detail("exit_code", output.exit_code)
                    .detail("cmd", &step.run)
                    .detail("cwd", step.cwd_or_default())
                    .with_tail(output.tail),
                );
            }
            debug!(job = %job.name, step = %step.name, "step finished");
        }

        if caching {
            warnings.extend(self.save_and_prune(&job, repo_root, restored_key).await);
        }

        JobOutcome::Succeeded { warnings }
    }

    fn preflight_tools(&self, job: &Job) -> Result<(), JobFailure> {
        for tool in job.required_tools() {
            if !self.tools.is_available(&tool) {
                let hint = tool_hint(&tool);
                warn!(job = %job.name, tool = %tool, "required tool not found");
                return Err(JobFailure::new(
                    FailureKind::MissingTool,
                    &job.name,
                    format!("required tool '{tool}' is not on PATH"),
                )
                .detail("tool", &tool)
                .detail("hint", hint));
            }
        }
        Ok(())
    }

    /// `Ok((hit, key))`, or a warning message when the restore could not
    /// even be attempted. The key is the one computed before any step ran.
    async fn restore(
        &self,
        job: &Arc<Job>,
        repo_root: &Path,
    ) -> Result<(bool, (CacheKey, Manifest)), String> {
        let cache = Arc::clone(&self.cache);
        let job_ref = Arc::clone(job);
        let root = repo_root.to_path_buf();

        let joined =
            tokio::task::spawn_blocking(move || cache.restore(&job_ref, &root)).await;
        match joined {
            Ok(Ok(restore)) => {
                if let Some(reason) = &restore.reason {
                    debug!(job = %job.name, key = %restore.key.short(), reason = %reason, "cache miss");
                }
                Ok((restore.hit, (restore.key, restore.manifest)))
            }
            Ok(Err(err)) => Err(format!("cache restore failed: {err:#}")),
            Err(err) => Err(format!("cache restore task failed: {err}")),
        }
    }

    /// Save under the key from `restore` (computed afresh only when restore
    /// failed), then prune. Returns warnings.
    async fn save_and_prune(
        &self,
        job: &Arc<Job>,
        repo_root: &Path,
        key: Option<(CacheKey, Manifest)>,
    ) -> Vec<String> {
        let cache = Arc::clone(&self.cache);
        let job_ref = Arc::clone(job);
        let root: PathBuf = repo_root.to_path_buf();

        let joined = tokio::task::spawn_blocking(move || {
            let mut warnings = Vec::new();
            if let Err(err) = cache.save(&job_ref, &root, key) {
                warnings.push(format!("cache save failed: {err:#}"));
                return warnings;
            }
            if let Err(err) = cache.prune(&job_ref.name, job_ref.cache.keep) {
                warnings.push(format!("cache prune failed: {err:#}"));
            }
            warnings
        })
        .await;

        let warnings = joined.unwrap_or_else(|err| vec![format!("cache save task failed: {err}")]);
        for warning in &warnings {
            warn!(job = %job.name, "{warning}");
        }
        warnings
    }
}

/// Every step's working directory must exist before the first step runs.
fn preflight_workdirs(job: &Job, repo_root: &Path) -> Result<(), JobFailure> {
    for step in job.steps() {
        let workdir = host_workdir(repo_root, step);
        if !workdir.is_dir() {
            warn!(job = %job.name, step = %step.name, cwd = %workdir.display(), "working directory missing");
            return Err(JobFailure::new(
                FailureKind::MissingWorkingDir,
                &job.name,
                format!("working directory does not exist: {}", workdir.display()),
            )
            .in_step(&step.name)
            .detail("cwd", step.cwd_or_default()));
        }
    }
    Ok(())
}

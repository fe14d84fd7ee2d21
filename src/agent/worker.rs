// src/agent/worker.rs

//! Lease polling loop: claim a job, check out its repository, run it through
//! the same [`JobRunner`] as local runs and report the result.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::agent::api_client::ApiClient;
use crate::agent::models::Lease;
use crate::engine::JobOutcome;
use crate::exec::JobRunner;
use crate::model::Job;
use crate::select::git::git;
use crate::types::LeaseStatus;

/// Settings of one agent process.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub agent_id: String,
    pub poll_interval: Duration,
    /// Parent directory of repository checkouts.
    pub work_dir: PathBuf,
}

impl AgentOptions {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            poll_interval: Duration::from_secs(5),
            work_dir: PathBuf::from(".betterci/agent_work"),
        }
    }
}

/// Polls the queue and executes leased jobs one at a time.
#[derive(Debug)]
pub struct Agent {
    api: ApiClient,
    runner: Arc<JobRunner>,
    options: AgentOptions,
}

impl Agent {
    pub fn new(api: ApiClient, runner: Arc<JobRunner>, options: AgentOptions) -> Self {
        Self {
            api,
            runner,
            options,
        }
    }

    /// Poll until `shutdown` resolves.
    ///
    /// Shutdown is only observed while claiming or idling; a job that is
    /// already running is finished and reported first. API errors are
    /// logged and retried after the poll interval.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            api = %self.api.base_url(),
            agent_id = %self.options.agent_id,
            poll_interval = ?self.options.poll_interval,
            work_dir = %self.options.work_dir.display(),
            "betterci agent starting"
        );
        tokio::pin!(shutdown);

        loop {
            let claimed = tokio::select! {
                _ = &mut shutdown => break,
                claimed = self.api.claim_lease(&self.options.agent_id) => claimed,
            };

            match claimed {
                Ok(Some(lease)) => {
                    info!(job_id = %lease.job_id, job = %lease.job_name, "acquired lease");
                    self.process(&lease).await;
                    continue;
                }
                Ok(None) => {}
                Err(err) => warn!(error = %format!("{err:#}"), "API error while claiming lease"),
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }

        info!("agent stopped");
        Ok(())
    }

    async fn process(&self, lease: &Lease) {
        let (status, details) = match self.execute(lease).await {
            Ok(outcome) => lease_result(&outcome),
            Err(err) => (
                LeaseStatus::Failed,
                json!({ "error": format!("{err:#}"), "error_type": "setup" }),
            ),
        };

        match self
            .api
            .complete_lease(&lease.job_id, &self.options.agent_id, status, details)
            .await
        {
            Ok(()) => info!(job_id = %lease.job_id, ?status, "lease completed"),
            Err(err) => warn!(job_id = %lease.job_id, error = %format!("{err:#}"), "failed to report completion"),
        }
    }

    async fn execute(&self, lease: &Lease) -> Result<JobOutcome> {
        let payload = &lease.payload_json;
        let repo = checkout(&payload.repo_url, &payload.git_ref, &self.options.work_dir).await?;
        let job = Job::try_from(payload.job.clone())
            .with_context(|| format!("invalid job definition for '{}'", lease.job_name))?;
        Ok(self.runner.run(Arc::new(job), &repo).await)
    }
}

/// Map a job outcome to the status and details reported for its lease.
pub fn lease_result(outcome: &JobOutcome) -> (LeaseStatus, Value) {
    match outcome {
        JobOutcome::Succeeded { warnings } => (
            LeaseStatus::Ok,
            json!({ "result": "ok", "warnings": warnings }),
        ),
        JobOutcome::Skipped { warnings } => (
            LeaseStatus::Ok,
            json!({ "result": "skipped(cache)", "warnings": warnings }),
        ),
        JobOutcome::Failed(failure) => (
            LeaseStatus::Failed,
            json!({
                "result": "failed",
                "error": failure.to_string(),
                "failure": failure,
                "logs": failure.output_tail.clone().unwrap_or_default(),
            }),
        ),
    }
}

/// Checkout directory name for a repository URL: its last path segment
/// without a `.git` suffix.
pub fn repo_dir_name(repo_url: &str) -> String {
    let last = repo_url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or_default();
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        "repo".to_string()
    } else {
        name.to_string()
    }
}

/// Clone `repo_url` into `work_dir` (or fetch if already cloned) and check
/// out `git_ref`. Returns the checkout path.
pub async fn checkout(repo_url: &str, git_ref: &str, work_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(work_dir)
        .await
        .with_context(|| format!("creating work dir {}", work_dir.display()))?;

    let repo_path = work_dir.join(repo_dir_name(repo_url));
    if repo_path.exists() {
        info!(repo = %repo_path.display(), "updating existing checkout");
        git(&repo_path, &["fetch", "origin"]).await?;
    } else {
        info!(url = %repo_url, repo = %repo_path.display(), "cloning repository");
        let target = repo_path.to_string_lossy().into_owned();
        git(work_dir, &["clone", repo_url, &target]).await?;
    }
    git(&repo_path, &["checkout", git_ref]).await?;
    Ok(repo_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FailureKind, JobFailure};

    #[test]
    fn repo_dir_name_strips_suffix_and_path() {
        assert_eq!(repo_dir_name("https://github.com/acme/app.git"), "app");
        assert_eq!(repo_dir_name("https://github.com/acme/app/"), "app");
        assert_eq!(repo_dir_name("git@github.com:acme.git"), "acme");
        assert_eq!(repo_dir_name(""), "repo");
    }

    #[test]
    fn failed_outcome_reports_failure_details() {
        let failure = JobFailure::new(FailureKind::StepFailed, "unit", "exited with code 1")
            .in_step("test")
            .detail("exit_code", 1)
            .with_tail("assertion failed");
        let (status, details) = lease_result(&JobOutcome::Failed(failure));
        assert_eq!(status, LeaseStatus::Failed);
        assert_eq!(details["failure"]["kind"], "step_failed");
        assert_eq!(details["failure"]["details"]["exit_code"], "1");
        assert_eq!(details["logs"], "assertion failed");
    }

    #[test]
    fn cache_skip_reports_ok() {
        let (status, details) = lease_result(&JobOutcome::Skipped { warnings: vec![] });
        assert_eq!(status, LeaseStatus::Ok);
        assert_eq!(details["result"], "skipped(cache)");
    }
}

// src/agent/submit.rs

//! Enqueue every job of a workflow as one remote run.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::agent::api_client::ApiClient;
use crate::agent::models::{JobPayload, SubmitJob, SubmitRunRequest, SubmitRunResponse};
use crate::config::{JobConfig, Workflow};
use crate::select::git::git;

/// Build the `POST /runs` body: one payload per job, in declaration order.
pub fn build_submit_request(workflow: &Workflow, repo_url: &str, git_ref: &str) -> SubmitRunRequest {
    let jobs = workflow
        .jobs
        .iter()
        .map(|job| SubmitJob {
            job_name: job.name.clone(),
            payload_json: JobPayload {
                repo_url: repo_url.to_string(),
                git_ref: git_ref.to_string(),
                job: JobConfig::from(job),
            },
        })
        .collect();

    SubmitRunRequest {
        repo: repo_url.to_string(),
        jobs,
    }
}

/// URL of the `origin` remote of the repository at `repo_root`.
pub async fn remote_url(repo_root: &Path) -> Result<String> {
    git(repo_root, &["remote", "get-url", "origin"])
        .await
        .context("could not read the origin remote; pass --repo")
}

/// Current branch name, or the HEAD commit when detached.
pub async fn current_ref(repo_root: &Path) -> Result<String> {
    let branch = git(repo_root, &["rev-parse", "--abbrev-ref", "HEAD"])
        .await
        .context("could not determine the current git ref; pass --ref")?;
    if branch != "HEAD" {
        return Ok(branch);
    }
    git(repo_root, &["rev-parse", "HEAD"])
        .await
        .context("could not determine the current git ref; pass --ref")
}

/// Submit `workflow`, resolving the repository URL and ref from the git
/// checkout at `repo_root` when they are not given.
pub async fn submit_workflow(
    api: &ApiClient,
    workflow: &Workflow,
    repo_root: &Path,
    repo: Option<String>,
    git_ref: Option<String>,
) -> Result<SubmitRunResponse> {
    let repo = match repo {
        Some(repo) => repo,
        None => remote_url(repo_root).await?,
    };
    let git_ref = match git_ref {
        Some(git_ref) => git_ref,
        None => current_ref(repo_root).await?,
    };
    info!(%repo, %git_ref, jobs = workflow.jobs.len(), "submitting run");

    let request = build_submit_request(workflow, &repo, &git_ref);
    api.submit_run(&request).await
}

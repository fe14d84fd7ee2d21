// src/select/mod.rs

//! Narrowing a workflow down to the jobs that should run.
//!
//! - [`select_named`]: `--job NAME`, plus everything those jobs need.
//! - [`select_jobs`]: `--git-diff`, keeping jobs whose `paths` match a
//!   changed file (plus everything those jobs need).

pub mod git;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::Context;
use tracing::info;

use crate::cache::inputs::build_globset;
use crate::errors::{BetterciError, Result};
use crate::model::Job;

pub use git::{ChangeSetProvider, GitChangeSet, StaticChangeSet};

/// Jobs kept by a selection, in declaration order, and the names dropped.
#[derive(Debug, Clone)]
pub struct Selection {
    pub jobs: Vec<Job>,
    pub skipped: Vec<String>,
}

/// Add every job transitively needed by `seeds`. Unknown `needs` are left
/// for graph validation to report.
fn close_over_needs(jobs: &[Job], seeds: BTreeSet<String>) -> BTreeSet<String> {
    let by_name: BTreeMap<&str, &Job> = jobs.iter().map(|j| (j.name.as_str(), j)).collect();
    let mut keep = BTreeSet::new();
    let mut queue: VecDeque<String> = seeds.into_iter().collect();
    while let Some(name) = queue.pop_front() {
        if !keep.insert(name.clone()) {
            continue;
        }
        if let Some(job) = by_name.get(name.as_str()) {
            queue.extend(job.needs.iter().cloned());
        }
    }
    keep
}

fn partition(jobs: Vec<Job>, keep: &BTreeSet<String>) -> Selection {
    let (jobs, dropped): (Vec<Job>, Vec<Job>) =
        jobs.into_iter().partition(|j| keep.contains(&j.name));
    Selection {
        jobs,
        skipped: dropped.into_iter().map(|j| j.name).collect(),
    }
}

/// Keep only `names` and their transitive dependencies.
pub fn select_named(jobs: Vec<Job>, names: &[String]) -> Result<Selection> {
    let known: BTreeSet<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
    for name in names {
        if !known.contains(name.as_str()) {
            return Err(BetterciError::UnknownJob {
                requested: name.clone(),
                known: known.iter().map(|s| s.to_string()).collect(),
            });
        }
    }
    let keep = close_over_needs(&jobs, names.iter().cloned().collect());
    Ok(partition(jobs, &keep))
}

/// Whether `job` should run given the changed files.
pub fn job_matches_changes(job: &Job, changed: &[String]) -> Result<bool> {
    if !job.filter.diff_enabled {
        return Ok(true);
    }
    let Some(paths) = &job.filter.paths else {
        return Ok(true);
    };
    let set = build_globset(paths)
        .with_context(|| format!("invalid `paths` glob in job '{}'", job.name))?;
    Ok(changed.iter().any(|file| set.is_match(file)))
}

/// Diff-based selection: keep jobs touched by `changed`, then pull back in
/// whatever they need.
pub fn select_jobs(jobs: Vec<Job>, changed: &[String]) -> Result<Selection> {
    let mut seeds = BTreeSet::new();
    for job in &jobs {
        if job_matches_changes(job, changed)? {
            seeds.insert(job.name.clone());
        }
    }
    let keep = close_over_needs(&jobs, seeds);
    let selection = partition(jobs, &keep);
    info!(
        changed = changed.len(),
        selected = selection.jobs.len(),
        skipped = ?selection.skipped,
        "git-diff job selection"
    );
    Ok(selection)
}

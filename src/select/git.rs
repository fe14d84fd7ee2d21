// src/select/git.rs

//! Thin async wrapper around the `git` CLI.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tracing::debug;

/// Run `git <args>` in `cwd` and return trimmed stdout.
pub async fn git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("spawning `git {}`", args.join(" ")))?;

    if !output.status.success() {
        bail!(
            "`git {}` exited with {}: {}",
            args.join(" "),
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

/// Source of "which files changed" for diff-based job selection.
pub trait ChangeSetProvider: Send + Sync {
    /// Changed paths relative to the repository root, sorted.
    fn changed_files(&self) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>>;
}

/// Change set computed from a git work tree.
///
/// - Dirty tree: unstaged ∪ staged ∪ untracked files.
/// - Clean tree: `merge-base(compare_ref, HEAD)..HEAD`, falling back to
///   `HEAD~1..HEAD`, and finally to every tracked file.
#[derive(Debug, Clone)]
pub struct GitChangeSet {
    repo_root: PathBuf,
    compare_ref: String,
}

impl GitChangeSet {
    pub fn new(repo_root: impl Into<PathBuf>, compare_ref: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            compare_ref: compare_ref.into(),
        }
    }

    async fn compute(&self) -> Result<Vec<String>> {
        let root = self.repo_root.as_path();
        let status = git(root, &["status", "--porcelain"]).await?;

        let mut files: BTreeSet<String> = BTreeSet::new();
        if !status.is_empty() {
            debug!("work tree is dirty; using local changes");
            files.extend(lines(&git(root, &["diff", "--name-only"]).await?));
            files.extend(lines(&git(root, &["diff", "--name-only", "--cached"]).await?));
            files.extend(lines(
                &git(root, &["ls-files", "--others", "--exclude-standard"]).await?,
            ));
            return Ok(files.into_iter().collect());
        }

        let base = match git(root, &["merge-base", &self.compare_ref, "HEAD"]).await {
            Ok(base) => base,
            Err(err) => {
                debug!(compare_ref = %self.compare_ref, error = %err, "merge-base failed; using HEAD~1");
                "HEAD~1".to_string()
            }
        };

        match git(root, &["diff", "--name-only", &base, "HEAD"]).await {
            Ok(diff) => files.extend(lines(&diff)),
            Err(err) => {
                debug!(error = %err, "diff against base failed; treating all tracked files as changed");
                files.extend(lines(&git(root, &["ls-files"]).await?));
            }
        }
        Ok(files.into_iter().collect())
    }
}

impl ChangeSetProvider for GitChangeSet {
    fn changed_files(&self) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>> {
        Box::pin(self.compute())
    }
}

/// Fixed change set, for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticChangeSet(pub Vec<String>);

impl ChangeSetProvider for StaticChangeSet {
    fn changed_files(&self) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>> {
        let mut files = self.0.clone();
        files.sort();
        files.dedup();
        Box::pin(async move { Ok(files) })
    }
}

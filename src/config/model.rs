// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::{DEFAULT_CACHE_KEEP, Job};

/// Top-level workflow file as read from TOML.
///
/// ```toml
/// [config]
/// workers = 4
/// fail_fast = true
///
/// [defaults]
/// env = { CI = "1" }
///
/// [[job]]
/// name = "unit"
/// needs = ["setup"]
/// inputs = ["src/**"]
///
/// [[job.steps]]
/// name = "test"
/// run = "cargo test"
/// ```
///
/// Jobs are an array rather than a table so that duplicate names survive
/// parsing and are reported by graph validation. Use
/// [`crate::config::load_and_validate`] to get a checked [`Workflow`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWorkflowFile {
    /// Run settings from `[config]`.
    #[serde(default)]
    pub config: WorkflowSection,

    /// Values merged into every job, from `[defaults]`.
    #[serde(default)]
    pub defaults: DefaultSection,

    /// All jobs from `[[job]]`, in declaration order.
    #[serde(default)]
    pub job: Vec<JobConfig>,
}

/// `[config]` section. CLI flags take precedence over every field.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowSection {
    /// Maximum parallel jobs; host parallelism minus one when unset.
    #[serde(default)]
    pub workers: Option<usize>,

    /// Stop dispatching after the first failure.
    #[serde(default = "default_true")]
    pub fail_fast: bool,

    /// Cache store root, relative to the repository root.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            workers: None,
            fail_fast: true,
            cache_dir: None,
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DefaultSection {
    /// Merged under each job's `env` (the job wins on conflicts).
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Retention count for jobs that don't set `cache.keep`.
    #[serde(default)]
    pub cache_keep: Option<usize>,
}

/// One `[[job]]` entry.
///
/// Also the wire form of a job in remote-queue payloads, hence `Serialize`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct JobConfig {
    pub name: String,

    #[serde(default)]
    pub steps: Vec<StepConfig>,

    /// Jobs that must succeed (or be cache-skipped) first.
    #[serde(default)]
    pub needs: Vec<String>,

    /// Paths/globs whose contents feed the cache key.
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Tools that must be on PATH.
    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Globs matched against changed files in `--git-diff` mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,

    #[serde(default = "default_true")]
    pub diff_enabled: bool,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Expands this entry into one job per value; see [`MatrixConfig`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<MatrixConfig>,
}

/// `[job.matrix]` table.
///
/// ```toml
/// [[job]]
/// name = "test"
/// matrix = { key = "py", values = ["3.11", "3.12"] }
///
/// [[job.steps]]
/// name = "pytest"
/// run = "pytest -q"
/// kind = "docker"
/// image = "python:${{ matrix.py }}"
/// ```
///
/// yields jobs `test-3.11` and `test-3.12`. `${{ matrix.<key> }}` is
/// substituted in step fields, env values, inputs and paths. A `needs`
/// entry naming the unexpanded job depends on every expansion.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MatrixConfig {
    pub key: String,
    pub values: Vec<String>,
}

/// `[job.cache]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub dirs: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub skip_on_hit: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep: Option<usize>,

    #[serde(default)]
    pub key_extra: BTreeMap<String, String>,

    #[serde(default)]
    pub tool_versions: BTreeMap<String, String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dirs: Vec::new(),
            exclude: Vec::new(),
            skip_on_hit: false,
            keep: None,
            key_extra: BTreeMap::new(),
            tool_versions: BTreeMap::new(),
        }
    }
}

/// Step execution kind as spelled in TOML.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKindConfig {
    #[default]
    #[serde(alias = "shell")]
    Sh,
    Docker,
    Lint,
    Test,
}

/// One `[[job.steps]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StepConfig {
    pub name: String,

    /// Command line for `sh` and `docker` steps.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub run: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    #[serde(default)]
    pub kind: StepKindConfig,

    /// Docker only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Docker only: extra `-v` mounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,

    /// Docker only: `--user`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Docker only: extra `-e` variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub docker_env: BTreeMap<String, String>,

    /// Lint/test only: program to exec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Lint/test only: arguments placed before the files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Lint: files to check (default `.`). Test: targets to run.
    #[serde(default, alias = "targets", skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// A validated workflow: run settings plus jobs in declaration order.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub settings: WorkflowSection,
    pub jobs: Vec<Job>,
}

impl Workflow {
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.iter().map(|j| j.name.clone()).collect()
    }
}

pub(crate) fn effective_keep(cache: &CacheConfig, defaults: &DefaultSection) -> usize {
    cache
        .keep
        .or(defaults.cache_keep)
        .unwrap_or(DEFAULT_CACHE_KEEP)
}

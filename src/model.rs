// src/model.rs

//! Immutable job model.
//!
//! [`Job`] and [`Step`] values are produced once by workflow loading (or by
//! the remote agent from a lease payload) and are only ever read afterwards.
//! A computed cache key is never stored on the job; it lives in the job
//! runner's local state for the duration of one execution.

use std::collections::BTreeMap;

use crate::errors::{BetterciError, Result};

/// Default number of cache artifacts kept per job name.
pub const DEFAULT_CACHE_KEEP: usize = 3;

/// How a step is executed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StepKind {
    /// Run `run` through the host shell.
    #[default]
    Shell,
    /// Run `run` through `sh -c` inside a container, with the repository
    /// mounted at `/workspace`.
    Docker {
        image: String,
        volumes: Vec<String>,
        env: BTreeMap<String, String>,
        user: Option<String>,
    },
    /// Run a linter directly, without a shell: `tool args.. files..`.
    /// With no files the linter is pointed at the step directory (`.`).
    Lint {
        tool: String,
        args: Vec<String>,
        files: Vec<String>,
    },
    /// Run a test runner directly, without a shell: `tool args.. targets..`.
    Test {
        tool: String,
        args: Vec<String>,
        targets: Vec<String>,
    },
}

impl StepKind {
    /// Short discriminator, used in cache key payloads and plan output.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Shell => "sh",
            StepKind::Docker { .. } => "docker",
            StepKind::Lint { .. } => "lint",
            StepKind::Test { .. } => "test",
        }
    }

    /// Program run by lint and test steps.
    pub fn tool(&self) -> Option<&str> {
        match self {
            StepKind::Lint { tool, .. } | StepKind::Test { tool, .. } => Some(tool),
            StepKind::Shell | StepKind::Docker { .. } => None,
        }
    }

    /// Full argument vector (program first) for kinds that bypass the shell.
    pub fn direct_argv(&self) -> Option<Vec<String>> {
        let (tool, args, operands) = match self {
            StepKind::Lint { tool, args, files } => {
                let files = if files.is_empty() {
                    vec![".".to_string()]
                } else {
                    files.clone()
                };
                (tool, args, files)
            }
            StepKind::Test {
                tool,
                args,
                targets,
            } => (tool, args, targets.clone()),
            StepKind::Shell | StepKind::Docker { .. } => return None,
        };
        let mut argv = Vec::with_capacity(1 + args.len() + operands.len());
        argv.push(tool.clone());
        argv.extend(args.iter().cloned());
        argv.extend(operands);
        Some(argv)
    }
}

/// One command inside a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub run: String,
    /// Working directory relative to the repository root (`None` = root).
    pub cwd: Option<String>,
    pub kind: StepKind,
}

impl Step {
    /// A plain shell step.
    pub fn shell(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run: run.into(),
            cwd: None,
            kind: StepKind::Shell,
        }
    }

    /// Set the working directory override.
    pub fn in_dir(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// A lint or test step; `run` becomes the displayed command line.
    pub fn direct(name: impl Into<String>, kind: StepKind) -> Self {
        Self::shell(name, String::new()).with_kind(kind)
    }

    /// Replace the execution kind. For lint and test kinds `run` is
    /// rewritten to the command line that will actually execute.
    pub fn with_kind(mut self, kind: StepKind) -> Self {
        if let Some(argv) = kind.direct_argv() {
            self.run = argv.join(" ");
        }
        self.kind = kind;
        self
    }

    /// Working directory as used in cache keys and on disk.
    pub fn cwd_or_default(&self) -> &str {
        self.cwd.as_deref().unwrap_or(".")
    }
}

/// Cache configuration for a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Directories/files (relative to the repository root) stored as the artifact.
    pub dirs: Vec<String>,
    /// Extra exclude globs, applied both to input hashing and archiving.
    pub exclude: Vec<String>,
    /// Skip all steps when the cache restores successfully.
    pub skip_on_hit: bool,
    /// Number of historical artifacts to keep for this job name.
    pub keep: usize,
    /// Arbitrary extra salt mixed into the key.
    pub key_extra: BTreeMap<String, String>,
    /// Pinned tool versions; when present, version probing is skipped for
    /// the pinned tools.
    pub tool_versions: BTreeMap<String, String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dirs: Vec::new(),
            exclude: Vec::new(),
            skip_on_hit: false,
            keep: DEFAULT_CACHE_KEEP,
            key_extra: BTreeMap::new(),
            tool_versions: BTreeMap::new(),
        }
    }
}

impl CacheSettings {
    /// Whether this job participates in restore/save at all.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.dirs.is_empty()
    }
}

/// Metadata used by the git-diff job selection filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFilter {
    /// Globs matched against changed files; `None` means "always run".
    pub paths: Option<Vec<String>>,
    /// Per-job opt-out of diff-based selection.
    pub diff_enabled: bool,
}

impl Default for PathFilter {
    fn default() -> Self {
        Self {
            paths: None,
            diff_enabled: true,
        }
    }
}

/// A named unit of scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    steps: Vec<Step>,
    pub needs: Vec<String>,
    pub inputs: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub requires: Vec<String>,
    pub cache: CacheSettings,
    pub filter: PathFilter,
}

impl Job {
    /// Start building a job.
    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder::new(name)
    }

    /// Ordered, non-empty list of steps.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Tools that must be resolvable before any step runs: the declared
    /// `requires`, `docker` when a docker step is present, and the program
    /// of every lint or test step.
    pub fn required_tools(&self) -> Vec<String> {
        let mut tools = self.requires.clone();
        for step in &self.steps {
            let implied = match &step.kind {
                StepKind::Docker { .. } => Some("docker"),
                kind => kind.tool(),
            };
            if let Some(tool) = implied {
                if !tools.iter().any(|t| t == tool) {
                    tools.push(tool.to_string());
                }
            }
        }
        tools
    }
}

/// Builder for [`Job`]; `build` enforces the non-empty steps invariant.
#[derive(Debug, Clone)]
pub struct JobBuilder {
    name: String,
    steps: Vec<Step>,
    needs: Vec<String>,
    inputs: Vec<String>,
    env: BTreeMap<String, String>,
    requires: Vec<String>,
    cache: CacheSettings,
    filter: PathFilter,
}

impl JobBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            needs: Vec::new(),
            inputs: Vec::new(),
            env: BTreeMap::new(),
            requires: Vec::new(),
            cache: CacheSettings::default(),
            filter: PathFilter::default(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn needs(mut self, dep: impl Into<String>) -> Self {
        self.needs.push(dep.into());
        self
    }

    pub fn input(mut self, pattern: impl Into<String>) -> Self {
        self.inputs.push(pattern.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn requires(mut self, tool: impl Into<String>) -> Self {
        self.requires.push(tool.into());
        self
    }

    pub fn cache(mut self, cache: CacheSettings) -> Self {
        self.cache = cache;
        self
    }

    pub fn filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn build(self) -> Result<Job> {
        if self.name.trim().is_empty() {
            return Err(BetterciError::ConfigError(
                "job name must not be empty".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(BetterciError::EmptySteps(self.name));
        }
        Ok(Job {
            name: self.name,
            steps: self.steps,
            needs: self.needs,
            inputs: self.inputs,
            env: self.env,
            requires: self.requires,
            cache: self.cache,
            filter: self.filter,
        })
    }
}

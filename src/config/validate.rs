// src/config/validate.rs

//! Semantic checks on a parsed workflow and conversion into [`Job`]s.
//!
//! Graph-level problems (duplicate names, unknown `needs`, cycles) are left
//! to [`crate::dag::JobGraph::build`], which runs before any dispatch.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::model::{
    CacheConfig, DefaultSection, JobConfig, RawWorkflowFile, StepConfig, StepKindConfig,
    Workflow, effective_keep,
};
use crate::errors::{BetterciError, Result};
use crate::model::{CacheSettings, Job, PathFilter, Step, StepKind};

impl TryFrom<RawWorkflowFile> for Workflow {
    type Error = BetterciError;

    fn try_from(raw: RawWorkflowFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_jobs(&raw)?;
        validate_settings(&raw)?;

        let jobs = expand_matrices(raw.job)?
            .into_iter()
            .map(|cfg| cfg.into_job(&raw.defaults))
            .collect::<Result<Vec<_>>>()?;

        Ok(Workflow {
            settings: raw.config,
            jobs,
        })
    }
}

impl TryFrom<JobConfig> for Job {
    type Error = BetterciError;

    fn try_from(cfg: JobConfig) -> std::result::Result<Self, Self::Error> {
        cfg.into_job(&DefaultSection::default())
    }
}

impl From<&Job> for JobConfig {
    fn from(job: &Job) -> Self {
        JobConfig {
            name: job.name.clone(),
            steps: job.steps().iter().map(StepConfig::from).collect(),
            needs: job.needs.clone(),
            inputs: job.inputs.clone(),
            requires: job.requires.clone(),
            env: job.env.clone(),
            paths: job.filter.paths.clone(),
            diff_enabled: job.filter.diff_enabled,
            cache: CacheConfig {
                enabled: job.cache.enabled,
                dirs: job.cache.dirs.clone(),
                exclude: job.cache.exclude.clone(),
                skip_on_hit: job.cache.skip_on_hit,
                keep: Some(job.cache.keep),
                key_extra: job.cache.key_extra.clone(),
                tool_versions: job.cache.tool_versions.clone(),
            },
            matrix: None,
        }
    }
}

impl From<&Step> for StepConfig {
    fn from(step: &Step) -> Self {
        let base = StepConfig {
            name: step.name.clone(),
            run: step.run.clone(),
            cwd: step.cwd.clone(),
            kind: StepKindConfig::Sh,
            image: None,
            volumes: Vec::new(),
            user: None,
            docker_env: Default::default(),
            tool: None,
            args: Vec::new(),
            files: Vec::new(),
        };
        match &step.kind {
            StepKind::Shell => base,
            StepKind::Lint { tool, args, files } => StepConfig {
                run: String::new(),
                kind: StepKindConfig::Lint,
                tool: Some(tool.clone()),
                args: args.clone(),
                files: files.clone(),
                ..base
            },
            StepKind::Test {
                tool,
                args,
                targets,
            } => StepConfig {
                run: String::new(),
                kind: StepKindConfig::Test,
                tool: Some(tool.clone()),
                args: args.clone(),
                files: targets.clone(),
                ..base
            },
            StepKind::Docker {
                image,
                volumes,
                env,
                user,
            } => StepConfig {
                kind: StepKindConfig::Docker,
                image: Some(image.clone()),
                volumes: volumes.clone(),
                user: user.clone(),
                docker_env: env.clone(),
                ..base
            },
        }
    }
}

impl JobConfig {
    /// Convert into a [`Job`], merging `[defaults]` underneath.
    pub fn into_job(self, defaults: &DefaultSection) -> Result<Job> {
        if self.name.trim().is_empty() {
            return Err(BetterciError::ConfigError(
                "every [[job]] needs a non-empty `name`".to_string(),
            ));
        }
        if self.matrix.is_some() {
            return Err(BetterciError::ConfigError(format!(
                "job '{}': matrix jobs are expanded when the workflow is loaded",
                self.name
            )));
        }
        let keep = effective_keep(&self.cache, defaults);
        if keep == 0 {
            return Err(BetterciError::ConfigError(format!(
                "job '{}': cache.keep must be >= 1 (got 0)",
                self.name
            )));
        }

        let steps = self
            .steps
            .into_iter()
            .map(|s| s.into_step(&self.name))
            .collect::<Result<Vec<_>>>()?;

        let mut env = defaults.env.clone();
        env.extend(self.env);

        let mut builder = Job::builder(self.name)
            .steps(steps)
            .cache(CacheSettings {
                enabled: self.cache.enabled,
                dirs: self.cache.dirs,
                exclude: self.cache.exclude,
                skip_on_hit: self.cache.skip_on_hit,
                keep,
                key_extra: self.cache.key_extra,
                tool_versions: self.cache.tool_versions,
            })
            .filter(PathFilter {
                paths: self.paths,
                diff_enabled: self.diff_enabled,
            });
        for dep in self.needs {
            builder = builder.needs(dep);
        }
        for input in self.inputs {
            builder = builder.input(input);
        }
        for tool in self.requires {
            builder = builder.requires(tool);
        }
        for (k, v) in env {
            builder = builder.env(k, v);
        }
        builder.build()
    }

    /// One config per matrix value, named `<name>-<value>`, with
    /// `${{ matrix.<key> }}` substituted. Configs without a matrix pass
    /// through unchanged.
    fn expand_matrix(self) -> Result<Vec<JobConfig>> {
        let Some(matrix) = self.matrix.clone() else {
            return Ok(vec![self]);
        };
        if matrix.key.trim().is_empty() {
            return Err(BetterciError::ConfigError(format!(
                "job '{}': matrix.key must not be empty",
                self.name
            )));
        }
        if matrix.values.is_empty() {
            return Err(BetterciError::ConfigError(format!(
                "job '{}': matrix.values must not be empty",
                self.name
            )));
        }

        Ok(matrix
            .values
            .iter()
            .map(|value| {
                let mut job = self.clone();
                job.matrix = None;
                job.name = format!("{}-{value}", self.name);
                job.substitute(&matrix.key, value);
                job
            })
            .collect())
    }

    fn substitute(&mut self, key: &str, value: &str) {
        let sub = |text: &mut String| *text = substitute_matrix(text, key, value);
        self.needs.iter_mut().for_each(sub);
        self.inputs.iter_mut().for_each(sub);
        self.env.values_mut().for_each(sub);
        self.paths.iter_mut().flatten().for_each(sub);
        for step in &mut self.steps {
            sub(&mut step.run);
            step.cwd.iter_mut().for_each(sub);
            step.image.iter_mut().for_each(sub);
            step.volumes.iter_mut().for_each(sub);
            step.user.iter_mut().for_each(sub);
            step.docker_env.values_mut().for_each(sub);
            step.tool.iter_mut().for_each(sub);
            step.args.iter_mut().for_each(sub);
            step.files.iter_mut().for_each(sub);
        }
    }
}

fn substitute_matrix(text: &str, key: &str, value: &str) -> String {
    let spaced = ["${{ matrix.", key, " }}"].concat();
    let tight = ["${{matrix.", key, "}}"].concat();
    text.replace(&spaced, value).replace(&tight, value)
}

/// Expand every matrix entry and point `needs` on an unexpanded matrix job
/// at all of its expansions.
fn expand_matrices(configs: Vec<JobConfig>) -> Result<Vec<JobConfig>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut expanded = Vec::with_capacity(configs.len());
    for cfg in configs {
        let base = cfg.name.clone();
        let has_matrix = cfg.matrix.is_some();
        let jobs = cfg.expand_matrix()?;
        if has_matrix {
            groups
                .entry(base)
                .or_default()
                .extend(jobs.iter().map(|j| j.name.clone()));
        }
        expanded.extend(jobs);
    }
    if groups.is_empty() {
        return Ok(expanded);
    }

    let concrete: BTreeSet<String> = expanded.iter().map(|j| j.name.clone()).collect();
    for job in &mut expanded {
        job.needs = std::mem::take(&mut job.needs)
            .into_iter()
            .flat_map(|dep| match groups.get(&dep) {
                Some(variants) if !concrete.contains(&dep) => variants.clone(),
                _ => vec![dep],
            })
            .collect();
    }
    Ok(expanded)
}

impl StepConfig {
    fn into_step(self, job: &str) -> Result<Step> {
        if matches!(self.kind, StepKindConfig::Lint | StepKindConfig::Test) {
            return self.into_direct_step(job);
        }
        if self.run.trim().is_empty() {
            return Err(BetterciError::ConfigError(format!(
                "job '{job}': step '{}' has an empty `run`",
                self.name
            )));
        }
        let mut step = Step::shell(self.name, self.run);
        if let Some(cwd) = self.cwd {
            step = step.in_dir(cwd);
        }
        match self.kind {
            StepKindConfig::Sh | StepKindConfig::Lint | StepKindConfig::Test => Ok(step),
            StepKindConfig::Docker => {
                let image = self.image.filter(|i| !i.trim().is_empty()).ok_or_else(|| {
                    BetterciError::ConfigError(format!(
                        "job '{job}': docker step '{}' needs an `image`",
                        step.name
                    ))
                })?;
                Ok(step.with_kind(StepKind::Docker {
                    image,
                    volumes: self.volumes,
                    env: self.docker_env,
                    user: self.user,
                }))
            }
        }
    }

    fn into_direct_step(self, job: &str) -> Result<Step> {
        let label = if self.kind == StepKindConfig::Lint { "lint" } else { "test" };
        if !self.run.trim().is_empty() {
            return Err(BetterciError::ConfigError(format!(
                "job '{job}': {label} step '{}' takes `tool` and `args`, not `run`",
                self.name
            )));
        }
        let tool = self.tool.filter(|t| !t.trim().is_empty()).ok_or_else(|| {
            BetterciError::ConfigError(format!(
                "job '{job}': {label} step '{}' needs a `tool`",
                self.name
            ))
        })?;
        let kind = if self.kind == StepKindConfig::Lint {
            StepKind::Lint {
                tool,
                args: self.args,
                files: self.files,
            }
        } else {
            StepKind::Test {
                tool,
                args: self.args,
                targets: self.files,
            }
        };
        let mut step = Step::direct(self.name, kind);
        if let Some(cwd) = self.cwd {
            step = step.in_dir(cwd);
        }
        Ok(step)
    }
}

fn ensure_has_jobs(raw: &RawWorkflowFile) -> Result<()> {
    if raw.job.is_empty() {
        return Err(BetterciError::ConfigError(
            "workflow must contain at least one [[job]]".to_string(),
        ));
    }
    Ok(())
}

fn validate_settings(raw: &RawWorkflowFile) -> Result<()> {
    if raw.config.workers == Some(0) {
        return Err(BetterciError::ConfigError(
            "[config].workers must be >= 1 (got 0)".to_string(),
        ));
    }
    if raw.defaults.cache_keep == Some(0) {
        return Err(BetterciError::ConfigError(
            "[defaults].cache_keep must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Workflow> {
        let raw: RawWorkflowFile = toml::from_str(toml_src)?;
        Workflow::try_from(raw)
    }

    #[test]
    fn full_job_converts_with_defaults_merged() {
        let wf = parse(
            r#"
            [config]
            workers = 3

            [defaults]
            env = { CI = "1", MODE = "default" }
            cache_keep = 5

            [[job]]
            name = "unit"
            needs = ["setup"]
            inputs = ["src/**"]
            requires = ["cargo"]
            env = { MODE = "job" }
            paths = ["src/**"]

            [job.cache]
            dirs = ["target"]
            skip_on_hit = true
            key_extra = { toolchain = "stable" }

            [[job.steps]]
            name = "test"
            run = "cargo test"
            cwd = "crates/core"

            [[job.steps]]
            name = "container"
            run = "pytest"
            kind = "docker"
            image = "python:3.12"
            docker_env = { PYTHONUNBUFFERED = "1" }

            [[job]]
            name = "setup"
            [[job.steps]]
            name = "noop"
            run = "true"
            "#,
        )
        .unwrap();

        assert_eq!(wf.settings.workers, Some(3));
        assert!(wf.settings.fail_fast);
        let unit = wf.job("unit").unwrap();
        assert_eq!(unit.env["CI"], "1");
        assert_eq!(unit.env["MODE"], "job");
        assert_eq!(unit.cache.keep, 5);
        assert!(unit.cache.skip_on_hit);
        assert_eq!(unit.steps()[0].cwd.as_deref(), Some("crates/core"));
        assert!(matches!(unit.steps()[1].kind, StepKind::Docker { ref image, .. } if image == "python:3.12"));
        assert_eq!(unit.filter.paths.as_deref(), Some(&["src/**".to_string()][..]));
        assert_eq!(wf.job_names(), vec!["unit", "setup"]);
    }

    #[test]
    fn empty_steps_and_missing_image_are_rejected() {
        let err = parse(
            r#"
            [[job]]
            name = "lint"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, BetterciError::EmptySteps(name) if name == "lint"));

        let err = parse(
            r#"
            [[job]]
            name = "img"
            [[job.steps]]
            name = "x"
            run = "true"
            kind = "docker"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, BetterciError::ConfigError(msg) if msg.contains("image")));
    }

    #[test]
    fn lint_and_test_steps_convert_without_run() {
        let wf = parse(
            r#"
            [[job]]
            name = "check"

            [[job.steps]]
            name = "ruff"
            kind = "lint"
            tool = "ruff"
            args = ["check"]
            cwd = "py"

            [[job.steps]]
            name = "pytest"
            kind = "test"
            tool = "pytest"
            args = ["-q"]
            targets = ["tests/unit"]
            "#,
        )
        .unwrap();
        let check = wf.job("check").unwrap();
        assert_eq!(
            check.steps()[0].kind,
            StepKind::Lint {
                tool: "ruff".to_string(),
                args: vec!["check".to_string()],
                files: vec![],
            }
        );
        assert_eq!(check.steps()[0].cwd.as_deref(), Some("py"));
        assert_eq!(check.steps()[1].run, "pytest -q tests/unit");
        assert_eq!(check.required_tools(), vec!["ruff", "pytest"]);

        let wire = serde_json::to_string(&JobConfig::from(check)).unwrap();
        let back: JobConfig = serde_json::from_str(&wire).unwrap();
        assert_eq!(&Job::try_from(back).unwrap(), check);
    }

    #[test]
    fn lint_step_needs_a_tool_and_no_run() {
        let err = parse(
            r#"
            [[job]]
            name = "check"
            [[job.steps]]
            name = "ruff"
            kind = "lint"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, BetterciError::ConfigError(msg) if msg.contains("`tool`")));

        let err = parse(
            r#"
            [[job]]
            name = "check"
            [[job.steps]]
            name = "ruff"
            kind = "lint"
            tool = "ruff"
            run = "ruff check ."
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, BetterciError::ConfigError(msg) if msg.contains("not `run`")));

        let err = parse(
            r#"
            [[job]]
            name = "build"
            [[job.steps]]
            name = "make"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, BetterciError::ConfigError(msg) if msg.contains("empty `run`")));
    }

    #[test]
    fn matrix_expands_into_one_job_per_value() {
        let wf = parse(
            r#"
            [[job]]
            name = "test"
            needs = ["setup"]
            inputs = ["py${{ matrix.py }}/**"]
            env = { PY = "${{matrix.py}}" }
            matrix = { key = "py", values = ["3.11", "3.12"] }

            [[job.steps]]
            name = "pytest"
            run = "pytest -q"
            kind = "docker"
            image = "python:${{ matrix.py }}"

            [[job]]
            name = "setup"
            [[job.steps]]
            name = "noop"
            run = "true"

            [[job]]
            name = "report"
            needs = ["test"]
            [[job.steps]]
            name = "noop"
            run = "true"
            "#,
        )
        .unwrap();

        assert_eq!(wf.job_names(), vec!["test-3.11", "test-3.12", "setup", "report"]);
        let py311 = wf.job("test-3.11").unwrap();
        assert_eq!(py311.env["PY"], "3.11");
        assert_eq!(py311.inputs, vec!["py3.11/**"]);
        assert_eq!(py311.needs, vec!["setup"]);
        assert!(matches!(
            py311.steps()[0].kind,
            StepKind::Docker { ref image, .. } if image == "python:3.11"
        ));
        assert_eq!(wf.job("report").unwrap().needs, vec!["test-3.11", "test-3.12"]);
    }

    #[test]
    fn matrix_without_values_is_rejected() {
        let err = parse(
            r#"
            [[job]]
            name = "test"
            matrix = { key = "py", values = [] }
            [[job.steps]]
            name = "pytest"
            run = "pytest"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, BetterciError::ConfigError(msg) if msg.contains("matrix.values")));
    }

    #[test]
    fn no_jobs_is_a_config_error() {
        assert!(matches!(parse(""), Err(BetterciError::ConfigError(_))));
    }

    #[test]
    fn job_config_round_trips_through_wire_form() {
        let wf = parse(
            r#"
            [[job]]
            name = "build"
            needs = []
            [job.cache]
            dirs = ["out"]
            [[job.steps]]
            name = "make"
            run = "make"
            kind = "docker"
            image = "gcc"
            "#,
        )
        .unwrap();
        let job = &wf.jobs[0];
        let wire = serde_json::to_string(&JobConfig::from(job)).unwrap();
        let back: JobConfig = serde_json::from_str(&wire).unwrap();
        assert_eq!(&Job::try_from(back).unwrap(), job);
    }
}

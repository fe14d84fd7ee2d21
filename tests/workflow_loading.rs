// tests/workflow_loading.rs

mod common;
use crate::common::builders::job;
use crate::common::init_tracing;

use std::error::Error;
use std::fs;

use betterci::config::{load_and_validate, load_from_path};
use betterci::dag::JobGraph;
use betterci::errors::BetterciError;
use betterci::model::StepKind;
use betterci::render_plan;
use betterci::select::select_named;

type TestResult = Result<(), Box<dyn Error>>;

const WORKFLOW: &str = r#"
[config]
workers = 2
fail_fast = false

[defaults]
env = { CI = "1" }
cache_keep = 5

[[job]]
name = "setup"

[[job.steps]]
name = "deps"
run = "npm ci"

[job.cache]
dirs = ["node_modules"]
skip_on_hit = true

[[job]]
name = "unit"
needs = ["setup"]
inputs = ["src/**"]
env = { CI = "true" }

[[job.steps]]
name = "test"
run = "pytest -q"
kind = "docker"
image = "python:3.12"
cwd = "tests"
"#;

#[test]
fn workflow_file_loads_into_jobs() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("betterci.toml");
    fs::write(&path, WORKFLOW)?;

    let workflow = load_and_validate(&path)?;
    assert_eq!(workflow.settings.workers, Some(2));
    assert!(!workflow.settings.fail_fast);
    assert_eq!(workflow.job_names(), vec!["setup", "unit"]);

    let setup = workflow.job("setup").expect("setup job");
    assert_eq!(setup.cache.keep, 5);
    assert!(setup.cache.skip_on_hit);
    assert_eq!(setup.env.get("CI").map(String::as_str), Some("1"));

    let unit = workflow.job("unit").expect("unit job");
    assert_eq!(unit.env.get("CI").map(String::as_str), Some("true"));
    assert!(matches!(unit.steps()[0].kind, StepKind::Docker { .. }));
    assert!(unit.required_tools().contains(&"docker".to_string()));

    let graph = JobGraph::build(&workflow.jobs)?;
    let plan = render_plan(&workflow, &graph);
    assert!(plan.contains("stage 1: setup"));
    assert!(plan.contains("stage 2: unit"));
    assert!(plan.contains("cache: node_modules (keep 5), skip on hit"));
    Ok(())
}

#[test]
fn unreadable_and_malformed_files_are_errors() -> TestResult {
    let dir = tempfile::tempdir()?;

    let missing = load_from_path(dir.path().join("nope.toml"));
    assert!(matches!(missing, Err(BetterciError::ConfigError(_))));

    let path = dir.path().join("bad.toml");
    fs::write(&path, "[[job]\nname = ")?;
    assert!(matches!(load_from_path(&path), Err(BetterciError::TomlError(_))));
    Ok(())
}

#[test]
fn graph_errors_surface_before_dispatch() {
    let dup = vec![job("a", &[]), job("a", &[])];
    assert!(matches!(
        JobGraph::build(&dup),
        Err(BetterciError::DuplicateJobName(names)) if names == vec!["a"]
    ));

    let unknown = vec![job("a", &["missing"])];
    let err = JobGraph::build(&unknown).unwrap_err();
    assert!(err.to_string().contains("missing"));

    let jobs = vec![job("a", &[]), job("b", &["a"])];
    assert!(matches!(
        select_named(jobs, &["zzz".to_string()]),
        Err(BetterciError::UnknownJob { .. })
    ));
}

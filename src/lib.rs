// src/lib.rs

pub mod agent;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod model;
pub mod report;
pub mod select;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentOptions, ApiClient, submit_workflow};
use crate::cache::{CacheStore, DEFAULT_CACHE_DIR};
use crate::cli::{AgentArgs, CliArgs, Command, PlanArgs, RunArgs, SubmitArgs};
use crate::config::{Workflow, load_and_validate};
use crate::dag::{JobGraph, Scheduler, SchedulerOptions, default_workers};
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent};
use crate::exec::{JobRunner, RealExecutorBackend, ShellProcessRunner, SystemToolProbe, ToolProbe};
use crate::model::Job;
use crate::report::{ReportPrinter, RunReport};
use crate::select::{ChangeSetProvider, GitChangeSet, select_jobs, select_named};

/// High-level entry point used by `main.rs`. Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    match args.command {
        Command::Run(run) => run_workflow(run).await,
        Command::Plan(plan) => {
            print_plan(&plan)?;
            Ok(0)
        }
        Command::Agent(agent) => {
            run_agent(agent).await?;
            Ok(0)
        }
        Command::Submit(submit) => {
            run_submit(submit).await?;
            Ok(0)
        }
    }
}

/// Build a [`JobRunner`] with the production collaborators and a cache
/// store rooted at `cache_root`.
pub fn job_runner(cache_root: PathBuf) -> JobRunner {
    let tools: Arc<dyn ToolProbe> = Arc::new(SystemToolProbe::new());
    let cache = Arc::new(CacheStore::new(cache_root, Arc::clone(&tools)));
    JobRunner::new(cache, tools, Arc::new(ShellProcessRunner))
}

/// Run `jobs` to completion through the scheduler and a real executor.
///
/// This wires together:
/// - graph validation + scheduler
/// - the runtime event loop
/// - the process-backed executor
/// - Ctrl-C handling (stop dispatching, let running jobs finish)
pub async fn execute(
    jobs: Vec<Job>,
    options: SchedulerOptions,
    runner: Arc<JobRunner>,
    repo_root: PathBuf,
) -> Result<RunReport> {
    // Validation happens here, before anything is dispatched.
    let scheduler = Scheduler::new(jobs, options)?;

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let executor = RealExecutorBackend::new(runner, repo_root, rt_tx.clone());

    let ctrl_c = {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl+C received; finishing running jobs");
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        })
    };
    drop(rt_tx);

    let core = CoreRuntime::new(scheduler);
    let report = Runtime::new(core, rt_rx, executor).run().await;
    ctrl_c.abort();
    Ok(report?)
}

async fn run_workflow(args: RunArgs) -> Result<i32> {
    let workflow = load_and_validate(&args.workflow)?;
    let settings = workflow.settings.clone();
    let mut jobs = workflow.jobs;

    if !args.jobs.is_empty() {
        let selection = select_named(jobs, &args.jobs)?;
        debug!(skipped = ?selection.skipped, "restricted to --job selection");
        jobs = selection.jobs;
    }

    if args.git_diff {
        let changed = GitChangeSet::new(&args.repo_root, &args.compare_ref)
            .changed_files()
            .await
            .context("computing git change set")?;
        info!(files = changed.len(), "git change set computed");
        let selection = select_jobs(jobs, &changed)?;
        if !selection.skipped.is_empty() {
            info!(skipped = ?selection.skipped, "jobs skipped: no matching changes");
        }
        jobs = selection.jobs;
    }

    if jobs.is_empty() {
        println!("no jobs selected");
        return Ok(0);
    }

    let options = SchedulerOptions {
        max_workers: args
            .workers
            .or(settings.workers)
            .unwrap_or_else(default_workers),
        fail_fast: settings.fail_fast && !args.no_fail_fast,
    };

    let cache_dir = args
        .cache_dir
        .or(settings.cache_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    let cache_root = resolve_against(&args.repo_root, &cache_dir);
    info!(
        jobs = jobs.len(),
        workers = options.max_workers,
        fail_fast = options.fail_fast,
        cache = %cache_root.display(),
        "starting run"
    );

    let runner = Arc::new(job_runner(cache_root));
    let report = execute(jobs, options, runner, args.repo_root.clone()).await?;

    ReportPrinter::stdout()
        .print(&report)
        .context("writing result table")?;
    Ok(report.exit_code())
}

fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn print_plan(args: &PlanArgs) -> Result<()> {
    let workflow = load_and_validate(&args.workflow)?;
    let graph = JobGraph::build(&workflow.jobs)?;
    print!("{}", render_plan(&workflow, &graph));
    debug!("plan complete (no execution)");
    Ok(())
}

/// Text of `betterci plan`: stages, then per-job details.
pub fn render_plan(workflow: &Workflow, graph: &JobGraph) -> String {
    let mut out = String::new();
    let levels = graph.topo_levels();
    out.push_str(&format!(
        "betterci plan: {} job(s) in {} stage(s)\n\n",
        graph.len(),
        levels.len()
    ));
    for (i, level) in levels.iter().enumerate() {
        out.push_str(&format!("stage {}: {}\n", i + 1, level.join(", ")));
    }

    out.push_str("\njobs:\n");
    for job in &workflow.jobs {
        out.push_str(&format!("  - {}\n", job.name));
        let needs = graph.dependencies_of(&job.name);
        if !needs.is_empty() {
            out.push_str(&format!("      needs: {}\n", needs.join(", ")));
        }
        out.push_str(&format!("      steps: {}\n", job.steps().len()));
        if job.cache.is_active() {
            let mut line = format!(
                "      cache: {} (keep {})",
                job.cache.dirs.join(", "),
                job.cache.keep
            );
            if job.cache.skip_on_hit {
                line.push_str(", skip on hit");
            }
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

async fn run_agent(args: AgentArgs) -> Result<()> {
    let agent_id = args.agent_id.unwrap_or_else(default_agent_id);
    let api = ApiClient::new(&args.api)?;
    let runner = Arc::new(job_runner(args.cache_dir));

    let mut options = AgentOptions::new(agent_id);
    options.poll_interval = Duration::from_secs(args.poll_interval.max(1));
    options.work_dir = args.work_dir;

    let agent = Agent::new(api, runner, options);
    agent
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
}

fn default_agent_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("betterci-agent-{}", std::process::id()))
}

async fn run_submit(args: SubmitArgs) -> Result<()> {
    let workflow = load_and_validate(&args.workflow)?;
    // Reject graphs the agents could never schedule.
    JobGraph::build(&workflow.jobs)?;
    println!(
        "Loaded {} job(s) from {}",
        workflow.jobs.len(),
        args.workflow.display()
    );

    let api = ApiClient::new(&args.api)?;
    let response =
        submit_workflow(&api, &workflow, Path::new("."), args.repo, args.git_ref).await?;

    println!("Submitted run to {}", api.base_url());
    println!("  Run ID: {}", response.run_id);
    if !response.job_ids.is_empty() {
        println!("  Job IDs: {}", response.job_ids.join(", "));
    }
    Ok(())
}

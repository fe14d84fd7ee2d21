// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `betterci`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "betterci",
    version,
    about = "Run CI jobs locally as a dependency graph, with content-addressed caching.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BETTERCI_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the workflow's jobs.
    Run(RunArgs),
    /// Validate the workflow and print its stages without running anything.
    Plan(PlanArgs),
    /// Poll a job queue and execute leased jobs.
    Agent(AgentArgs),
    /// Submit the workflow to a job queue.
    Submit(SubmitArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to the workflow file (TOML).
    #[arg(long, value_name = "PATH", default_value = "betterci.toml")]
    pub workflow: PathBuf,

    /// Maximum number of jobs running at once.
    ///
    /// Overrides `[config].workers`; defaults to host parallelism minus one.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Cache directory, relative to the repository root.
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Keep dispatching independent jobs after a failure.
    #[arg(long)]
    pub no_fail_fast: bool,

    /// Only run jobs whose `paths` match files changed in git.
    #[arg(long)]
    pub git_diff: bool,

    /// Base ref for `--git-diff` on a clean work tree.
    #[arg(long, value_name = "REF", default_value = "origin/main")]
    pub compare_ref: String,

    /// Only run this job and what it needs. Repeatable.
    #[arg(long = "job", value_name = "NAME")]
    pub jobs: Vec<String>,

    /// Repository root that steps and cache paths resolve against.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub repo_root: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    /// Path to the workflow file (TOML).
    #[arg(long, value_name = "PATH", default_value = "betterci.toml")]
    pub workflow: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct AgentArgs {
    /// Queue API base URL, e.g. `http://localhost:8000`.
    #[arg(long, value_name = "URL")]
    pub api: String,

    /// Agent identifier; defaults to the host name.
    #[arg(long, value_name = "ID")]
    pub agent_id: Option<String>,

    /// Seconds between polls while the queue is empty.
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    pub poll_interval: u64,

    /// Directory repositories are checked out into.
    #[arg(long, value_name = "DIR", default_value = ".betterci/agent_work")]
    pub work_dir: PathBuf,

    /// Cache directory shared by every leased job.
    #[arg(long, value_name = "DIR", default_value = ".betterci/cache")]
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct SubmitArgs {
    /// Queue API base URL.
    #[arg(long, value_name = "URL")]
    pub api: String,

    /// Path to the workflow file (TOML).
    #[arg(long, value_name = "PATH", default_value = "betterci.toml")]
    pub workflow: PathBuf,

    /// Repository URL; defaults to the `origin` remote.
    #[arg(long, value_name = "URL")]
    pub repo: Option<String>,

    /// Git ref to build; defaults to the current branch or HEAD commit.
    #[arg(long = "ref", value_name = "REF")]
    pub git_ref: Option<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse() {
        let args = CliArgs::try_parse_from([
            "betterci",
            "run",
            "--workers",
            "2",
            "--no-fail-fast",
            "--job",
            "unit",
            "--job",
            "lint",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.workers, Some(2));
                assert!(run.no_fail_fast);
                assert_eq!(run.jobs, vec!["unit", "lint"]);
                assert_eq!(run.workflow, PathBuf::from("betterci.toml"));
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn agent_requires_api() {
        assert!(CliArgs::try_parse_from(["betterci", "agent"]).is_err());
        let args =
            CliArgs::try_parse_from(["betterci", "agent", "--api", "http://q", "--poll-interval", "1"])
                .unwrap();
        match args.command {
            Command::Agent(agent) => assert_eq!(agent.poll_interval, 1),
            other => panic!("expected agent, got {other:?}"),
        }
    }

    #[test]
    fn submit_ref_flag() {
        let args = CliArgs::try_parse_from(["betterci", "submit", "--api", "http://q", "--ref", "main"])
            .unwrap();
        match args.command {
            Command::Submit(submit) => assert_eq!(submit.git_ref.as_deref(), Some("main")),
            other => panic!("expected submit, got {other:?}"),
        }
    }
}

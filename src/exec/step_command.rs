// src/exec/step_command.rs

//! Render a [`Step`] into a concrete [`CommandSpec`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::exec::process::CommandSpec;
use crate::model::{Job, Step, StepKind};

/// Mount point of the repository inside docker steps.
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// Host directory a step runs in: its `cwd` resolved against the repo root.
pub fn host_workdir(repo_root: &Path, step: &Step) -> PathBuf {
    match step.cwd.as_deref() {
        None | Some(".") | Some("") => repo_root.to_path_buf(),
        Some(cwd) => repo_root.join(cwd),
    }
}

/// Build the command for `step` of `job`.
///
/// Shell steps run through the platform shell in the step's directory.
/// Lint and test steps exec their tool directly in the step's directory.
/// Docker steps run `docker` from the repo root, with the repository
/// bind-mounted at [`CONTAINER_WORKSPACE`]; the job env is passed into
/// the container along with the step's own `docker_env`.
pub fn render_step(job: &Job, step: &Step, repo_root: &Path) -> CommandSpec {
    let label = format!("{}/{}", job.name, step.name);
    let env = job.env.clone();

    match &step.kind {
        StepKind::Shell => {
            let (program, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
            CommandSpec {
                program: program.to_string(),
                args: vec![flag.to_string(), step.run.clone()],
                cwd: host_workdir(repo_root, step),
                env,
                label,
            }
        }
        StepKind::Docker {
            image,
            volumes,
            env: docker_env,
            user,
        } => {
            let workdir = match step.cwd_or_default().trim_matches('/') {
                "" | "." => CONTAINER_WORKSPACE.to_string(),
                cwd => format!("{CONTAINER_WORKSPACE}/{cwd}"),
            };

            let mut args = vec![
                "run".to_string(),
                "--rm".to_string(),
                "-v".to_string(),
                format!("{}:{CONTAINER_WORKSPACE}", repo_root.display()),
                "-w".to_string(),
                workdir,
            ];
            for volume in volumes {
                args.push("-v".to_string());
                args.push(volume.clone());
            }

            let mut container_env: BTreeMap<&str, &str> = job
                .env
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            container_env.extend(docker_env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            for (k, v) in container_env {
                args.push("-e".to_string());
                args.push(format!("{k}={v}"));
            }

            if let Some(user) = user {
                args.push("--user".to_string());
                args.push(user.clone());
            }
            args.push(image.clone());
            args.push("sh".to_string());
            args.push("-c".to_string());
            args.push(step.run.clone());

            CommandSpec {
                program: "docker".to_string(),
                args,
                cwd: repo_root.to_path_buf(),
                env,
                label,
            }
        }
        StepKind::Lint { .. } | StepKind::Test { .. } => {
            let mut argv = step.kind.direct_argv().unwrap_or_default().into_iter();
            CommandSpec {
                program: argv.next().unwrap_or_default(),
                args: argv.collect(),
                cwd: host_workdir(repo_root, step),
                env,
                label,
            }
        }
    }
}

#![allow(dead_code)]

use betterci::model::{CacheSettings, Job, JobBuilder, Step};

/// Shell step shorthand.
pub fn shell_step(name: &str, run: &str) -> Step {
    Step::shell(name, run)
}

/// Builder pre-filled with `needs`; add steps or settings before `build()`.
pub fn job_builder(name: &str, needs: &[&str]) -> JobBuilder {
    needs
        .iter()
        .fold(Job::builder(name), |builder, dep| builder.needs(*dep))
}

/// A job with one `true` step and the given dependencies.
pub fn job(name: &str, needs: &[&str]) -> Job {
    job_builder(name, needs)
        .step(shell_step("run", "true"))
        .build()
        .expect("fixture job must be valid")
}

/// A job running one shell command.
pub fn shell_job(name: &str, needs: &[&str], run: &str) -> Job {
    job_builder(name, needs)
        .step(shell_step("run", run))
        .build()
        .expect("fixture job must be valid")
}

/// Cache settings storing `dirs`, everything else default.
pub fn cache_dirs(dirs: &[&str]) -> CacheSettings {
    CacheSettings {
        dirs: dirs.iter().map(|d| d.to_string()).collect(),
        ..CacheSettings::default()
    }
}

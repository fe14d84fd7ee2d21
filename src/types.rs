use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Final, user-visible status of one job after a run.
///
/// - `Ok`: every step exited successfully.
/// - `SkippedCache`: the cache restored and `skip_on_hit` was set, so no step
///   ran. Counts as success for dependents.
/// - `Failed`: preflight or a step failed.
/// - `NotRun`: the job was never dispatched (an upstream job failed,
///   fail-fast halted dispatch, or shutdown was requested). No command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "skipped(cache)")]
    SkippedCache,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "not-run")]
    NotRun,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ok => "ok",
            JobStatus::SkippedCache => "skipped(cache)",
            JobStatus::Failed => "failed",
            JobStatus::NotRun => "not-run",
        }
    }

    /// Whether dependents may start after this status.
    pub fn unlocks_dependents(&self) -> bool {
        matches!(self, JobStatus::Ok | JobStatus::SkippedCache)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ok" => Ok(JobStatus::Ok),
            "skipped(cache)" => Ok(JobStatus::SkippedCache),
            "failed" => Ok(JobStatus::Failed),
            "not-run" => Ok(JobStatus::NotRun),
            other => Err(format!(
                "invalid job status: {other} (expected ok, skipped(cache), failed or not-run)"
            )),
        }
    }
}

/// Status reported back to the remote queue when a leased job completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseStatus {
    Ok,
    Failed,
}

impl From<JobStatus> for LeaseStatus {
    fn from(status: JobStatus) -> Self {
        if status.unlocks_dependents() {
            LeaseStatus::Ok
        } else {
            LeaseStatus::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for s in [
            JobStatus::Ok,
            JobStatus::SkippedCache,
            JobStatus::Failed,
            JobStatus::NotRun,
        ] {
            assert_eq!(s.as_str().parse::<JobStatus>(), Ok(s));
        }
    }

    #[test]
    fn not_run_is_distinct_from_failed() {
        assert_ne!(JobStatus::NotRun.to_string(), JobStatus::Failed.to_string());
        assert!(!JobStatus::NotRun.unlocks_dependents());
        assert_eq!(LeaseStatus::from(JobStatus::SkippedCache), LeaseStatus::Ok);
    }
}

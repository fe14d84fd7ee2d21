// src/report.rs

//! Final run results and the per-run status table.

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;

use crate::engine::{JobFailure, JobName};
use crate::types::JobStatus;

/// Final record for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
}

impl JobReport {
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status,
            warnings: Vec::new(),
            failure: None,
        }
    }
}

/// Every job's final status, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub jobs: BTreeMap<JobName, JobReport>,
}

impl RunReport {
    pub fn status_of(&self, job: &str) -> Option<JobStatus> {
        self.jobs.get(job).map(|r| r.status)
    }

    /// Plain `name -> status` view.
    pub fn statuses(&self) -> BTreeMap<JobName, JobStatus> {
        self.jobs
            .iter()
            .map(|(name, report)| (name.clone(), report.status))
            .collect()
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.values().filter(|r| r.status == status).count()
    }

    pub fn any_failed(&self) -> bool {
        self.count(JobStatus::Failed) > 0
    }

    /// 0 when nothing failed, 1 otherwise. `not-run` alone does not fail
    /// the run.
    pub fn exit_code(&self) -> i32 {
        if self.any_failed() { 1 } else { 0 }
    }
}

/// Renders a [`RunReport`] as a status table.
///
/// One printer is constructed per run and handed the report once the run
/// has finished.
#[derive(Debug)]
pub struct ReportPrinter<W: Write> {
    out: W,
}

impl ReportPrinter<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ReportPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn print(&mut self, report: &RunReport) -> io::Result<()> {
        let width = report
            .jobs
            .keys()
            .map(|name| name.chars().count())
            .max()
            .unwrap_or(0)
            .max("JOB".len());

        writeln!(self.out)?;
        writeln!(self.out, "{:<width$}  STATUS", "JOB")?;
        for (name, job) in &report.jobs {
            writeln!(self.out, "{name:<width$}  {}", job.status)?;
            for warning in &job.warnings {
                writeln!(self.out, "{:<width$}    warning: {warning}", "")?;
            }
        }

        let failures: Vec<&JobFailure> = report
            .jobs
            .values()
            .filter_map(|job| job.failure.as_ref())
            .collect();
        for failure in failures {
            writeln!(self.out)?;
            writeln!(self.out, "FAILED {failure}")?;
            for (key, value) in &failure.details {
                writeln!(self.out, "  {key}: {value}")?;
            }
            if let Some(tail) = &failure.output_tail {
                writeln!(self.out, "  output (tail):")?;
                for line in tail.lines() {
                    writeln!(self.out, "    {line}")?;
                }
            }
        }

        writeln!(self.out)?;
        writeln!(
            self.out,
            "{} ok, {} skipped(cache), {} failed, {} not-run",
            report.count(JobStatus::Ok),
            report.count(JobStatus::SkippedCache),
            report.count(JobStatus::Failed),
            report.count(JobStatus::NotRun),
        )?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FailureKind;

    fn sample() -> RunReport {
        let mut report = RunReport::default();
        report.jobs.insert("build".into(), JobReport::with_status(JobStatus::Ok));
        let mut cached = JobReport::with_status(JobStatus::SkippedCache);
        cached.warnings.push("cache save failed: disk full".into());
        report.jobs.insert("deps".into(), cached);
        let mut failed = JobReport::with_status(JobStatus::Failed);
        failed.failure = Some(
            JobFailure::new(FailureKind::StepFailed, "e2e", "exited with code 2")
                .in_step("run")
                .detail("exit_code", 2)
                .with_tail("boom"),
        );
        report.jobs.insert("e2e".into(), failed);
        report.jobs.insert("deploy".into(), JobReport::with_status(JobStatus::NotRun));
        report
    }

    #[test]
    fn exit_code_reflects_failures_only() {
        let mut report = sample();
        assert_eq!(report.exit_code(), 1);
        report.jobs.remove("e2e");
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn printer_renders_table_and_failure_details() {
        let mut printer = ReportPrinter::new(Vec::new());
        printer.print(&sample()).unwrap();
        let text = String::from_utf8(printer.into_inner()).unwrap();

        assert!(text.contains("deploy  not-run"));
        assert!(text.contains("warning: cache save failed"));
        assert!(text.contains("FAILED [step failed] job 'e2e' step 'run': exited with code 2"));
        assert!(text.contains("  exit_code: 2"));
        assert!(text.contains("    boom"));
        assert!(text.contains("1 ok, 1 skipped(cache), 1 failed, 1 not-run"));
    }
}

// src/exec/process.rs

//! Process execution: run one command to completion and keep a bounded
//! tail of its combined output for diagnostics.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Lines kept in an [`OutputTail`].
pub const TAIL_MAX_LINES: usize = 30;
/// Characters kept in an [`OutputTail`].
pub const TAIL_MAX_CHARS: usize = 4000;

/// A fully rendered command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Overrides merged over the ambient environment.
    pub env: BTreeMap<String, String>,
    /// Prefix for streamed output lines, usually `job/step`.
    pub label: String,
}

impl CommandSpec {
    /// Human-readable command line, for logs and failure details.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{}'", part.replace('\'', "'\\''"))
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a process that was spawned and waited for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit status; `-1` when terminated by a signal.
    pub exit_code: i32,
    pub tail: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Ring buffer over the last lines of output, capped by line count and by
/// total characters.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: VecDeque<String>,
    max_lines: usize,
    max_chars: usize,
}

impl Default for OutputTail {
    fn default() -> Self {
        Self::new(TAIL_MAX_LINES, TAIL_MAX_CHARS)
    }
}

impl OutputTail {
    pub fn new(max_lines: usize, max_chars: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(max_lines),
            max_lines,
            max_chars,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    /// Joined tail, truncated from the front to `max_chars`.
    pub fn text(&self) -> String {
        let joined = self.lines.iter().cloned().collect::<Vec<_>>().join("\n");
        let total = joined.chars().count();
        if total <= self.max_chars {
            return joined;
        }
        joined.chars().skip(total - self.max_chars).collect()
    }
}

/// Runs rendered commands. Swappable so the job runner can be tested
/// without spawning processes.
pub trait ProcessRunner: Send + Sync {
    /// Run `spec` to completion.
    ///
    /// `Err` means the process could not be spawned or awaited; a non-zero
    /// exit is an `Ok` with that exit code.
    fn run<'a>(
        &'a self,
        spec: &'a CommandSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessOutput>> + Send + 'a>>;
}

/// Spawns real processes via `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ShellProcessRunner;

impl ProcessRunner for ShellProcessRunner {
    fn run<'a>(
        &'a self,
        spec: &'a CommandSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessOutput>> + Send + 'a>> {
        Box::pin(run_process(spec))
    }
}

async fn run_process(spec: &CommandSpec) -> Result<ProcessOutput> {
    debug!(cmd = %spec.display(), cwd = %spec.cwd.display(), "spawning process");

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.cwd)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning `{}`", spec.display()))?;

    let tail = Arc::new(Mutex::new(OutputTail::default()));
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Drain both pipes so the child never blocks on a full buffer.
    tokio::join!(
        pump_lines(stdout, &spec.label, tail.clone()),
        pump_lines(stderr, &spec.label, tail.clone()),
    );

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for `{}`", spec.display()))?;

    let text = tail.lock().unwrap_or_else(PoisonError::into_inner).text();
    Ok(ProcessOutput {
        exit_code: status.code().unwrap_or(-1),
        tail: text,
    })
}

/// Forward `pipe` line by line until EOF. Bytes are decoded lossily so
/// non-UTF-8 output never stops the drain.
async fn pump_lines<R>(pipe: Option<R>, label: &str, tail: Arc<Mutex<OutputTail>>)
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return;
    };
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                info!("[{label}] {line}");
                tail.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(line);
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(label = %label, error = %err, "stopped reading process output");
                break;
            }
        }
    }
}

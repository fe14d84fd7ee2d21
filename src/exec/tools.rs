// src/exec/tools.rs

//! Tool presence and version probing.
//!
//! Jobs declare the external tools they need (`requires = ["cargo"]`). Before
//! any step runs the job runner checks each one is resolvable on `PATH`, and
//! the cache key mixes in a best-effort version string so that upgrading a
//! toolchain invalidates cached artifacts.

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

/// Flags tried, in order, when asking a tool for its version.
pub const VERSION_FLAGS: &[&str] = &["--version", "-V", "version"];

/// Answers "is this tool installed, and which version is it?".
///
/// Implementations are synchronous; callers on the async side run them
/// through `spawn_blocking`.
pub trait ToolProbe: Send + Sync {
    /// Whether `tool` resolves to an executable.
    fn is_available(&self, tool: &str) -> bool;

    /// Normalised version string, or `None` if no version flag worked.
    fn version(&self, tool: &str) -> Option<String>;
}

/// Install suggestion for a missing tool.
pub fn tool_hint(tool: &str) -> String {
    let hint = match tool {
        "npm" | "node" => "Install Node.js (which ships npm) and make sure it is on PATH.",
        "pytest" => "Install it with `pip install pytest` inside the active environment.",
        "ruff" => "Install it with `pip install ruff` or `pipx install ruff`.",
        "docker" => "Install Docker and make sure the daemon is running.",
        "python3" => "Install Python 3 and make sure `python3` is on PATH.",
        "cargo" => "Install the Rust toolchain via rustup (https://rustup.rs).",
        "git" => "Install git from your package manager.",
        _ => return format!("Install {tool} or fix PATH."),
    };
    hint.to_string()
}

/// Probe backed by the host `PATH` and real process spawns.
///
/// Results are memoised for the lifetime of the probe, so a run asks each
/// tool for its version at most once.
#[derive(Debug, Default)]
pub struct SystemToolProbe {
    versions: Mutex<HashMap<String, Option<String>>>,
    locations: Mutex<HashMap<String, Option<PathBuf>>>,
}

impl SystemToolProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `tool` to an executable path (memoised).
    pub fn which(&self, tool: &str) -> Option<PathBuf> {
        let mut cache = self
            .locations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        cache
            .entry(tool.to_string())
            .or_insert_with(|| find_executable(tool))
            .clone()
    }
}

impl ToolProbe for SystemToolProbe {
    fn is_available(&self, tool: &str) -> bool {
        self.which(tool).is_some()
    }

    fn version(&self, tool: &str) -> Option<String> {
        if let Some(hit) = self
            .versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool)
        {
            return hit.clone();
        }

        let version = self.which(tool).and_then(|path| probe_version(&path));
        debug!(tool, version = ?version, "probed tool version");

        self.versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tool.to_string(), version.clone());
        version
    }
}

/// Fixed answers, for tests and for hosts where probing is undesirable.
#[derive(Debug, Clone, Default)]
pub struct StaticToolProbe {
    versions: BTreeMap<String, Option<String>>,
}

impl StaticToolProbe {
    /// Every listed tool is available with the given version.
    pub fn new<I, K, V>(tools: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            versions: tools
                .into_iter()
                .map(|(k, v)| (k.into(), Some(v.into())))
                .collect(),
        }
    }

    /// Mark `tool` as available without a detectable version.
    pub fn with_unversioned(mut self, tool: impl Into<String>) -> Self {
        self.versions.insert(tool.into(), None);
        self
    }
}

impl ToolProbe for StaticToolProbe {
    fn is_available(&self, tool: &str) -> bool {
        self.versions.contains_key(tool)
    }

    fn version(&self, tool: &str) -> Option<String> {
        self.versions.get(tool).cloned().flatten()
    }
}

fn find_executable(tool: &str) -> Option<PathBuf> {
    let direct = Path::new(tool);
    if direct.components().count() > 1 {
        return is_executable(direct).then(|| direct.to_path_buf());
    }

    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

fn probe_version(path: &Path) -> Option<String> {
    for flag in VERSION_FLAGS {
        let output = match Command::new(path)
            .arg(flag)
            .stdin(Stdio::null())
            .output()
        {
            Ok(output) => output,
            Err(_) => continue,
        };
        if !output.status.success() {
            continue;
        }
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if text.trim().is_empty() {
            text = String::from_utf8_lossy(&output.stderr).into_owned();
        }
        let normalised = normalise_version(&text);
        if !normalised.is_empty() {
            return Some(normalised);
        }
    }
    None
}

/// Collapse all whitespace runs (including newlines) to single spaces.
pub fn normalise_version(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_cover_known_tools_and_fall_back() {
        assert!(tool_hint("cargo").contains("rustup"));
        assert_eq!(tool_hint("frobnicate"), "Install frobnicate or fix PATH.");
    }

    #[test]
    fn version_output_is_normalised() {
        assert_eq!(
            normalise_version("  Python 3.12.1\n\n(main, build)  "),
            "Python 3.12.1 (main, build)"
        );
    }

    #[test]
    fn static_probe_reports_configured_tools() {
        let probe = StaticToolProbe::new([("git", "git version 2.44")]).with_unversioned("make");
        assert!(probe.is_available("git"));
        assert!(probe.is_available("make"));
        assert!(!probe.is_available("docker"));
        assert_eq!(probe.version("git").as_deref(), Some("git version 2.44"));
        assert_eq!(probe.version("make"), None);
    }

    #[cfg(unix)]
    #[test]
    fn system_probe_finds_sh_and_misses_nonsense() {
        let probe = SystemToolProbe::new();
        assert!(probe.is_available("sh"));
        assert!(!probe.is_available("definitely-not-a-real-tool-xyz"));
        assert_eq!(probe.version("definitely-not-a-real-tool-xyz"), None);
    }
}

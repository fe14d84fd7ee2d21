// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{RawWorkflowFile, Workflow};
use crate::errors::{BetterciError, Result};

/// Load a workflow file from a given path and return the raw
/// `RawWorkflowFile`.
///
/// This only performs TOML deserialization; it does **not** perform
/// semantic validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkflowFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        BetterciError::ConfigError(format!("cannot read workflow {}: {e}", path.display()))
    })?;

    let workflow: RawWorkflowFile = toml::from_str(&contents)?;

    Ok(workflow)
}

/// Load a workflow file and convert it into a checked [`Workflow`].
///
/// This is the entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (`serde` defaults plus `[defaults]`).
/// - Checks per-job invariants (non-empty steps, docker images, retention).
///
/// Dependency references and cycles are checked by the graph builder.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Workflow> {
    let raw = load_from_path(&path)?;
    Workflow::try_from(raw)
}

/// Default workflow path: `betterci.toml` in the current directory.
pub fn default_workflow_path() -> PathBuf {
    PathBuf::from("betterci.toml")
}

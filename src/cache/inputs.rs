// src/cache/inputs.rs

//! Resolve a job's declared input patterns into a sorted list of file
//! fingerprints.
//!
//! Patterns are interpreted relative to the repository root:
//!
//! - an existing file path (`"Cargo.toml"`) is taken as-is,
//! - an existing directory (`"src/"`) is expanded recursively,
//! - anything else containing glob metacharacters (`"tests/**/*.py"`) is
//!   matched against every file under the root.
//!
//! Patterns that resolve to nothing, and files that cannot be read, are
//! recorded in [`ResolvedInputs::missing`] rather than skipped, so they still
//! participate in the cache key.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::hash::compute_file_hash;
use crate::fs::{walk_files, FileSystem};

/// Excludes applied to every job: version-control metadata, local cache
/// state, bytecode caches and OS artifacts.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git/**",
    ".betterci/cache/**",
    ".betterci/agent_work/**",
    "**/__pycache__/**",
    "**/*.pyc",
    "**/.DS_Store",
];

/// Fingerprint of one resolved input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    pub digest: String,
    pub size: u64,
}

/// Result of resolving a job's input patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedInputs {
    /// Sorted by `path`.
    pub files: Vec<FileFingerprint>,
    /// Sorted, de-duplicated.
    pub missing: Vec<String>,
}

/// Compiled default + job-declared exclude globs.
#[derive(Clone)]
pub struct ExcludeSet {
    patterns: Vec<String>,
    set: GlobSet,
}

impl fmt::Debug for ExcludeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExcludeSet")
            .field("patterns", &self.patterns)
            .finish_non_exhaustive()
    }
}

impl ExcludeSet {
    /// Default excludes followed by `extra`.
    pub fn with_defaults(extra: &[String]) -> Result<Self> {
        let patterns: Vec<String> = DEFAULT_EXCLUDES
            .iter()
            .map(|s| s.to_string())
            .chain(extra.iter().cloned())
            .collect();
        let set = build_globset(&patterns).context("building exclude globset")?;
        Ok(Self { patterns, set })
    }

    /// All patterns, in declaration order.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether a root-relative, `/`-separated path is excluded.
    pub fn is_excluded(&self, rel_path: &str) -> bool {
        self.set.is_match(rel_path)
    }
}

/// Build a GlobSet from simple string patterns.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Convert `path` into a `/`-separated string relative to `root`.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Resolve `patterns` against `root` and fingerprint every matching file.
pub fn resolve_inputs(
    fs: &dyn FileSystem,
    root: &Path,
    patterns: &[String],
    excludes: &ExcludeSet,
) -> Result<ResolvedInputs> {
    // Keyed by relative path: de-dupes overlapping patterns and sorts.
    let mut resolved: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut missing: Vec<String> = Vec::new();
    let mut all_files: Option<Vec<PathBuf>> = None;

    for raw in patterns {
        let pattern = raw.trim();
        if pattern.is_empty() {
            continue;
        }

        let direct = root.join(pattern.trim_end_matches('/'));
        let mut hits: Vec<PathBuf> = Vec::new();

        if fs.is_file(&direct) {
            hits.push(direct);
        } else if fs.is_dir(&direct) {
            hits.extend(walk_files(fs, &direct)?);
        } else if is_glob(pattern) {
            let glob = Glob::new(pattern)
                .with_context(|| format!("invalid input pattern: {pattern}"))?
                .compile_matcher();
            if all_files.is_none() {
                all_files = Some(walk_files(fs, root)?);
            }
            for path in all_files.iter().flatten() {
                if let Some(rel) = relative_str(root, path) {
                    if glob.is_match(&rel) {
                        hits.push(path.clone());
                    }
                }
            }
        }

        if hits.is_empty() {
            debug!(pattern = %pattern, "input pattern matched no files");
            missing.push(pattern.to_string());
            continue;
        }

        for path in hits {
            if let Some(rel) = relative_str(root, &path) {
                resolved.insert(rel, path);
            }
        }
    }

    let mut files = Vec::with_capacity(resolved.len());
    for (rel, path) in resolved {
        if excludes.is_excluded(&rel) {
            continue;
        }
        let fingerprint = compute_file_hash(fs, &path)
            .and_then(|digest| Ok((digest, fs.file_len(&path)?)));
        match fingerprint {
            Ok((digest, size)) => files.push(FileFingerprint {
                path: rel,
                digest,
                size,
            }),
            Err(err) => {
                debug!(path = %rel, error = %err, "input file unreadable; recording as missing");
                missing.push(rel);
            }
        }
    }

    missing.sort();
    missing.dedup();

    Ok(ResolvedInputs { files, missing })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn sample_fs() -> MockFileSystem {
        let fs = MockFileSystem::new();
        fs.add_file("./src/main.rs", b"fn main() {}".to_vec());
        fs.add_file("./src/lib.rs", b"pub fn lib() {}".to_vec());
        fs.add_file("./src/__pycache__/x.pyc", b"junk".to_vec());
        fs.add_file("./README.md", b"# Readme".to_vec());
        fs.add_file("./.git/HEAD", b"ref: refs/heads/main".to_vec());
        fs
    }

    fn paths(inputs: &ResolvedInputs) -> Vec<&str> {
        inputs.files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn directory_and_glob_expansion_are_sorted_and_excluded() -> Result<()> {
        let fs = sample_fs();
        let excludes = ExcludeSet::with_defaults(&[])?;

        let inputs = resolve_inputs(
            &fs,
            Path::new("."),
            &["src/".to_string(), "*.md".to_string()],
            &excludes,
        )?;

        assert_eq!(paths(&inputs), vec!["README.md", "src/lib.rs", "src/main.rs"]);
        assert!(inputs.missing.is_empty());
        assert_eq!(inputs.files[2].size, 12);
        Ok(())
    }

    #[test]
    fn unmatched_patterns_are_recorded_as_missing() -> Result<()> {
        let fs = sample_fs();
        let excludes = ExcludeSet::with_defaults(&[])?;

        let inputs = resolve_inputs(
            &fs,
            Path::new("."),
            &["docs/**".to_string(), "nope.txt".to_string(), "README.md".to_string()],
            &excludes,
        )?;

        assert_eq!(paths(&inputs), vec!["README.md"]);
        assert_eq!(inputs.missing, vec!["docs/**", "nope.txt"]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlink_back_to_the_root_is_not_expanded() -> Result<()> {
        use crate::fs::RealFileSystem;

        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("src"))?;
        std::fs::write(dir.path().join("src/a.txt"), "a")?;
        std::os::unix::fs::symlink("..", dir.path().join("src/up"))?;
        let excludes = ExcludeSet::with_defaults(&[])?;

        let inputs = resolve_inputs(&RealFileSystem, dir.path(), &["src/".to_string()], &excludes)?;

        assert_eq!(paths(&inputs), vec!["src/a.txt"]);
        Ok(())
    }

    #[test]
    fn job_excludes_extend_defaults() -> Result<()> {
        let fs = sample_fs();
        let excludes = ExcludeSet::with_defaults(&["src/lib.rs".to_string()])?;

        let inputs = resolve_inputs(&fs, Path::new("."), &["**".to_string()], &excludes)?;

        assert_eq!(paths(&inputs), vec!["README.md", "src/main.rs"]);
        assert!(excludes.patterns().iter().any(|p| p == ".git/**"));
        Ok(())
    }
}

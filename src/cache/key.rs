// src/cache/key.rs

//! Deterministic cache key derivation.
//!
//! The key is the blake3 digest of a canonical JSON serialization of
//! [`KeyPayload`]. Canonical means: every map is a `BTreeMap` (or goes
//! through `serde_json::Value`, whose object type is sorted), compact
//! separators, no whitespace. Semantically identical payloads therefore
//! always serialize to byte-identical strings, which is what makes cache
//! hits reproducible across hosts and scheduling orders.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::hash::hash_str;
use crate::cache::inputs::{resolve_inputs, ExcludeSet, ResolvedInputs};
use crate::exec::tools::ToolProbe;
use crate::fs::FileSystem;
use crate::model::{Job, Step, StepKind};

/// Bump when the payload layout changes; invalidates every existing key.
pub const KEY_FORMAT_VERSION: u32 = 1;

/// Hex-encoded cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Container settings of a docker step, as they participate in the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerFingerprint {
    pub image: String,
    pub volumes: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub user: Option<String>,
}

/// Canonical form of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFingerprint {
    pub name: String,
    pub run: String,
    pub cwd: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerFingerprint>,
    /// Exact argument vector of lint and test steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argv: Option<Vec<String>>,
}

impl From<&Step> for StepFingerprint {
    fn from(step: &Step) -> Self {
        let docker = match &step.kind {
            StepKind::Shell | StepKind::Lint { .. } | StepKind::Test { .. } => None,
            StepKind::Docker {
                image,
                volumes,
                env,
                user,
            } => Some(DockerFingerprint {
                image: image.clone(),
                volumes: volumes.clone(),
                env: env.clone(),
                user: user.clone(),
            }),
        };
        Self {
            name: step.name.clone(),
            run: step.run.clone(),
            cwd: step.cwd_or_default().to_string(),
            kind: step.kind.as_str().to_string(),
            docker,
            argv: step.kind.direct_argv(),
        }
    }
}

/// Everything that determines a job's cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPayload {
    pub v: u32,
    pub job: String,
    pub steps: Vec<StepFingerprint>,
    pub env: BTreeMap<String, String>,
    /// Sorted, de-duplicated.
    pub requires: Vec<String>,
    pub tool_versions: BTreeMap<String, Option<String>>,
    pub inputs: ResolvedInputs,
    pub excludes: Vec<String>,
    pub cache_key_extra: BTreeMap<String, String>,
}

/// Full explanation of a key, persisted next to each artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub key: CacheKey,
    pub payload: KeyPayload,
    pub generated_at_unix: i64,
}

/// Serialize with sorted keys and compact separators.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value).context("converting payload to JSON value")?;
    serde_json::to_string(&value).context("serializing canonical JSON")
}

/// Build the key payload for `job` from its definition and the current
/// contents of its inputs under `repo_root`.
///
/// `extra_excludes` are applied after the defaults and the job's own
/// excludes, and are recorded in the payload like them.
pub fn build_payload(
    fs: &dyn FileSystem,
    repo_root: &Path,
    job: &Job,
    tools: &dyn ToolProbe,
    extra_excludes: &[String],
) -> Result<KeyPayload> {
    let patterns: Vec<String> = job
        .cache
        .exclude
        .iter()
        .chain(extra_excludes)
        .cloned()
        .collect();
    let excludes = ExcludeSet::with_defaults(&patterns)?;

    let mut requires = job.required_tools();
    requires.sort();
    requires.dedup();

    let tool_versions = requires
        .iter()
        .map(|tool| {
            let version = match job.cache.tool_versions.get(tool) {
                Some(pinned) => Some(pinned.clone()),
                None => tools.version(tool),
            };
            (tool.clone(), version)
        })
        .collect();

    let inputs = resolve_inputs(fs, repo_root, &job.inputs, &excludes)
        .with_context(|| format!("resolving inputs of job '{}'", job.name))?;

    Ok(KeyPayload {
        v: KEY_FORMAT_VERSION,
        job: job.name.clone(),
        steps: job.steps().iter().map(StepFingerprint::from).collect(),
        env: job.env.clone(),
        requires,
        tool_versions,
        inputs,
        excludes: excludes.patterns().to_vec(),
        cache_key_extra: job.cache.key_extra.clone(),
    })
}

/// Hash a payload into its key.
pub fn key_for_payload(payload: &KeyPayload) -> Result<CacheKey> {
    Ok(CacheKey(hash_str(&canonical_json(payload)?)))
}

/// Compute `(key, manifest)` for `job`.
pub fn compute_cache_key(
    fs: &dyn FileSystem,
    repo_root: &Path,
    job: &Job,
    tools: &dyn ToolProbe,
    extra_excludes: &[String],
) -> Result<(CacheKey, Manifest)> {
    let payload = build_payload(fs, repo_root, job, tools, extra_excludes)?;
    let key = key_for_payload(&payload)?;
    let manifest = Manifest {
        key: key.clone(),
        payload,
        generated_at_unix: chrono::Utc::now().timestamp(),
    };
    Ok((key, manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::tools::StaticToolProbe;
    use crate::fs::mock::MockFileSystem;

    fn sample_fs() -> MockFileSystem {
        let fs = MockFileSystem::new();
        fs.add_file("./src/a.py", b"print('a')".to_vec());
        fs.add_file("./src/b.py", b"print('b')".to_vec());
        fs.add_file("./pyproject.toml", b"[project]".to_vec());
        fs
    }

    fn job_with(inputs: &[&str], env: &[(&str, &str)]) -> Job {
        let mut builder = Job::builder("unit")
            .requires("python3")
            .step(Step::shell("test", "pytest -q").in_dir("src"));
        for i in inputs {
            builder = builder.input(*i);
        }
        for (k, v) in env {
            builder = builder.env(*k, *v);
        }
        builder.build().unwrap()
    }

    fn key(fs: &MockFileSystem, job: &Job) -> CacheKey {
        let tools = StaticToolProbe::new([("python3", "Python 3.12.1")]);
        compute_cache_key(fs, Path::new("."), job, &tools, &[]).unwrap().0
    }

    #[test]
    fn key_is_stable_for_unchanged_inputs() {
        let fs = sample_fs();
        let job = job_with(&["src/**", "pyproject.toml"], &[("A", "1")]);
        assert_eq!(key(&fs, &job), key(&fs, &job));
    }

    #[test]
    fn touching_an_input_byte_changes_the_key() {
        let fs = sample_fs();
        let job = job_with(&["src/**"], &[]);
        let before = key(&fs, &job);
        fs.add_file("./src/b.py", b"print('B')".to_vec());
        assert_ne!(before, key(&fs, &job));
    }

    #[test]
    fn env_and_input_order_do_not_matter() {
        let fs = sample_fs();
        let a = job_with(&["src/**", "pyproject.toml"], &[("A", "1"), ("B", "2")]);
        let b = job_with(&["pyproject.toml", "src/**"], &[("B", "2"), ("A", "1")]);
        assert_eq!(key(&fs, &a), key(&fs, &b));
    }

    #[test]
    fn tool_version_and_salt_participate() {
        let fs = sample_fs();
        let job = job_with(&["src/**"], &[]);
        let tools_old = StaticToolProbe::new([("python3", "Python 3.11.0")]);
        let tools_new = StaticToolProbe::new([("python3", "Python 3.12.1")]);
        let (k_old, _) = compute_cache_key(&fs, Path::new("."), &job, &tools_old, &[]).unwrap();
        let (k_new, manifest) = compute_cache_key(&fs, Path::new("."), &job, &tools_new, &[]).unwrap();
        assert_ne!(k_old, k_new);
        assert_eq!(
            manifest.payload.tool_versions.get("python3"),
            Some(&Some("Python 3.12.1".to_string()))
        );

        let mut salted = job.clone();
        salted
            .cache
            .key_extra
            .insert("toolchain".to_string(), "nightly".to_string());
        assert_ne!(key(&fs, &job), key(&fs, &salted));
    }

    #[test]
    fn pinned_tool_versions_bypass_probe() {
        let fs = sample_fs();
        let mut job = job_with(&[], &[]);
        job.cache
            .tool_versions
            .insert("python3".to_string(), "pinned".to_string());
        let tools = StaticToolProbe::default();
        let (_, manifest) = compute_cache_key(&fs, Path::new("."), &job, &tools, &[]).unwrap();
        assert_eq!(
            manifest.payload.tool_versions.get("python3"),
            Some(&Some("pinned".to_string()))
        );
    }

    #[test]
    fn extra_excludes_hide_files_from_the_key() {
        let fs = sample_fs();
        let job = job_with(&["**"], &[]);
        let tools = StaticToolProbe::new([("python3", "Python 3.12.1")]);
        let extra = vec!["ci-cache/**".to_string()];

        let (before, _) = compute_cache_key(&fs, Path::new("."), &job, &tools, &extra).unwrap();
        fs.add_file("./ci-cache/unit/abc.tar.gz", b"archive".to_vec());
        let (after, manifest) =
            compute_cache_key(&fs, Path::new("."), &job, &tools, &extra).unwrap();

        assert_eq!(before, after);
        assert!(manifest.payload.excludes.contains(&"ci-cache/**".to_string()));
    }

    #[test]
    fn lint_arguments_participate_in_the_key() {
        let fs = sample_fs();
        let lint = |args: &[&str]| {
            Job::builder("unit")
                .step(Step::direct(
                    "ruff",
                    StepKind::Lint {
                        tool: "ruff".to_string(),
                        args: args.iter().map(|a| a.to_string()).collect(),
                        files: vec![],
                    },
                ))
                .build()
                .unwrap()
        };
        let tools = StaticToolProbe::new([("ruff", "ruff 0.5.0")]);
        let (spaced, manifest) =
            compute_cache_key(&fs, Path::new("."), &lint(&["a b"]), &tools, &[]).unwrap();
        let (split, _) =
            compute_cache_key(&fs, Path::new("."), &lint(&["a", "b"]), &tools, &[]).unwrap();
        assert_ne!(spaced, split);
        assert_eq!(manifest.payload.steps[0].kind, "lint");
        assert_eq!(
            manifest.payload.steps[0].argv.as_deref(),
            Some(&["ruff".to_string(), "a b".to_string(), ".".to_string()][..])
        );
    }

    #[test]
    fn canonical_json_sorts_keys_without_whitespace() {
        let mut map = BTreeMap::new();
        map.insert("b", 1);
        map.insert("a", 2);
        let json = canonical_json(&map).unwrap();
        assert_eq!(json, r#"{"a":2,"b":1}"#);
    }
}

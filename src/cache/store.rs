// src/cache/store.rs

//! On-disk artifact store: restore, atomic save and retention pruning.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/<job>/<key>.tar.gz          gzip'd tar of the job's cache dirs
//! <root>/<job>/<key>.manifest.json   the key payload, pretty-printed
//! <root>/<job>/<key>.tar.gz.tmp      only while a save is in progress
//! ```
//!
//! Each archive also embeds its manifest under
//! `.betterci_cache_manifest/<job>/<key>.manifest.json` so an artifact copied
//! elsewhere still explains itself. Restore never extracts that entry.
//!
//! All operations are blocking; async callers wrap them in `spawn_blocking`.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info, warn};

use crate::cache::inputs::{relative_str, ExcludeSet, DEFAULT_EXCLUDES};
use crate::cache::key::{compute_cache_key, CacheKey, Manifest};
use crate::exec::tools::ToolProbe;
use crate::fs::{walk_files, RealFileSystem};
use crate::model::Job;

const ARTIFACT_SUFFIX: &str = ".tar.gz";
const MANIFEST_SUFFIX: &str = ".manifest.json";
const TMP_SUFFIX: &str = ".tmp";
const EMBEDDED_MANIFEST_DIR: &str = ".betterci_cache_manifest";

/// Store root used when neither the CLI nor the workflow names one,
/// relative to the repository root.
pub const DEFAULT_CACHE_DIR: &str = ".betterci/cache";

/// Outcome of [`CacheStore::restore`].
#[derive(Debug, Clone)]
pub struct CacheRestore {
    pub hit: bool,
    pub key: CacheKey,
    /// Stored manifest on a hit, freshly computed one on a miss.
    pub manifest: Manifest,
    /// Why the restore missed, when it did.
    pub reason: Option<String>,
}

/// Outcome of [`CacheStore::save`].
#[derive(Debug, Clone)]
pub struct CacheSave {
    pub key: CacheKey,
    pub manifest: Manifest,
    /// Final artifact path, or `None` when saving was a no-op.
    pub artifact: Option<PathBuf>,
}

/// Content-addressed artifact store rooted at one directory.
///
/// Safe to share between concurrently running jobs: every job name writes
/// to its own subdirectory and artifacts appear only via rename.
#[derive(Clone)]
pub struct CacheStore {
    root: PathBuf,
    tools: Arc<dyn ToolProbe>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Directory name used for a job inside the store.
pub fn job_dir_name(job_name: &str) -> String {
    job_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>, tools: Arc<dyn ToolProbe>) -> Self {
        Self {
            root: root.into(),
            tools,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, job_name: &str) -> PathBuf {
        self.root.join(job_dir_name(job_name))
    }

    pub fn artifact_path(&self, job_name: &str, key: &CacheKey) -> PathBuf {
        self.job_dir(job_name)
            .join(format!("{key}{ARTIFACT_SUFFIX}"))
    }

    pub fn manifest_path(&self, job_name: &str, key: &CacheKey) -> PathBuf {
        self.job_dir(job_name)
            .join(format!("{key}{MANIFEST_SUFFIX}"))
    }

    /// Compute the current key of `job` against `repo_root`.
    pub fn compute_key(&self, job: &Job, repo_root: &Path) -> Result<(CacheKey, Manifest)> {
        let own = self.own_excludes(repo_root);
        compute_cache_key(&RealFileSystem, repo_root, job, self.tools.as_ref(), &own)
    }

    /// Exclude glob for the store's own directory when it lives inside
    /// `repo_root`, so saved artifacts never feed back into keys or archives.
    /// Empty when the store is outside the repository or already covered by
    /// [`DEFAULT_EXCLUDES`].
    pub fn own_excludes(&self, repo_root: &Path) -> Vec<String> {
        let rel = relative_str(repo_root, &self.root).or_else(|| {
            let repo = repo_root.canonicalize().ok()?;
            let root = self
                .root
                .canonicalize()
                .or_else(|_| std::path::absolute(&self.root))
                .ok()?;
            relative_str(&repo, &root)
        });
        let Some(rel) = rel else {
            return Vec::new();
        };
        let rel = rel.trim_matches('/');
        if rel.is_empty() {
            return Vec::new();
        }
        let pattern = format!("{rel}/**");
        if DEFAULT_EXCLUDES.contains(&pattern.as_str()) {
            return Vec::new();
        }
        vec![pattern]
    }

    /// Extract the artifact for the job's current key into `repo_root`.
    ///
    /// Only key computation errors are returned as `Err`; a missing or
    /// unreadable artifact is a miss with a reason.
    pub fn restore(&self, job: &Job, repo_root: &Path) -> Result<CacheRestore> {
        let (key, manifest) = self.compute_key(job, repo_root)?;
        let artifact = self.artifact_path(&job.name, &key);
        let manifest_path = self.manifest_path(&job.name, &key);

        if !artifact.is_file() || !manifest_path.is_file() {
            debug!(job = %job.name, key = %key.short(), "no cached artifact for key");
            return Ok(CacheRestore {
                hit: false,
                key,
                manifest,
                reason: Some("no artifact for key".to_string()),
            });
        }

        if let Err(err) = extract_archive(&artifact, repo_root) {
            warn!(
                job = %job.name,
                key = %key.short(),
                error = %format!("{err:#}"),
                "cache artifact could not be extracted; treating as miss"
            );
            return Ok(CacheRestore {
                hit: false,
                key,
                manifest,
                reason: Some(format!("corrupt archive {}: {err:#}", artifact.display())),
            });
        }

        let stored = match read_manifest(&manifest_path) {
            Ok(stored) => stored,
            Err(err) => {
                debug!(job = %job.name, error = %err, "stored manifest unreadable; using computed one");
                manifest
            }
        };

        info!(job = %job.name, key = %key.short(), "cache hit");
        Ok(CacheRestore {
            hit: true,
            key,
            manifest: stored,
            reason: None,
        })
    }

    /// Archive the job's cache dirs under its key.
    ///
    /// `precomputed` skips key derivation. When caching is disabled or no
    /// dirs are declared this only computes the key.
    pub fn save(
        &self,
        job: &Job,
        repo_root: &Path,
        precomputed: Option<(CacheKey, Manifest)>,
    ) -> Result<CacheSave> {
        let (key, manifest) = match precomputed {
            Some(pair) => pair,
            None => self.compute_key(job, repo_root)?,
        };

        if !job.cache.is_active() {
            debug!(job = %job.name, "caching inactive; save is a no-op");
            return Ok(CacheSave {
                key,
                manifest,
                artifact: None,
            });
        }

        let job_dir = self.job_dir(&job.name);
        fs::create_dir_all(&job_dir)
            .with_context(|| format!("creating cache dir {}", job_dir.display()))?;

        let manifest_json =
            serde_json::to_vec_pretty(&manifest).context("serializing cache manifest")?;

        let artifact = self.artifact_path(&job.name, &key);
        let tmp_artifact = with_suffix(&artifact, TMP_SUFFIX);
        let mut patterns = job.cache.exclude.clone();
        patterns.extend(self.own_excludes(repo_root));
        let excludes = ExcludeSet::with_defaults(&patterns)?;

        let written = write_archive(
            &tmp_artifact,
            repo_root,
            &job.cache.dirs,
            &excludes,
            &embedded_manifest_name(&job.name, &key),
            &manifest_json,
        )
        .and_then(|count| {
            fs::rename(&tmp_artifact, &artifact)
                .with_context(|| format!("moving artifact into place at {}", artifact.display()))?;
            Ok(count)
        });
        let file_count = match written {
            Ok(count) => count,
            Err(err) => {
                let _ = fs::remove_file(&tmp_artifact);
                return Err(err);
            }
        };

        let manifest_path = self.manifest_path(&job.name, &key);
        write_atomically(&manifest_path, &manifest_json)?;

        info!(
            job = %job.name,
            key = %key.short(),
            files = file_count,
            "cache saved"
        );

        Ok(CacheSave {
            key,
            manifest,
            artifact: Some(artifact),
        })
    }

    /// Keep only the `keep` most recently modified artifacts for `job_name`.
    ///
    /// Returns the number of artifact/manifest pairs removed.
    pub fn prune(&self, job_name: &str, keep: usize) -> Result<usize> {
        let job_dir = self.job_dir(job_name);
        if !job_dir.is_dir() {
            return Ok(0);
        }

        let mut artifacts: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&job_dir)
            .with_context(|| format!("listing cache dir {}", job_dir.display()))?
        {
            let path = entry?.path();
            let is_artifact = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(ARTIFACT_SUFFIX));
            if !is_artifact {
                continue;
            }
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .with_context(|| format!("reading mtime of {}", path.display()))?;
            artifacts.push((modified, path));
        }

        // Newest first; name breaks ties so the order is total.
        artifacts.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        let mut removed = 0;
        for (_, artifact) in artifacts.into_iter().skip(keep) {
            let manifest = manifest_for_artifact(&artifact);
            remove_if_present(&artifact)?;
            remove_if_present(&manifest)?;
            debug!(job = job_name, artifact = %artifact.display(), "pruned cache artifact");
            removed += 1;
        }

        if removed > 0 {
            info!(job = job_name, removed, keep, "pruned old cache artifacts");
        }
        Ok(removed)
    }
}

fn embedded_manifest_name(job_name: &str, key: &CacheKey) -> String {
    format!(
        "{EMBEDDED_MANIFEST_DIR}/{}/{key}{MANIFEST_SUFFIX}",
        job_dir_name(job_name)
    )
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

fn manifest_for_artifact(artifact: &Path) -> PathBuf {
    let name = artifact
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let stem = name.strip_suffix(ARTIFACT_SUFFIX).unwrap_or(name);
    artifact.with_file_name(format!("{stem}{MANIFEST_SUFFIX}"))
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = with_suffix(path, TMP_SUFFIX);
    let result = (|| -> Result<()> {
        let mut file =
            File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("writing {}", tmp.display()))?;
        file.sync_all()?;
        fs::rename(&tmp, path).with_context(|| format!("moving {} into place", path.display()))
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn read_manifest(path: &Path) -> Result<Manifest> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

/// Build a gzip'd tar of `dirs` (relative to `repo_root`) at `dest`.
/// Returns the number of files archived.
fn write_archive(
    dest: &Path,
    repo_root: &Path,
    dirs: &[String],
    excludes: &ExcludeSet,
    manifest_name: &str,
    manifest_json: &[u8],
) -> Result<usize> {
    let file = File::create(dest).with_context(|| format!("creating {}", dest.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut count = 0;
    for dir in dirs {
        let source = repo_root.join(dir.trim_end_matches('/'));
        let files = if source.is_file() {
            vec![source]
        } else if source.is_dir() {
            walk_files(&RealFileSystem, &source)?
        } else {
            debug!(path = %source.display(), "cache dir does not exist; skipping");
            continue;
        };

        for path in files {
            let Some(rel) = relative_str(repo_root, &path) else {
                continue;
            };
            if excludes.is_excluded(&rel) {
                continue;
            }
            builder
                .append_path_with_name(&path, &rel)
                .with_context(|| format!("archiving {}", path.display()))?;
            count += 1;
        }
    }

    let mut header = tar::Header::new_gnu();
    header.set_size(manifest_json.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    builder
        .append_data(&mut header, manifest_name, manifest_json)
        .context("embedding manifest in archive")?;

    let encoder = builder.into_inner().context("finishing tar stream")?;
    let file = encoder.finish().context("finishing gzip stream")?;
    file.sync_all()
        .with_context(|| format!("syncing {}", dest.display()))?;
    Ok(count)
}

/// Unpack every entry except the embedded manifest into `repo_root`.
fn extract_archive(artifact: &Path, repo_root: &Path) -> Result<()> {
    let file = File::open(artifact).with_context(|| format!("opening {}", artifact.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_mtime(true);

    for entry in archive.entries().context("reading archive entries")? {
        let mut entry = entry.context("reading archive entry")?;
        let path = entry.path().context("decoding entry path")?.into_owned();
        if path.starts_with(EMBEDDED_MANIFEST_DIR) {
            continue;
        }
        entry
            .unpack_in(repo_root)
            .with_context(|| format!("extracting {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::tools::StaticToolProbe;
    use crate::model::{CacheSettings, Step};

    fn store(root: &Path) -> CacheStore {
        CacheStore::new(root, Arc::new(StaticToolProbe::default()))
    }

    fn cached_job(extra: &str) -> Job {
        let mut cache = CacheSettings {
            dirs: vec!["out".to_string()],
            ..CacheSettings::default()
        };
        cache.key_extra.insert("n".to_string(), extra.to_string());
        Job::builder("build")
            .input("src/**")
            .cache(cache)
            .step(Step::shell("build", "true"))
            .build()
            .unwrap()
    }

    fn repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.c"), "int main;").unwrap();
        fs::create_dir_all(dir.path().join("out/sub")).unwrap();
        fs::write(dir.path().join("out/a.txt"), "alpha").unwrap();
        fs::write(dir.path().join("out/sub/b.bin"), [0u8, 1, 2, 255]).unwrap();
        dir
    }

    #[test]
    fn save_then_restore_round_trips_bytes() -> Result<()> {
        let repo = repo();
        let cache_root = tempfile::tempdir()?;
        let store = store(cache_root.path());
        let job = cached_job("1");

        let miss = store.restore(&job, repo.path())?;
        assert!(!miss.hit);

        let saved = store.save(&job, repo.path(), Some((miss.key.clone(), miss.manifest)))?;
        assert_eq!(saved.key, miss.key);
        assert!(store.artifact_path("build", &saved.key).is_file());
        assert!(store.manifest_path("build", &saved.key).is_file());
        assert!(!with_suffix(&store.artifact_path("build", &saved.key), TMP_SUFFIX).exists());

        fs::remove_dir_all(repo.path().join("out"))?;

        let hit = store.restore(&job, repo.path())?;
        assert!(hit.hit);
        assert_eq!(hit.manifest.key, saved.key);
        assert_eq!(fs::read_to_string(repo.path().join("out/a.txt"))?, "alpha");
        assert_eq!(fs::read(repo.path().join("out/sub/b.bin"))?, vec![0u8, 1, 2, 255]);
        assert!(!repo.path().join(EMBEDDED_MANIFEST_DIR).exists());
        Ok(())
    }

    #[test]
    fn corrupt_archive_is_a_miss_with_reason() -> Result<()> {
        let repo = repo();
        let cache_root = tempfile::tempdir()?;
        let store = store(cache_root.path());
        let job = cached_job("1");

        let saved = store.save(&job, repo.path(), None)?;
        fs::write(store.artifact_path("build", &saved.key), b"not a gzip stream")?;

        let restored = store.restore(&job, repo.path())?;
        assert!(!restored.hit);
        assert!(restored.reason.unwrap_or_default().contains("corrupt archive"));
        Ok(())
    }

    #[test]
    fn disabled_cache_save_is_a_noop_with_key() -> Result<()> {
        let repo = repo();
        let cache_root = tempfile::tempdir()?;
        let store = store(cache_root.path());
        let mut job = cached_job("1");
        job.cache.enabled = false;

        let saved = store.save(&job, repo.path(), None)?;
        assert!(saved.artifact.is_none());
        assert_eq!(saved.key.as_str().len(), 64);
        assert!(!cache_root.path().join("build").exists());
        Ok(())
    }

    #[test]
    fn prune_keeps_newest_pairs() -> Result<()> {
        let repo = repo();
        let cache_root = tempfile::tempdir()?;
        let store = store(cache_root.path());

        let mut keys = Vec::new();
        for i in 0..4 {
            let saved = store.save(&cached_job(&i.to_string()), repo.path(), None)?;
            keys.push(saved.key);
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        assert_eq!(store.prune("build", 2)?, 2);
        for old in &keys[..2] {
            assert!(!store.artifact_path("build", old).exists());
            assert!(!store.manifest_path("build", old).exists());
        }
        for new in &keys[2..] {
            assert!(store.artifact_path("build", new).exists());
            assert!(store.manifest_path("build", new).exists());
        }
        Ok(())
    }

    #[test]
    fn store_inside_the_repo_does_not_change_the_key() -> Result<()> {
        let repo = repo();
        let store = store(&repo.path().join("ci-cache"));
        let mut job = cached_job("1");
        job.inputs = vec!["**".to_string()];

        assert_eq!(store.own_excludes(repo.path()), vec!["ci-cache/**".to_string()]);

        let (before, _) = store.compute_key(&job, repo.path())?;
        let saved = store.save(&job, repo.path(), None)?;
        assert_eq!(saved.key, before);
        let (after, _) = store.compute_key(&job, repo.path())?;
        assert_eq!(after, before);

        let restored = store.restore(&job, repo.path())?;
        assert!(restored.hit);
        Ok(())
    }

    #[test]
    fn store_outside_the_repo_adds_no_excludes() {
        let repo = repo();
        let elsewhere = tempfile::tempdir().unwrap();
        assert!(store(elsewhere.path()).own_excludes(repo.path()).is_empty());
        let default_root = repo.path().join(DEFAULT_CACHE_DIR);
        assert!(store(&default_root).own_excludes(repo.path()).is_empty());
    }

    #[test]
    fn job_names_are_sanitized_for_paths() {
        assert_eq!(job_dir_name("lint/py 3.12"), "lint_py_3.12");
    }
}

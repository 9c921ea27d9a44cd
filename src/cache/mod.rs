//! Content-addressed task cache.
//!
//! Layout under the cache root (default `$HOME/.sykli/cache`):
//!
//! - `meta/<key>.json`: one record per completed task, keyed by the task
//!   fingerprint; created on success, never mutated, deleted by GC.
//! - `blobs/<digest>`: content-addressed output files; the filename is
//!   the SHA-256 of the content, so concurrent writers producing the same
//!   blob race harmlessly and identical outputs across tasks share one
//!   blob on disk.
//!
//! The store recovers from any subset of meta/blob files being missing or
//! corrupted: an unparseable meta record and a record pointing at a
//! vanished blob are both removed on discovery and reported as granular
//! miss reasons.

pub mod fingerprint;

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SykliError;
use crate::graph::Task;

pub use fingerprint::{cache_key, inputs_fingerprint, mounts_fingerprint};

/// One cached output file: the blob holding its bytes plus its mode bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// SHA-256 of the file contents; names the blob.
    pub blob_digest: String,
    /// Unix permission bits to restore.
    pub mode: u32,
}

/// The stored description of one successful task execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    /// The cache key this record is stored under.
    pub key: String,
    /// Task name, used to attribute misses to a specific change.
    pub task_name: String,
    /// The command that produced the outputs.
    pub command: String,
    /// Fingerprint of the matched input files.
    pub inputs_fingerprint: String,
    /// Container image, if any.
    pub container: Option<String>,
    /// The task environment at execution time.
    pub task_env: BTreeMap<String, String>,
    /// Fingerprint of the task's mounts.
    pub mounts_fingerprint: String,
    /// Output files keyed by workdir-relative path.
    pub outputs: BTreeMap<String, OutputRecord>,
    /// Wall-clock duration of the producing execution.
    pub duration_ms: u64,
    /// When the record was written.
    pub cached_at: DateTime<Utc>,
}

/// Why a cache check missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum MissReason {
    /// No record for this task exists at all.
    NoCache,
    /// The command changed since the stored run.
    CommandChanged,
    /// One or more input files changed.
    InputsChanged,
    /// The container image changed.
    ContainerChanged,
    /// The task environment changed.
    EnvChanged,
    /// The mounts changed.
    MountsChanged,
    /// The stored meta record was unparseable and has been removed.
    Corrupted,
    /// One or more referenced blobs are gone; the record has been removed.
    BlobsMissing,
}

/// Outcome of a cache check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    /// The stored record matches; outputs can be restored.
    Hit {
        /// The matching key.
        key: String,
    },
    /// No usable record; the command must run. The key and fingerprint
    /// are carried forward so a successful run stores under them.
    Miss {
        /// The key computed for the current task state.
        key: String,
        /// Why the check missed.
        reason: MissReason,
        /// The pre-execution inputs fingerprint; the store after a
        /// successful run is keyed by it, not by a re-walk (the command
        /// may touch its own inputs).
        inputs_fingerprint: String,
    },
}

impl CacheDecision {
    /// The key computed during the check, hit or miss.
    pub fn key(&self) -> &str {
        match self {
            CacheDecision::Hit { key } => key,
            CacheDecision::Miss { key, .. } => key,
        }
    }
}

/// Counters from a GC pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanReport {
    /// Meta records removed.
    pub meta_removed: usize,
    /// Blobs swept.
    pub blobs_removed: usize,
}

/// Cache statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of meta records.
    pub meta_count: usize,
    /// Number of blobs.
    pub blob_count: usize,
    /// Total blob bytes on disk.
    pub blob_bytes: u64,
    /// Blobs referenced by no meta record.
    pub orphan_blobs: usize,
}

/// The content-addressed store rooted at a cache directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    meta_dir: Utf8PathBuf,
    blobs_dir: Utf8PathBuf,
}

impl CacheStore {
    /// Opens (without creating) a store rooted at `root`.
    pub fn new(root: impl AsRef<Utf8Path>) -> Self {
        let root = root.as_ref();
        Self {
            meta_dir: root.join("meta"),
            blobs_dir: root.join("blobs"),
        }
    }

    /// The default cache root: `$HOME/.sykli/cache`, falling back to a
    /// path relative to the current directory when `HOME` is unset.
    pub fn default_root() -> Utf8PathBuf {
        match std::env::var("HOME") {
            Ok(home) if !home.is_empty() => Utf8PathBuf::from(home).join(".sykli/cache"),
            _ => Utf8PathBuf::from(".sykli/cache"),
        }
    }

    fn meta_path(&self, key: &str) -> Utf8PathBuf {
        self.meta_dir.join(format!("{}.json", key))
    }

    fn blob_path(&self, digest: &str) -> Utf8PathBuf {
        self.blobs_dir.join(digest)
    }

    /// Checks whether the task's current state matches a stored record.
    ///
    /// The lookup cost is dominated by the input-fingerprint walk. When
    /// the key's record is absent, the latest record for the same task
    /// name is compared field-by-field to attribute the miss.
    pub fn check(&self, task: &Task, workdir: &Utf8Path) -> Result<CacheDecision, SykliError> {
        let inputs_fp = fingerprint::inputs_fingerprint(workdir, &task.inputs)?;
        let key = fingerprint::cache_key(task, &inputs_fp);

        let meta_path = self.meta_path(&key);
        if meta_path.exists() {
            let meta = match self.read_meta(&meta_path) {
                Ok(meta) => meta,
                Err(_) => {
                    warn!(key = %key, "removing corrupted cache meta");
                    let _ = fs::remove_file(&meta_path);
                    return Ok(CacheDecision::Miss {
                        key,
                        reason: MissReason::Corrupted,
                        inputs_fingerprint: inputs_fp,
                    });
                }
            };
            for record in meta.outputs.values() {
                if !self.blob_path(&record.blob_digest).exists() {
                    warn!(key = %key, digest = %record.blob_digest, "blob missing, removing cache meta");
                    let _ = fs::remove_file(&meta_path);
                    return Ok(CacheDecision::Miss {
                        key,
                        reason: MissReason::BlobsMissing,
                        inputs_fingerprint: inputs_fp,
                    });
                }
            }
            return Ok(CacheDecision::Hit { key });
        }

        // No record under this key. Diagnose the miss against the
        // latest record for the same task, if one exists.
        let reason = match self.latest_meta_for_task(&task.name) {
            Some(prior) => {
                if prior.command != task.command {
                    MissReason::CommandChanged
                } else if prior.inputs_fingerprint != inputs_fp {
                    MissReason::InputsChanged
                } else if prior.container != task.container {
                    MissReason::ContainerChanged
                } else if prior.task_env != task.env {
                    MissReason::EnvChanged
                } else if prior.mounts_fingerprint != fingerprint::mounts_fingerprint(&task.mounts)
                {
                    MissReason::MountsChanged
                } else {
                    MissReason::NoCache
                }
            }
            None => MissReason::NoCache,
        };
        Ok(CacheDecision::Miss {
            key,
            reason,
            inputs_fingerprint: inputs_fp,
        })
    }

    /// Stores the task's declared outputs under `key` after a successful
    /// execution.
    ///
    /// Directory outputs are walked recursively; each regular file's
    /// bytes land in the blob store only if not already present. Safe
    /// under concurrent writers: blob writes are idempotent
    /// (temp-then-rename of content-addressed files) and meta keys are
    /// unique per fingerprint.
    pub fn store(
        &self,
        task: &Task,
        workdir: &Utf8Path,
        key: &str,
        inputs_fp: &str,
        duration_ms: u64,
    ) -> Result<CacheMeta, SykliError> {
        fs::create_dir_all(&self.meta_dir)
            .map_err(|e| SykliError::io(format!("failed to create {}", self.meta_dir), e))?;
        fs::create_dir_all(&self.blobs_dir)
            .map_err(|e| SykliError::io(format!("failed to create {}", self.blobs_dir), e))?;

        let mut outputs = BTreeMap::new();
        for output_path in task.outputs.values() {
            let abs = workdir.join(output_path);
            if !abs.exists() {
                warn!(task = %task.name, path = %output_path, "declared output missing, not cached");
                continue;
            }
            if abs.is_dir() {
                for entry in walkdir::WalkDir::new(abs.as_std_path()).follow_links(false) {
                    let entry = entry.map_err(|e| {
                        SykliError::io(
                            format!("failed to walk output directory: {}", abs),
                            e.into(),
                        )
                    })?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let Some(file) = Utf8Path::from_path(entry.path()) else {
                        continue;
                    };
                    let rel = file
                        .strip_prefix(workdir)
                        .map(|p| p.to_string())
                        .unwrap_or_else(|_| file.to_string());
                    let record = self.store_file(file)?;
                    outputs.insert(rel, record);
                }
            } else {
                let record = self.store_file(&abs)?;
                outputs.insert(output_path.clone(), record);
            }
        }

        let meta = CacheMeta {
            key: key.to_string(),
            task_name: task.name.clone(),
            command: task.command.clone(),
            inputs_fingerprint: inputs_fp.to_string(),
            container: task.container.clone(),
            task_env: task.env.clone(),
            mounts_fingerprint: fingerprint::mounts_fingerprint(&task.mounts),
            outputs,
            duration_ms,
            cached_at: Utc::now(),
        };

        let json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| SykliError::Schema(format!("failed to serialise cache meta: {}", e)))?;
        self.write_atomic(&self.meta_path(key), &json)?;
        debug!(task = %task.name, key = %key, outputs = meta.outputs.len(), "stored cache entry");
        Ok(meta)
    }

    /// Writes a single file into the blob store, deduplicated by digest.
    fn store_file(&self, path: &Utf8Path) -> Result<OutputRecord, SykliError> {
        let digest = fingerprint::file_digest(path)?;
        let mode = file_mode(path)?;

        let blob = self.blob_path(&digest);
        if !blob.exists() {
            let bytes = fs::read(path)
                .map_err(|e| SykliError::io(format!("failed to read output: {}", path), e))?;
            self.write_atomic(&blob, &bytes)?;
        }
        Ok(OutputRecord {
            blob_digest: digest,
            mode,
        })
    }

    /// Writes bytes to `dest` via a temp file in the same directory, then
    /// renames: readers never observe a partial file, and racing writers
    /// of the same content-addressed name are last-write-wins.
    fn write_atomic(&self, dest: &Utf8Path, bytes: &[u8]) -> Result<(), SykliError> {
        let dir = dest.parent().unwrap_or(Utf8Path::new("."));
        let tmp = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        let mut file = File::create(&tmp)
            .map_err(|e| SykliError::io(format!("failed to create {}", tmp), e))?;
        file.write_all(bytes)
            .map_err(|e| SykliError::io(format!("failed to write {}", tmp), e))?;
        file.sync_all()
            .map_err(|e| SykliError::io(format!("failed to sync {}", tmp), e))?;
        drop(file);
        fs::rename(&tmp, dest)
            .map_err(|e| SykliError::io(format!("failed to rename {} to {}", tmp, dest), e))?;
        Ok(())
    }

    /// Restores every output of the record under `key` into `workdir`,
    /// recreating mode bits and intermediate directories. Restore is
    /// atomic per file (write-to-temp-then-rename). Returns the number of
    /// files restored.
    pub fn restore(&self, key: &str, workdir: &Utf8Path) -> Result<usize, SykliError> {
        let meta = self.read_meta(&self.meta_path(key))?;

        for (rel, record) in &meta.outputs {
            let blob = self.blob_path(&record.blob_digest);
            let dest = workdir.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| SykliError::io(format!("failed to create {}", parent), e))?;
            }

            let dir = dest.parent().unwrap_or(Utf8Path::new("."));
            let tmp = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
            fs::copy(&blob, &tmp).map_err(|e| {
                SykliError::io(format!("failed to restore blob {} to {}", blob, tmp), e)
            })?;
            set_file_mode(&tmp, record.mode)?;
            fs::rename(&tmp, &dest)
                .map_err(|e| SykliError::io(format!("failed to rename {} to {}", tmp, dest), e))?;
        }
        debug!(key = %key, files = meta.outputs.len(), "restored cached outputs");
        Ok(meta.outputs.len())
    }

    fn read_meta(&self, path: &Utf8Path) -> Result<CacheMeta, SykliError> {
        let bytes = fs::read(path)
            .map_err(|e| SykliError::io(format!("failed to read cache meta: {}", path), e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SykliError::Schema(format!("unparseable cache meta {}: {}", path, e)))
    }

    /// The most recent record for a task name, scanning the meta
    /// directory. Unreadable entries are skipped.
    fn latest_meta_for_task(&self, task_name: &str) -> Option<CacheMeta> {
        let entries = fs::read_dir(self.meta_dir.as_std_path()).ok()?;
        let mut latest: Option<CacheMeta> = None;
        for entry in entries.flatten() {
            let Some(path) = Utf8PathBuf::from_path_buf(entry.path()).ok() else {
                continue;
            };
            if path.extension() != Some("json") {
                continue;
            }
            let Ok(meta) = self.read_meta(&path) else {
                continue;
            };
            if meta.task_name != task_name {
                continue;
            }
            match &latest {
                Some(best) if best.cached_at >= meta.cached_at => {}
                _ => latest = Some(meta),
            }
        }
        latest
    }

    /// Removes meta records older than `age_seconds`, then sweeps any
    /// blob no remaining record references.
    pub fn clean_older_than(&self, age_seconds: u64) -> Result<CleanReport, SykliError> {
        let mut report = CleanReport::default();
        if !self.meta_dir.exists() {
            return Ok(report);
        }

        let cutoff = Utc::now() - chrono::Duration::seconds(age_seconds as i64);
        let mut referenced: BTreeSet<String> = BTreeSet::new();

        let entries = fs::read_dir(self.meta_dir.as_std_path())
            .map_err(|e| SykliError::io(format!("failed to read {}", self.meta_dir), e))?;
        for entry in entries.flatten() {
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            match self.read_meta(&path) {
                Ok(meta) if meta.cached_at < cutoff => {
                    fs::remove_file(&path)
                        .map_err(|e| SykliError::io(format!("failed to remove {}", path), e))?;
                    report.meta_removed += 1;
                }
                Ok(meta) => {
                    referenced.extend(meta.outputs.values().map(|r| r.blob_digest.clone()));
                }
                Err(_) => {
                    // Unparseable records reference nothing; drop them.
                    let _ = fs::remove_file(&path);
                    report.meta_removed += 1;
                }
            }
        }

        if self.blobs_dir.exists() {
            let entries = fs::read_dir(self.blobs_dir.as_std_path())
                .map_err(|e| SykliError::io(format!("failed to read {}", self.blobs_dir), e))?;
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if !referenced.contains(name) {
                    let _ = fs::remove_file(entry.path());
                    report.blobs_removed += 1;
                }
            }
        }

        debug!(
            meta_removed = report.meta_removed,
            blobs_removed = report.blobs_removed,
            "cache GC complete"
        );
        Ok(report)
    }

    /// Removes the entire cache: both directories and everything in them.
    pub fn clean(&self) -> Result<(), SykliError> {
        for dir in [&self.meta_dir, &self.blobs_dir] {
            if dir.exists() {
                fs::remove_dir_all(dir)
                    .map_err(|e| SykliError::io(format!("failed to remove {}", dir), e))?;
            }
        }
        Ok(())
    }

    /// Counts records, blobs, bytes and orphans.
    pub fn stats(&self) -> Result<CacheStats, SykliError> {
        let mut stats = CacheStats::default();
        let mut referenced: BTreeSet<String> = BTreeSet::new();

        if self.meta_dir.exists() {
            let entries = fs::read_dir(self.meta_dir.as_std_path())
                .map_err(|e| SykliError::io(format!("failed to read {}", self.meta_dir), e))?;
            for entry in entries.flatten() {
                let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                    continue;
                };
                if let Ok(meta) = self.read_meta(&path) {
                    stats.meta_count += 1;
                    referenced.extend(meta.outputs.values().map(|r| r.blob_digest.clone()));
                }
            }
        }

        if self.blobs_dir.exists() {
            let entries = fs::read_dir(self.blobs_dir.as_std_path())
                .map_err(|e| SykliError::io(format!("failed to read {}", self.blobs_dir), e))?;
            for entry in entries.flatten() {
                stats.blob_count += 1;
                if let Ok(md) = entry.metadata() {
                    stats.blob_bytes += md.len();
                }
                if let Some(name) = entry.file_name().to_str()
                    && !referenced.contains(name)
                {
                    stats.orphan_blobs += 1;
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(unix)]
fn file_mode(path: &Utf8Path) -> Result<u32, SykliError> {
    use std::os::unix::fs::PermissionsExt;
    let md = fs::metadata(path)
        .map_err(|e| SykliError::io(format!("failed to read metadata: {}", path), e))?;
    Ok(md.permissions().mode())
}

#[cfg(unix)]
fn set_file_mode(path: &Utf8Path, mode: u32) -> Result<(), SykliError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| SykliError::io(format!("failed to set mode on {}", path), e))
}

#[cfg(not(unix))]
fn file_mode(_path: &Utf8Path) -> Result<u32, SykliError> {
    Ok(0o644)
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Utf8Path, _mode: u32) -> Result<(), SykliError> {
    Ok(())
}

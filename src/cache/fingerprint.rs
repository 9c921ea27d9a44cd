//! Cache key derivation.
//!
//! The cache key is a pure function of the task's intended work:
//! `(task_name, command, inputs_fingerprint, container, sorted(task_env),
//! sorted(mounts))`, serialised canonically and hashed with SHA-256.
//! Identical inputs always produce identical keys; missing files and
//! globs with no matches are permitted and deterministic.

use std::fs::File;
use std::io::Read;

use camino::Utf8Path;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::SykliError;
use crate::graph::{Mount, MountKind, Task};

/// SHA-256 of a file's contents, hex-encoded, streamed in 64 KiB chunks.
pub fn file_digest(path: &Utf8Path) -> Result<String, SykliError> {
    let mut file = File::open(path)
        .map_err(|e| SykliError::io(format!("failed to open input file: {}", path), e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| SykliError::io(format!("failed to read input file: {}", path), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(hasher.finalize()))
}

/// SHA-256 of a byte slice, hex-encoded.
pub fn bytes_digest(bytes: &[u8]) -> String {
    hex_encode(Sha256::digest(bytes))
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    let bytes = bytes.as_ref();
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet, SykliError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| SykliError::Schema(format!("invalid input glob {:?}: {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SykliError::Schema(format!("failed to build glob set: {}", e)))
}

/// Fingerprint of every file matched by the task's input globs.
///
/// The fingerprint is the SHA-256 of the concatenated
/// `(relative_path, SHA-256(file_contents))` pairs in sorted
/// relative-path order. An empty pattern list or a glob matching nothing
/// hashes the empty sequence, which is stable across runs.
pub fn inputs_fingerprint(workdir: &Utf8Path, patterns: &[String]) -> Result<String, SykliError> {
    if patterns.is_empty() {
        return Ok(bytes_digest(b""));
    }
    let glob_set = build_glob_set(patterns)?;

    let mut matched: Vec<String> = Vec::new();
    for entry in WalkDir::new(workdir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            // A vanished or unreadable entry cannot contribute to the
            // fingerprint; skip it deterministically.
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(workdir.as_std_path()) else {
            continue;
        };
        let Some(rel) = rel.to_str() else {
            continue;
        };
        if glob_set.is_match(rel) {
            matched.push(rel.to_string());
        }
    }
    matched.sort();

    let mut hasher = Sha256::new();
    for rel in &matched {
        let path = workdir.join(rel);
        let digest = match file_digest(&path) {
            Ok(d) => d,
            // Deleted between walk and read; treat as absent.
            Err(SykliError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                continue;
            }
            Err(e) => return Err(e),
        };
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(digest.as_bytes());
        hasher.update(b"\0");
    }
    Ok(hex_encode(hasher.finalize()))
}

/// Canonical key material; field order is fixed and collections are
/// sorted, so serialisation is deterministic.
#[derive(Serialize)]
struct KeyMaterial<'a> {
    task_name: &'a str,
    command: &'a str,
    inputs_fingerprint: &'a str,
    container: Option<&'a str>,
    task_env: Vec<(&'a str, &'a str)>,
    mounts: Vec<(&'a str, &'a str, &'a str)>,
}

fn sorted_mounts(mounts: &[Mount]) -> Vec<(&str, &str, &str)> {
    let mut entries: Vec<(&str, &str, &str)> = mounts
        .iter()
        .map(|m| {
            let kind = match m.kind {
                MountKind::Directory => "directory",
                MountKind::Cache => "cache",
            };
            (m.resource.as_str(), m.path.as_str(), kind)
        })
        .collect();
    entries.sort();
    entries
}

/// Fingerprint of the task's mounts alone, stored in the meta record so a
/// later check can attribute a miss to `mounts_changed`.
pub fn mounts_fingerprint(mounts: &[Mount]) -> String {
    let entries = sorted_mounts(mounts);
    let json = serde_json::to_string(&entries).expect("mount entries serialise");
    bytes_digest(json.as_bytes())
}

/// Derives the cache key for a task given its inputs fingerprint.
pub fn cache_key(task: &Task, inputs_fingerprint: &str) -> String {
    let material = KeyMaterial {
        task_name: &task.name,
        command: &task.command,
        inputs_fingerprint,
        container: task.container.as_deref(),
        // BTreeMap iterates sorted by key.
        task_env: task
            .env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect(),
        mounts: sorted_mounts(&task.mounts),
    };
    let json = serde_json::to_string(&material).expect("key material serialises");
    bytes_digest(json.as_bytes())
}

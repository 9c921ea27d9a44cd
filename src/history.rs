//! Run-history writer.
//!
//! Every run writes `<project>/.sykli/runs/<iso8601-ts>.json` plus two
//! symlinks: `latest.json` (always updated) and `last_good.json` (only
//! on success). Symlink updates are atomic (a symlink is created under
//! a temp name and renamed into place), so a reader following either
//! link never observes a dangling or missing entry, even mid-update.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SykliError;
use crate::orchestrator::{RunOutcome, TaskResult};
use crate::server::{Run, RunStatus};

/// The persisted shape of one run.
#[derive(Debug, Serialize)]
pub struct HistoryRecord<'a> {
    /// Run id.
    pub run_id: &'a str,
    /// Project path the run executed in.
    pub project: &'a str,
    /// Terminal status.
    pub status: RunStatus,
    /// When the run was registered.
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// When the run terminated.
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Per-task records.
    pub results: &'a [TaskResult],
    /// First failure, when the run aborted.
    pub error: Option<&'a str>,
}

/// Writes the run record and updates the symlinks. Returns the record
/// path.
pub fn write_run(
    project: &Utf8Path,
    run: &Run,
    outcome: &RunOutcome,
) -> Result<Utf8PathBuf, SykliError> {
    let dir = project.join(".sykli/runs");
    fs::create_dir_all(&dir).map_err(|e| SykliError::io(format!("failed to create {}", dir), e))?;

    let record = HistoryRecord {
        run_id: &run.id,
        project: project.as_str(),
        status: run.status,
        started_at: run.started_at,
        finished_at: run.finished_at,
        results: &outcome.results,
        error: outcome.error.as_deref(),
    };
    let json = serde_json::to_vec_pretty(&record)
        .map_err(|e| SykliError::Schema(format!("failed to serialise run record: {}", e)))?;

    let filename = format!("{}.json", run.started_at.format("%Y-%m-%dT%H-%M-%S%.3fZ"));
    let path = dir.join(&filename);
    write_file_atomic(&path, &json)?;

    replace_symlink(&dir, &filename, "latest.json")?;
    if run.status == RunStatus::Succeeded {
        replace_symlink(&dir, &filename, "last_good.json")?;
    }

    debug!(path = %path, "run history written");
    Ok(path)
}

fn write_file_atomic(dest: &Utf8Path, bytes: &[u8]) -> Result<(), SykliError> {
    let dir = dest.parent().unwrap_or(Utf8Path::new("."));
    let tmp = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
    fs::write(&tmp, bytes).map_err(|e| SykliError::io(format!("failed to write {}", tmp), e))?;
    fs::rename(&tmp, dest)
        .map_err(|e| SykliError::io(format!("failed to rename {} to {}", tmp, dest), e))?;
    Ok(())
}

/// Atomically points `dir/<link_name>` at `target` (a name inside the
/// same directory): the new symlink is created under a temp name and
/// renamed over the old one, which is atomic on POSIX filesystems.
#[cfg(unix)]
fn replace_symlink(dir: &Utf8Path, target: &str, link_name: &str) -> Result<(), SykliError> {
    let tmp = dir.join(format!(".{}.new-{}", link_name, uuid::Uuid::new_v4()));
    std::os::unix::fs::symlink(target, &tmp)
        .map_err(|e| SykliError::io(format!("failed to create symlink {}", tmp), e))?;
    let link = dir.join(link_name);
    fs::rename(&tmp, &link).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        SykliError::io(format!("failed to rename {} to {}", tmp, link), e)
    })?;
    Ok(())
}

/// On platforms without symlinks the link is a plain copy, swapped in
/// with the same temp-then-rename scheme.
#[cfg(not(unix))]
fn replace_symlink(dir: &Utf8Path, target: &str, link_name: &str) -> Result<(), SykliError> {
    let bytes = fs::read(dir.join(target))
        .map_err(|e| SykliError::io(format!("failed to read {}", target), e))?;
    write_file_atomic(&dir.join(link_name), &bytes)
}

/// The slice of a stored record needed to rebuild streaks.
#[derive(Deserialize)]
struct StoredResults {
    #[serde(default)]
    results: Vec<StoredResult>,
}

#[derive(Deserialize)]
struct StoredResult {
    name: String,
    status: String,
}

/// Rebuilds each task's consecutive-success streak from the project's
/// run history, newest record first.
///
/// A succeeded result extends the streak, a failed one ends it, and a
/// run where the task was skipped or absent is passed over. Symlinks
/// and unreadable records are ignored; a project with no history yields
/// an empty map.
pub fn success_streaks(project: &Utf8Path) -> BTreeMap<String, u32> {
    let dir = project.join(".sykli/runs");
    let Ok(entries) = fs::read_dir(dir.as_std_path()) else {
        return BTreeMap::new();
    };

    // Timestamped filenames sort chronologically; collect newest first.
    let mut record_paths: Vec<Utf8PathBuf> = entries
        .flatten()
        .filter(|entry| {
            entry
                .metadata()
                .map(|md| md.is_file())
                .unwrap_or(false)
        })
        .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.path()).ok())
        .filter(|path| {
            let name = path.file_name().unwrap_or_default();
            name.ends_with(".json")
                && name != "latest.json"
                && name != "last_good.json"
                && fs::symlink_metadata(path)
                    .map(|md| !md.file_type().is_symlink())
                    .unwrap_or(false)
        })
        .collect();
    record_paths.sort();
    record_paths.reverse();

    let mut streaks: BTreeMap<String, u32> = BTreeMap::new();
    // Tasks whose streak already ended at a failure in a newer record.
    let mut closed: std::collections::BTreeSet<String> = Default::default();

    for path in &record_paths {
        let Ok(bytes) = fs::read(path) else { continue };
        let Ok(record) = serde_json::from_slice::<StoredResults>(&bytes) else {
            continue;
        };
        for result in record.results {
            if closed.contains(&result.name) {
                continue;
            }
            match result.status.as_str() {
                "succeeded" => {
                    *streaks.entry(result.name).or_insert(0) += 1;
                }
                "failed" => {
                    streaks.entry(result.name.clone()).or_insert(0);
                    closed.insert(result.name);
                }
                // Skipped runs neither extend nor break the streak.
                _ => {}
            }
        }
    }

    streaks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::TaskStatus;
    use chrono::Utc;

    fn run_fixture(status: RunStatus) -> Run {
        Run {
            id: "run-1".into(),
            project_path: Utf8PathBuf::from("."),
            task_names: vec!["a".into()],
            status,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
        }
    }

    fn outcome_fixture() -> RunOutcome {
        RunOutcome {
            results: Vec::new(),
            error: None,
        }
    }

    fn project_fixture() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_writes_record_and_latest() {
        let (_dir, project) = project_fixture();
        let path = write_run(&project, &run_fixture(RunStatus::Succeeded), &outcome_fixture())
            .unwrap();
        assert!(path.exists());

        let latest = project.join(".sykli/runs/latest.json");
        let content = fs::read_to_string(&latest).unwrap();
        assert!(content.contains("\"run_id\": \"run-1\""));
    }

    #[test]
    fn test_last_good_only_on_success() {
        let (_dir, project) = project_fixture();
        write_run(&project, &run_fixture(RunStatus::Failed), &outcome_fixture()).unwrap();

        let runs = project.join(".sykli/runs");
        assert!(runs.join("latest.json").exists());
        assert!(!runs.join("last_good.json").exists());

        write_run(&project, &run_fixture(RunStatus::Succeeded), &outcome_fixture()).unwrap();
        assert!(runs.join("last_good.json").exists());
    }

    #[test]
    fn test_latest_follows_newest_run() {
        let (_dir, project) = project_fixture();

        let mut first = run_fixture(RunStatus::Succeeded);
        first.id = "first".into();
        write_run(&project, &first, &outcome_fixture()).unwrap();

        let mut second = run_fixture(RunStatus::Succeeded);
        second.id = "second".into();
        second.started_at = Utc::now() + chrono::Duration::milliseconds(5);
        write_run(&project, &second, &outcome_fixture()).unwrap();

        let latest = fs::read_to_string(project.join(".sykli/runs/latest.json")).unwrap();
        assert!(latest.contains("\"run_id\": \"second\""));
    }

    fn result(name: &str, status: TaskStatus) -> TaskResult {
        TaskResult {
            name: name.to_string(),
            status,
            duration_ms: 1,
            cached: false,
            error_kind: None,
            error: None,
            streak: None,
        }
    }

    /// Writes one historical run, offset in seconds so filenames sort.
    fn write_past_run(project: &Utf8Path, offset_s: i64, results: Vec<TaskResult>) {
        let mut run = run_fixture(RunStatus::Succeeded);
        run.started_at = Utc::now() - chrono::Duration::seconds(offset_s);
        let outcome = RunOutcome {
            results,
            error: None,
        };
        write_run(project, &run, &outcome).unwrap();
    }

    #[test]
    fn test_success_streaks_count_consecutive_successes() {
        let (_dir, project) = project_fixture();
        // Oldest run: test failed. Then two clean runs.
        write_past_run(
            &project,
            30,
            vec![
                result("build", TaskStatus::Succeeded),
                result("test", TaskStatus::Failed),
            ],
        );
        write_past_run(
            &project,
            20,
            vec![
                result("build", TaskStatus::Succeeded),
                result("test", TaskStatus::Succeeded),
            ],
        );
        write_past_run(
            &project,
            10,
            vec![
                result("build", TaskStatus::Succeeded),
                result("test", TaskStatus::Succeeded),
            ],
        );

        let streaks = success_streaks(&project);
        assert_eq!(streaks.get("build"), Some(&3));
        assert_eq!(streaks.get("test"), Some(&2));
    }

    #[test]
    fn test_success_streaks_reset_by_latest_failure() {
        let (_dir, project) = project_fixture();
        write_past_run(&project, 20, vec![result("deploy", TaskStatus::Succeeded)]);
        write_past_run(&project, 10, vec![result("deploy", TaskStatus::Failed)]);

        let streaks = success_streaks(&project);
        assert_eq!(streaks.get("deploy"), Some(&0));
    }

    #[test]
    fn test_success_streaks_pass_over_skipped_runs() {
        let (_dir, project) = project_fixture();
        write_past_run(&project, 20, vec![result("nightly", TaskStatus::Succeeded)]);
        write_past_run(&project, 10, vec![result("nightly", TaskStatus::Skipped)]);

        let streaks = success_streaks(&project);
        assert_eq!(streaks.get("nightly"), Some(&1));
    }

    #[test]
    fn test_success_streaks_empty_without_history() {
        let (_dir, project) = project_fixture();
        assert!(success_streaks(&project).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_latest_is_a_symlink_with_no_dangling_window() {
        let (_dir, project) = project_fixture();
        write_run(&project, &run_fixture(RunStatus::Succeeded), &outcome_fixture()).unwrap();

        let latest = project.join(".sykli/runs/latest.json");
        let md = fs::symlink_metadata(&latest).unwrap();
        assert!(md.file_type().is_symlink());
        // The link target resolves.
        assert!(fs::metadata(&latest).is_ok());
        // No temp debris remains.
        let stray: Vec<_> = fs::read_dir(project.join(".sykli/runs"))
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().contains(".new-"))
            .collect();
        assert!(stray.is_empty());
    }
}

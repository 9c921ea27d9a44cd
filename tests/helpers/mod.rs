#![allow(dead_code)]
//! Shared mock infrastructure for orchestrator-level tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use sykli::SykliError;
use sykli::graph::{Pipeline, Service, Task};
use sykli::target::{
    NetworkInfo, Secrets, Services, Storage, Target, TaskOutcome, TaskSpec,
};

/// One entry in the mock's event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started(String),
    Finished(String),
    ServicesStarted(String),
    ServicesStopped(String),
}

/// A target that records everything and fails on demand.
///
/// `fail_counts` maps a task name to how many attempts should fail
/// before succeeding; `effects` maps a task name to files the "command"
/// creates in the workdir, so cache tests have real outputs.
pub struct MockTarget {
    pub events: Mutex<Vec<Event>>,
    pub specs: Mutex<Vec<TaskSpec>>,
    pub fail_counts: Mutex<HashMap<String, u32>>,
    pub effects: HashMap<String, Vec<(String, Vec<u8>)>>,
    pub secret_values: HashMap<String, String>,
    pub workdir: Utf8PathBuf,
}

impl MockTarget {
    pub fn new(workdir: Utf8PathBuf) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            specs: Mutex::new(Vec::new()),
            fail_counts: Mutex::new(HashMap::new()),
            effects: HashMap::new(),
            secret_values: HashMap::new(),
            workdir,
        }
    }

    /// The Nth run of `task` fails for the first `count` attempts.
    pub fn fail_attempts(mut self, task: &str, count: u32) -> Self {
        self.fail_counts
            .get_mut()
            .unwrap()
            .insert(task.to_string(), count);
        self
    }

    /// Running `task` writes `content` at `path` under the workdir.
    pub fn with_effect(mut self, task: &str, path: &str, content: &[u8]) -> Self {
        self.effects
            .entry(task.to_string())
            .or_default()
            .push((path.to_string(), content.to_vec()));
        self
    }

    pub fn with_secret(mut self, name: &str, value: &str) -> Self {
        self.secret_values
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn specs(&self) -> Vec<TaskSpec> {
        self.specs.lock().unwrap().clone()
    }

    /// Task names in `run_task` call order.
    pub fn executed(&self) -> Vec<String> {
        self.specs().into_iter().map(|s| s.name).collect()
    }

    /// Asserts that `dep` finished before `task` started.
    pub fn assert_ordered(&self, dep: &str, task: &str) {
        let events = self.events();
        let finished = events
            .iter()
            .position(|e| *e == Event::Finished(dep.to_string()))
            .unwrap_or_else(|| panic!("{} never finished: {:?}", dep, events));
        let started = events
            .iter()
            .position(|e| *e == Event::Started(task.to_string()))
            .unwrap_or_else(|| panic!("{} never started: {:?}", task, events));
        assert!(
            finished < started,
            "{} must finish before {} starts: {:?}",
            dep,
            task,
            events
        );
    }
}

impl Target for MockTarget {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn run_task(&self, spec: &TaskSpec) -> TaskOutcome {
        self.events
            .lock()
            .unwrap()
            .push(Event::Started(spec.name.clone()));
        self.specs.lock().unwrap().push(spec.clone());

        let should_fail = {
            let mut counts = self.fail_counts.lock().unwrap();
            match counts.get_mut(&spec.name) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };

        let outcome = if should_fail {
            TaskOutcome {
                success: false,
                exit_code: Some(1),
                timed_out: false,
                output_tail: format!("{}: simulated failure", spec.name),
                lines: 1,
                duration: Duration::ZERO,
                error: Some(SykliError::ExitCode { code: 1 }),
            }
        } else {
            for (path, content) in self.effects.get(&spec.name).into_iter().flatten() {
                let dest = self.workdir.join(path);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(&dest, content).unwrap();
            }
            TaskOutcome::ok(Duration::ZERO)
        };

        self.events
            .lock()
            .unwrap()
            .push(Event::Finished(spec.name.clone()));
        outcome
    }

    fn secrets(&self) -> Option<&dyn Secrets> {
        Some(self)
    }

    fn storage(&self) -> Option<&dyn Storage> {
        Some(self)
    }

    fn services(&self) -> Option<&dyn Services> {
        Some(self)
    }
}

impl Secrets for MockTarget {
    fn resolve_secret(&self, name: &str) -> Result<String, SykliError> {
        self.secret_values
            .get(name)
            .cloned()
            .ok_or_else(|| SykliError::SecretUnresolved {
                name: name.to_string(),
            })
    }
}

impl Storage for MockTarget {
    fn create_volume(&self, name: &str) -> Result<String, SykliError> {
        Ok(name.to_string())
    }

    fn artifact_path(&self, task: &str, artifact: &str, workdir: &Utf8Path) -> Utf8PathBuf {
        workdir.join(".sykli/artifacts").join(task).join(artifact)
    }

    fn copy_artifact(
        &self,
        src: &Utf8Path,
        dst: &Utf8Path,
        workdir: &Utf8Path,
    ) -> Result<(), SykliError> {
        let abs_src = if src.is_absolute() {
            src.to_owned()
        } else {
            workdir.join(src)
        };
        let abs_dst = if dst.is_absolute() {
            dst.to_owned()
        } else {
            workdir.join(dst)
        };
        if let Some(parent) = abs_dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SykliError::CopyFailed {
                src: src.to_string(),
                dst: dst.to_string(),
                reason: e.to_string(),
            })?;
        }
        std::fs::copy(&abs_src, &abs_dst).map_err(|e| SykliError::CopyFailed {
            src: src.to_string(),
            dst: dst.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

impl Services for MockTarget {
    fn start_services(
        &self,
        task_name: &str,
        services: &[Service],
    ) -> Result<NetworkInfo, SykliError> {
        self.events
            .lock()
            .unwrap()
            .push(Event::ServicesStarted(task_name.to_string()));
        Ok(NetworkInfo {
            network: format!("mock-{}", task_name),
            containers: services.iter().map(|s| s.name.clone()).collect(),
        })
    }

    fn stop_services(&self, info: &NetworkInfo) -> Result<(), SykliError> {
        self.events
            .lock()
            .unwrap()
            .push(Event::ServicesStopped(info.network.clone()));
        Ok(())
    }
}

/// Builds a task with dependencies.
pub fn task(name: &str, deps: &[&str]) -> Task {
    let mut t = Task::new(name, format!("echo {}", name));
    t.depends_on = deps.iter().map(|s| s.to_string()).collect();
    t
}

/// Wraps tasks into a pipeline.
pub fn pipeline(tasks: Vec<Task>) -> Pipeline {
    Pipeline {
        version: "1".into(),
        tasks,
        resources: Default::default(),
    }
}

/// A tempdir-backed workdir as a Utf8PathBuf.
pub fn workdir_fixture() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, path)
}

//! Local target: drives a container runtime plus a plain shell.
//!
//! Container tasks are assembled into a `docker run` argv: remove on
//! exit, attach to the task network when services are present, one `-v`
//! per mount (directory mounts bind a host path, cache mounts a named
//! volume), workdir, env vars, then the image and `sh -c <command>`.
//! Shell tasks spawn `/bin/sh -c <command>` with the pipeline workdir
//! (plus the task workdir) as cwd.
//!
//! Service containers run detached on an isolated per-task network whose
//! name carries a random suffix, with a DNS alias per service name;
//! teardown force-removes the containers then deletes the network.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::error::SykliError;
use crate::executor::{CommandExecutor, CommandSpec};
use crate::graph::{MountKind, Service};
use crate::target::{NetworkInfo, Secrets, Services, Storage, Target, TaskOutcome, TaskSpec};

/// Grace period after starting service containers, before the task runs.
const SERVICE_STARTUP_DELAY: Duration = Duration::from_secs(1);

/// Sanitises a task or resource name for use in runtime object names:
/// lowercase, `[a-z0-9-]` only.
pub fn sanitise(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Volume name for a named cache resource.
pub fn cache_volume_name(resource: &str) -> String {
    format!("sykli-cache-{}", sanitise(resource))
}

/// Executes tasks on the local machine: containers through the runtime
/// binary (located once at construction), everything else through
/// `/bin/sh`.
pub struct LocalTarget {
    workdir: Utf8PathBuf,
    executor: Arc<dyn CommandExecutor>,
    runtime: Option<Utf8PathBuf>,
}

impl LocalTarget {
    /// Creates a local target rooted at the pipeline workdir.
    ///
    /// The container runtime is optional: a pipeline of plain shell
    /// tasks runs fine without one, and container tasks fail with a
    /// clear error instead of a spawn failure.
    pub fn new(workdir: Utf8PathBuf, executor: Arc<dyn CommandExecutor>) -> Self {
        let runtime = which::which("docker")
            .ok()
            .and_then(|p| Utf8PathBuf::from_path_buf(p).ok());
        if runtime.is_none() {
            debug!("container runtime not found; container tasks will fail");
        }
        Self {
            workdir,
            executor,
            runtime,
        }
    }

    /// Overrides the runtime binary, for tests.
    #[cfg(test)]
    fn with_runtime(mut self, runtime: Option<Utf8PathBuf>) -> Self {
        self.runtime = runtime;
        self
    }

    fn runtime(&self) -> Result<&Utf8Path, SykliError> {
        self.runtime
            .as_deref()
            .ok_or_else(|| SykliError::Crashed("container runtime not found on PATH".to_string()))
    }

    /// Builds the full `docker run` argv for a container task.
    fn container_args(&self, spec: &TaskSpec, image: &str) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];
        if let Some(network) = &spec.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        for mount in &spec.mounts {
            let source = match mount.kind {
                MountKind::Directory => {
                    let host = Utf8Path::new(&mount.source);
                    if host.is_absolute() {
                        mount.source.clone()
                    } else {
                        self.workdir.join(host).to_string()
                    }
                }
                MountKind::Cache => mount.source.clone(),
            };
            args.push("-v".to_string());
            args.push(format!("{}:{}", source, mount.target));
        }
        if let Some(workdir) = &spec.workdir {
            args.push("-w".to_string());
            args.push(workdir.clone());
        }
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(image.to_string());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(spec.command.clone());
        args
    }

    fn outcome_from(result: crate::executor::ExecutionResult, spec: &TaskSpec) -> TaskOutcome {
        let error = if result.timed_out {
            Some(SykliError::Timeout {
                task: spec.name.clone(),
                timeout_s: spec.timeout.as_secs(),
            })
        } else if result.success() {
            None
        } else {
            match result.code() {
                Some(code) => Some(SykliError::ExitCode { code }),
                None => Some(SykliError::Crashed(
                    "process terminated without an exit status".to_string(),
                )),
            }
        };
        TaskOutcome {
            success: result.success(),
            exit_code: result.code(),
            timed_out: result.timed_out,
            output_tail: result.tail_text(),
            lines: result.lines,
            duration: result.duration,
            error,
        }
    }
}

impl Target for LocalTarget {
    fn name(&self) -> &'static str {
        "local"
    }

    fn run_task(&self, spec: &TaskSpec) -> TaskOutcome {
        let command = match &spec.image {
            Some(image) => {
                let runtime = match self.runtime() {
                    Ok(r) => r,
                    Err(e) => return TaskOutcome::failed(e, Duration::ZERO),
                };
                CommandSpec::new(runtime.as_str(), self.container_args(spec, image))
            }
            None => {
                let cwd = match &spec.workdir {
                    Some(sub) => self.workdir.join(sub),
                    None => self.workdir.clone(),
                };
                CommandSpec::new("/bin/sh", vec!["-c".to_string(), spec.command.clone()])
                    .with_cwd(cwd)
                    .with_envs(spec.env.iter().cloned())
            }
        };
        let command = command.with_prefix(&spec.name).with_deadline(spec.timeout);

        match self.executor.execute(&command) {
            Ok(result) => Self::outcome_from(result, spec),
            Err(e) => TaskOutcome::failed(SykliError::Crashed(format!("{:#}", e)), Duration::ZERO),
        }
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

impl Secrets for LocalTarget {
    /// Secrets come from the engine's own environment; an empty value is
    /// indistinguishable from an unset one and counts as not found.
    fn resolve_secret(&self, name: &str) -> Result<String, SykliError> {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(SykliError::SecretUnresolved {
                name: name.to_string(),
            }),
        }
    }
}

/// Lexically normalises a path: resolves `.` and `..` without touching
/// the filesystem. Used as the first line of traversal defence before
/// the realpath check.
fn normalise(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

impl LocalTarget {
    /// Resolves `path` against the workdir and refuses anything whose
    /// canonical form escapes it.
    fn resolve_within_workdir(&self, path: &Utf8Path) -> Result<Utf8PathBuf, SykliError> {
        let abs = if path.is_absolute() {
            path.to_owned()
        } else {
            self.workdir.join(path)
        };
        let normalised = normalise(&abs);

        let workdir_real = self
            .workdir
            .canonicalize_utf8()
            .map_err(|e| SykliError::io(format!("failed to resolve workdir: {}", self.workdir), e))?;

        // Canonicalise the deepest existing ancestor so symlinked
        // escapes are caught even for paths that do not exist yet.
        let mut existing = normalised.clone();
        let mut remainder = Vec::new();
        loop {
            if existing.exists() {
                break;
            }
            match existing.file_name() {
                Some(name) => {
                    remainder.push(name.to_string());
                    existing.pop();
                }
                None => break,
            }
        }
        let mut real = existing
            .canonicalize_utf8()
            .map_err(|e| SykliError::io(format!("failed to resolve path: {}", existing), e))?;
        for part in remainder.iter().rev() {
            real.push(part);
        }

        if !real.starts_with(&workdir_real) {
            return Err(SykliError::PathTraversal {
                path: path.to_string(),
            });
        }
        Ok(real)
    }
}

impl Storage for LocalTarget {
    fn create_volume(&self, name: &str) -> Result<String, SykliError> {
        let volume = cache_volume_name(name);
        let runtime = self.runtime()?;
        let spec = CommandSpec::new(
            runtime.as_str(),
            vec!["volume".into(), "create".into(), volume.clone()],
        );
        let result = self
            .executor
            .execute(&spec)
            .map_err(|e| SykliError::Crashed(format!("{:#}", e)))?;
        if !result.success() {
            return Err(SykliError::Crashed(format!(
                "failed to create volume {}: {}",
                volume,
                result.tail_text()
            )));
        }
        Ok(volume)
    }

    fn artifact_path(&self, task: &str, artifact: &str, workdir: &Utf8Path) -> Utf8PathBuf {
        workdir.join(".sykli/artifacts").join(task).join(artifact)
    }

    fn copy_artifact(
        &self,
        src: &Utf8Path,
        dst: &Utf8Path,
        _workdir: &Utf8Path,
    ) -> Result<(), SykliError> {
        let src_real = self.resolve_within_workdir(src)?;
        let dst_real = self.resolve_within_workdir(dst)?;

        if let Some(parent) = dst_real.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SykliError::io(format!("failed to create {}", parent), e))?;
        }

        let copy_failed = |e: std::io::Error| SykliError::CopyFailed {
            src: src.to_string(),
            dst: dst.to_string(),
            reason: e.to_string(),
        };

        if src_real.is_dir() {
            for entry in walkdir::WalkDir::new(src_real.as_std_path()).follow_links(false) {
                let entry = entry.map_err(|e| copy_failed(e.into()))?;
                let Some(path) = Utf8Path::from_path(entry.path()) else {
                    continue;
                };
                let rel = path
                    .strip_prefix(&src_real)
                    .map_err(|_| SykliError::CopyFailed {
                        src: src.to_string(),
                        dst: dst.to_string(),
                        reason: "walked outside source root".to_string(),
                    })?;
                let target = dst_real.join(rel);
                if entry.file_type().is_dir() {
                    fs::create_dir_all(&target).map_err(copy_failed)?;
                } else if entry.file_type().is_file() {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent).map_err(copy_failed)?;
                    }
                    // fs::copy preserves permission bits.
                    fs::copy(path, &target).map_err(copy_failed)?;
                }
            }
        } else {
            fs::copy(&src_real, &dst_real).map_err(copy_failed)?;
        }

        debug!(src = %src, dst = %dst, "copied artifact");
        Ok(())
    }
}

impl Services for LocalTarget {
    fn start_services(
        &self,
        task_name: &str,
        services: &[Service],
    ) -> Result<NetworkInfo, SykliError> {
        let runtime = self.runtime().map_err(|e| SykliError::ServiceStart {
            task: task_name.to_string(),
            reason: e.to_string(),
        })?;

        let network = format!(
            "sykli-{}-{:08x}",
            sanitise(task_name),
            fastrand::u32(..)
        );
        let create = CommandSpec::new(
            runtime.as_str(),
            vec!["network".into(), "create".into(), network.clone()],
        );
        let result = self
            .executor
            .execute(&create)
            .map_err(|e| SykliError::ServiceStart {
                task: task_name.to_string(),
                reason: format!("{:#}", e),
            })?;
        if !result.success() {
            return Err(SykliError::ServiceStart {
                task: task_name.to_string(),
                reason: format!("network create failed: {}", result.tail_text()),
            });
        }

        let mut info = NetworkInfo {
            network: network.clone(),
            containers: Vec::new(),
        };
        for service in services {
            let container = format!("{}-{}", network, sanitise(&service.name));
            let run = CommandSpec::new(
                runtime.as_str(),
                vec![
                    "run".into(),
                    "-d".into(),
                    "--rm".into(),
                    "--name".into(),
                    container.clone(),
                    "--network".into(),
                    network.clone(),
                    "--network-alias".into(),
                    service.name.clone(),
                    service.image.clone(),
                ],
            );
            let result = self.executor.execute(&run);
            let failed = match &result {
                Ok(r) => !r.success(),
                Err(_) => true,
            };
            if failed {
                let reason = match result {
                    Ok(r) => format!("service {} failed to start: {}", service.name, r.tail_text()),
                    Err(e) => format!("service {} failed to start: {:#}", service.name, e),
                };
                // Best-effort rollback of whatever already started.
                let _ = self.stop_services(&info);
                return Err(SykliError::ServiceStart {
                    task: task_name.to_string(),
                    reason,
                });
            }
            info.containers.push(container);
        }

        // Give databases and caches a moment to bind their ports.
        std::thread::sleep(SERVICE_STARTUP_DELAY);
        debug!(task = task_name, network = %info.network, services = info.containers.len(), "services started");
        Ok(info)
    }

    fn stop_services(&self, info: &NetworkInfo) -> Result<(), SykliError> {
        let runtime = self.runtime().map_err(|e| SykliError::ServiceStop {
            network: info.network.clone(),
            reason: e.to_string(),
        })?;

        let mut first_failure: Option<String> = None;
        for container in &info.containers {
            let rm = CommandSpec::new(
                runtime.as_str(),
                vec!["rm".into(), "-f".into(), container.clone()],
            );
            match self.executor.execute(&rm) {
                Ok(result) if result.success() => {}
                Ok(result) => {
                    warn!(container = %container, "failed to remove service container");
                    first_failure.get_or_insert_with(|| {
                        format!("rm {} failed: {}", container, result.tail_text())
                    });
                }
                Err(e) => {
                    first_failure.get_or_insert_with(|| format!("rm {} failed: {:#}", container, e));
                }
            }
        }

        let rm_net = CommandSpec::new(
            runtime.as_str(),
            vec!["network".into(), "rm".into(), info.network.clone()],
        );
        match self.executor.execute(&rm_net) {
            Ok(result) if result.success() => {}
            Ok(result) => {
                first_failure.get_or_insert_with(|| {
                    format!("network rm {} failed: {}", info.network, result.tail_text())
                });
            }
            Err(e) => {
                first_failure
                    .get_or_insert_with(|| format!("network rm {} failed: {:#}", info.network, e));
            }
        }

        match first_failure {
            None => Ok(()),
            Some(reason) => Err(SykliError::ServiceStop {
                network: info.network.clone(),
                reason,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionResult;
    use std::sync::Mutex;

    /// Records executed commands, optionally failing specific calls.
    struct MockExecutor {
        calls: Mutex<Vec<CommandSpec>>,
        fail_on_call: Option<usize>,
    }

    impl MockExecutor {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on_call: None,
            }
        }

        fn failing_on(index: usize) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on_call: Some(index),
            }
        }

        fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandExecutor for MockExecutor {
        fn execute(&self, spec: &CommandSpec) -> anyhow::Result<ExecutionResult> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len();
            calls.push(spec.clone());
            drop(calls);

            if self.fail_on_call == Some(index) {
                anyhow::bail!("simulated failure on call {}", index);
            }
            Ok(ExecutionResult {
                status: None,
                timed_out: false,
                tail: Vec::new(),
                lines: 0,
                duration: Duration::ZERO,
            })
        }
    }

    fn workdir_fixture() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    fn target_with(executor: Arc<MockExecutor>, workdir: Utf8PathBuf) -> LocalTarget {
        LocalTarget::new(workdir, executor).with_runtime(Some(Utf8PathBuf::from("docker")))
    }

    fn spec(name: &str, command: &str) -> TaskSpec {
        TaskSpec {
            name: name.into(),
            command: command.into(),
            image: None,
            workdir: None,
            env: Vec::new(),
            mounts: Vec::new(),
            timeout: Duration::from_secs(300),
            network: None,
            requires: Vec::new(),
        }
    }

    #[test]
    fn test_sanitise() {
        assert_eq!(sanitise("Test_Task 1"), "test-task-1");
        assert_eq!(sanitise("build"), "build");
        assert_eq!(cache_volume_name("cargo registry"), "sykli-cache-cargo-registry");
    }

    #[test]
    fn test_shell_task_argv() {
        let executor = Arc::new(MockExecutor::new());
        let (_dir, workdir) = workdir_fixture();
        let target = target_with(Arc::clone(&executor), workdir.clone());

        let outcome = target.run_task(&spec("t", "echo hi"));
        assert!(outcome.success);

        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "/bin/sh");
        assert_eq!(calls[0].args, vec!["-c", "echo hi"]);
        assert_eq!(calls[0].cwd.as_deref(), Some(workdir.as_path()));
    }

    #[test]
    fn test_container_task_argv() {
        let executor = Arc::new(MockExecutor::new());
        let (_dir, workdir) = workdir_fixture();
        let target = target_with(Arc::clone(&executor), workdir.clone());

        let mut task_spec = spec("build", "cargo build");
        task_spec.image = Some("rust:1.75".into());
        task_spec.workdir = Some("/src".into());
        task_spec.env = vec![("CARGO_TERM_COLOR".into(), "always".into())];
        task_spec.mounts = vec![
            crate::target::MountSpec {
                source: ".".into(),
                target: "/src".into(),
                kind: MountKind::Directory,
            },
            crate::target::MountSpec {
                source: "sykli-cache-cargo".into(),
                target: "/usr/local/cargo/registry".into(),
                kind: MountKind::Cache,
            },
        ];
        task_spec.network = Some("sykli-build-abc".into());

        target.run_task(&task_spec);

        let calls = executor.calls();
        let args = &calls[0].args;
        assert_eq!(calls[0].program, "docker");
        assert_eq!(args[0], "run");
        assert_eq!(args[1], "--rm");
        let network_pos = args.iter().position(|a| a == "--network").unwrap();
        assert_eq!(args[network_pos + 1], "sykli-build-abc");
        assert!(args.contains(&format!("{}:/src", workdir.join("."))));
        assert!(args.contains(&"sykli-cache-cargo:/usr/local/cargo/registry".to_string()));
        assert!(args.contains(&"CARGO_TERM_COLOR=always".to_string()));
        let image_pos = args.iter().position(|a| a == "rust:1.75").unwrap();
        assert_eq!(&args[image_pos + 1..], &["sh", "-c", "cargo build"]);
    }

    #[test]
    fn test_container_without_runtime_fails() {
        let executor = Arc::new(MockExecutor::new());
        let (_dir, workdir) = workdir_fixture();
        let target =
            LocalTarget::new(workdir, Arc::clone(&executor) as Arc<dyn CommandExecutor>)
                .with_runtime(None);

        let mut task_spec = spec("build", "make");
        task_spec.image = Some("alpine".into());
        let outcome = target.run_task(&task_spec);
        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(SykliError::Crashed(_))));
        assert!(executor.calls().is_empty());
    }

    #[test]
    fn test_secret_resolution() {
        let executor = Arc::new(MockExecutor::new());
        let (_dir, workdir) = workdir_fixture();
        let target = target_with(executor, workdir);

        unsafe { std::env::set_var("SYKLI_TEST_SECRET", "hunter2") };
        assert_eq!(target.resolve_secret("SYKLI_TEST_SECRET").unwrap(), "hunter2");
        unsafe { std::env::remove_var("SYKLI_TEST_SECRET") };

        unsafe { std::env::set_var("SYKLI_TEST_EMPTY", "") };
        assert!(matches!(
            target.resolve_secret("SYKLI_TEST_EMPTY").unwrap_err(),
            SykliError::SecretUnresolved { .. }
        ));
        unsafe { std::env::remove_var("SYKLI_TEST_EMPTY") };
    }

    #[test]
    fn test_artifact_path_layout() {
        let executor = Arc::new(MockExecutor::new());
        let (_dir, workdir) = workdir_fixture();
        let target = target_with(executor, workdir.clone());
        assert_eq!(
            target.artifact_path("build", "app", &workdir),
            workdir.join(".sykli/artifacts/build/app")
        );
    }

    #[test]
    fn test_copy_artifact_file() {
        let executor = Arc::new(MockExecutor::new());
        let (_dir, workdir) = workdir_fixture();
        let target = target_with(executor, workdir.clone());

        fs::write(workdir.join("app"), b"binary").unwrap();
        target
            .copy_artifact(Utf8Path::new("app"), Utf8Path::new("out/app"), &workdir)
            .unwrap();
        assert_eq!(fs::read(workdir.join("out/app")).unwrap(), b"binary");
    }

    #[test]
    fn test_copy_artifact_directory() {
        let executor = Arc::new(MockExecutor::new());
        let (_dir, workdir) = workdir_fixture();
        let target = target_with(executor, workdir.clone());

        fs::create_dir_all(workdir.join("dist/js")).unwrap();
        fs::write(workdir.join("dist/index.html"), b"<html>").unwrap();
        fs::write(workdir.join("dist/js/app.js"), b"js").unwrap();

        target
            .copy_artifact(Utf8Path::new("dist"), Utf8Path::new("public"), &workdir)
            .unwrap();
        assert_eq!(fs::read(workdir.join("public/js/app.js")).unwrap(), b"js");
    }

    #[test]
    fn test_copy_artifact_refuses_traversal() {
        let executor = Arc::new(MockExecutor::new());
        let (_dir, workdir) = workdir_fixture();
        let target = target_with(executor, workdir.clone());

        fs::write(workdir.join("app"), b"binary").unwrap();
        let err = target
            .copy_artifact(
                Utf8Path::new("app"),
                Utf8Path::new("../escape/app"),
                &workdir,
            )
            .unwrap_err();
        assert!(matches!(err, SykliError::PathTraversal { .. }));

        let err = target
            .copy_artifact(Utf8Path::new("/etc/passwd"), Utf8Path::new("stolen"), &workdir)
            .unwrap_err();
        assert!(matches!(err, SykliError::PathTraversal { .. }));
    }

    #[test]
    fn test_start_services_creates_network_then_containers() {
        let executor = Arc::new(MockExecutor::new());
        let (_dir, workdir) = workdir_fixture();
        let target = target_with(Arc::clone(&executor), workdir);

        let services = vec![Service {
            image: "redis:7".into(),
            name: "cache".into(),
        }];
        let info = target.start_services("integration", &services).unwrap();
        assert!(info.network.starts_with("sykli-integration-"));
        assert_eq!(info.containers.len(), 1);

        let calls = executor.calls();
        assert_eq!(calls[0].args[..2], ["network".to_string(), "create".to_string()]);
        assert_eq!(calls[1].args[0], "run");
        assert!(calls[1].args.contains(&"--network-alias".to_string()));
        assert!(calls[1].args.contains(&"cache".to_string()));
        assert!(calls[1].args.contains(&"redis:7".to_string()));
    }

    #[test]
    fn test_failed_service_start_rolls_back() {
        // Call 0: network create (ok), call 1: run service (fails).
        let executor = Arc::new(MockExecutor::failing_on(1));
        let (_dir, workdir) = workdir_fixture();
        let target = target_with(Arc::clone(&executor), workdir);

        let services = vec![Service {
            image: "redis:7".into(),
            name: "cache".into(),
        }];
        let err = target.start_services("t", &services).unwrap_err();
        assert!(matches!(err, SykliError::ServiceStart { .. }));

        // Rollback removed the network after the failed start.
        let calls = executor.calls();
        let last = calls.last().unwrap();
        assert_eq!(last.args[..2], ["network".to_string(), "rm".to_string()]);
    }

    #[test]
    fn test_stop_services_removes_containers_then_network() {
        let executor = Arc::new(MockExecutor::new());
        let (_dir, workdir) = workdir_fixture();
        let target = target_with(Arc::clone(&executor), workdir);

        let info = NetworkInfo {
            network: "sykli-t-1234".into(),
            containers: vec!["sykli-t-1234-db".into()],
        };
        target.stop_services(&info).unwrap();

        let calls = executor.calls();
        assert_eq!(calls[0].args, vec!["rm", "-f", "sykli-t-1234-db"]);
        assert_eq!(calls[1].args, vec!["network", "rm", "sykli-t-1234"]);
    }
}

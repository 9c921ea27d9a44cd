//! Target abstraction: where tasks execute.
//!
//! A target is something that can run a task; that is the whole required
//! contract. Everything else (lifecycle hooks, secret resolution,
//! artifact storage, service containers) is an optional capability a
//! target opts into, and the orchestrator probes for each capability once
//! per dispatch and degrades gracefully when it is absent (for example, a
//! task declaring services on a target without [`Services`] fails with
//! `TargetCapability` instead of crashing mid-run).
//!
//! Rust has no runtime trait queries, so capabilities are discovered
//! through optional accessors on [`Target`] returning trait objects; a
//! minimal target (say, "trigger a hosted CI job") implements `run_task`
//! and nothing else.

pub mod distributed;
pub mod local;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::SykliError;
use crate::graph::{MountKind, Service};

/// A fully resolved mount handed to the target: source is a host path
/// (directory mounts) or a volume name (cache mounts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Host path or volume reference.
    pub source: String,
    /// Mount path inside the container.
    pub target: String,
    /// Mount kind.
    pub kind: MountKind,
}

/// Everything a target needs to execute one task; produced by the
/// orchestrator after conditions, gates, secrets and cache checks.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Task name, used for display prefixes and container naming.
    pub name: String,
    /// The shell command.
    pub command: String,
    /// Container image; `None` means plain shell execution.
    pub image: Option<String>,
    /// Working directory: absolute inside the container, or relative to
    /// the pipeline workdir for shell tasks.
    pub workdir: Option<String>,
    /// Environment, fully merged (task env, capability values, secrets,
    /// OIDC credentials).
    pub env: Vec<(String, String)>,
    /// Resolved mounts.
    pub mounts: Vec<MountSpec>,
    /// Hard deadline.
    pub timeout: Duration,
    /// The task network, when services were started for this task.
    pub network: Option<String>,
    /// Node label tags for distributed placement; ignored by targets
    /// that run everything in place.
    pub requires: Vec<String>,
}

/// Result of running a task on a target.
#[derive(Debug)]
pub struct TaskOutcome {
    /// True when the command exited zero.
    pub success: bool,
    /// Process exit code, when the platform reported one.
    pub exit_code: Option<i32>,
    /// True when the deadline expired and the process was killed.
    pub timed_out: bool,
    /// Retained output tail (merged stdout and stderr).
    pub output_tail: String,
    /// Total output lines seen.
    pub lines: u64,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Structured error, when the failure was not a plain exit code.
    pub error: Option<SykliError>,
}

impl TaskOutcome {
    /// A successful outcome with no retained output.
    pub fn ok(duration: Duration) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            timed_out: false,
            output_tail: String::new(),
            lines: 0,
            duration,
            error: None,
        }
    }

    /// A failure carrying a structured error.
    pub fn failed(error: SykliError, duration: Duration) -> Self {
        Self {
            success: false,
            exit_code: None,
            timed_out: false,
            output_tail: String::new(),
            lines: 0,
            duration,
            error: Some(error),
        }
    }
}

/// Network handle returned by [`Services::start_services`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Runtime network name.
    pub network: String,
    /// Started container ids, in start order.
    pub containers: Vec<String>,
}

/// The core target contract: run one task.
pub trait Target: Send + Sync {
    /// Short name for diagnostics (`local`, `distributed`, ...).
    fn name(&self) -> &'static str;

    /// Executes a task to completion. Infrastructure failures are
    /// reported through the outcome, not panics.
    fn run_task(&self, spec: &TaskSpec) -> TaskOutcome;

    /// Lifecycle capability, when supported.
    fn lifecycle(&self) -> Option<&dyn Lifecycle> {
        None
    }

    /// Secret resolution capability, when supported.
    fn secrets(&self) -> Option<&dyn Secrets> {
        None
    }

    /// Artifact/volume storage capability, when supported.
    fn storage(&self) -> Option<&dyn Storage> {
        None
    }

    /// Service container capability, when supported.
    fn services(&self) -> Option<&dyn Services> {
        None
    }
}

/// Optional capability: setup and teardown around a run.
pub trait Lifecycle: Send + Sync {
    /// Initialises the target before the first task.
    fn setup(&self) -> Result<(), SykliError>;

    /// Cleans up after the run completes, successful or not.
    fn teardown(&self) -> Result<(), SykliError>;
}

/// Optional capability: resolve secrets by name.
pub trait Secrets: Send + Sync {
    /// Resolves a secret value; an empty or absent value is
    /// `SecretUnresolved`.
    fn resolve_secret(&self, name: &str) -> Result<String, SykliError>;
}

/// Optional capability: volumes and artifact passing.
pub trait Storage: Send + Sync {
    /// Creates (or reuses) a named volume, returning its reference.
    fn create_volume(&self, name: &str) -> Result<String, SykliError>;

    /// The canonical path for a task's named artifact under the workdir.
    fn artifact_path(&self, task: &str, artifact: &str, workdir: &Utf8Path) -> Utf8PathBuf;

    /// Copies an artifact, refusing paths that escape the workdir.
    fn copy_artifact(&self, src: &Utf8Path, dst: &Utf8Path, workdir: &Utf8Path)
    -> Result<(), SykliError>;
}

/// Optional capability: background service containers.
pub trait Services: Send + Sync {
    /// Starts service containers on an isolated per-task network and
    /// returns the handle needed to tear them down.
    fn start_services(&self, task_name: &str, services: &[Service])
    -> Result<NetworkInfo, SykliError>;

    /// Force-removes the containers and deletes the network. Must be
    /// called on every task exit path.
    fn stop_services(&self, network: &NetworkInfo) -> Result<(), SykliError>;
}

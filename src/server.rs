//! Run server: run identity, lifecycle events and per-run state.
//!
//! Every orchestrator invocation gets a unique run id. The server owns an
//! in-memory registry of runs (`pending -> running -> succeeded|failed`)
//! and a fan-out event bus; the orchestrator writes task events through a
//! sink adapter, and subscribers (the history writer, a CLI UI) receive
//! `run_started` / `task_started` / `task_completed` / `run_completed`
//! messages in order: `run_started` strictly before any task event, every
//! `task_completed` strictly before `run_completed`.

use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::SykliError;
use crate::graph::Pipeline;
use crate::orchestrator::{self, EventSink, RunOptions, RunOutcome, TaskResult, TaskStatus};
use crate::target::Target;

/// Ceiling on the synchronous entry point (10 minutes). Overridable per
/// call; deliberately not derived from the pipeline's aggregate task
/// timeouts.
pub const DEFAULT_RUN_CEILING: Duration = Duration::from_secs(600);

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    /// Registered, not yet executing.
    Pending,
    /// The orchestrator is executing it.
    Running,
    /// Every task succeeded or was skipped.
    Succeeded,
    /// A task failed and the run aborted.
    Failed,
    /// Terminated from outside before completion.
    Cancelled,
}

/// One registered run.
#[derive(Debug, Clone, Serialize)]
pub struct Run {
    /// Unique run id.
    pub id: String,
    /// The project (pipeline workdir) this run executes in.
    pub project_path: Utf8PathBuf,
    /// Task names, post-expansion.
    pub task_names: Vec<String>,
    /// Current lifecycle state.
    pub status: RunStatus,
    /// When the run was registered.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

/// A lifecycle event on the bus.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A run was dispatched.
    RunStarted {
        /// Run id.
        run: String,
        /// Project path.
        project: String,
        /// Task names, post-expansion.
        tasks: Vec<String>,
    },
    /// A task's pipeline began.
    TaskStarted {
        /// Run id.
        run: String,
        /// Task name.
        task: String,
    },
    /// A task terminated.
    TaskCompleted {
        /// Run id.
        run: String,
        /// Task name.
        task: String,
        /// Terminal status.
        status: TaskStatus,
        /// True when outputs were restored from cache.
        cached: bool,
    },
    /// The run terminated.
    RunCompleted {
        /// Run id.
        run: String,
        /// Terminal status.
        status: RunStatus,
    },
}

/// Fan-out pub/sub over std channels. Disconnected subscribers are
/// pruned on publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<RunEvent>>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes; the receiver sees every event published afterwards.
    pub fn subscribe(&self) -> Receiver<RunEvent> {
        let (tx, rx) = channel();
        self.subscribers.lock().expect("bus poisoned").push(tx);
        rx
    }

    /// Publishes to every live subscriber.
    pub fn publish(&self, event: RunEvent) {
        let mut subscribers = self.subscribers.lock().expect("bus poisoned");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Adapts orchestrator task notifications into bus events carrying the
/// run id.
struct BusSink {
    bus: Arc<EventBus>,
    run_id: String,
}

impl EventSink for BusSink {
    fn task_started(&self, task: &str) {
        self.bus.publish(RunEvent::TaskStarted {
            run: self.run_id.clone(),
            task: task.to_string(),
        });
    }

    fn task_completed(&self, task: &str, result: &TaskResult) {
        self.bus.publish(RunEvent::TaskCompleted {
            run: self.run_id.clone(),
            task: task.to_string(),
            status: result.status,
            cached: result.cached,
        });
    }
}

/// Assigns run ids, owns the registry, publishes lifecycle events.
///
/// Bus and registry are internally shared so the worker thread can
/// publish completion and transition state after the caller moved on.
pub struct RunServer {
    bus: Arc<EventBus>,
    runs: Arc<Mutex<BTreeMap<String, Run>>>,
}

impl Default for RunServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies a state transition in the shared registry, stamping
/// `finished_at` on terminal states.
fn transition(runs: &Mutex<BTreeMap<String, Run>>, id: &str, status: RunStatus) {
    let mut runs = runs.lock().expect("registry poisoned");
    if let Some(run) = runs.get_mut(id) {
        run.status = status;
        if matches!(
            status,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        ) {
            run.finished_at = Some(Utc::now());
        }
    }
}

impl RunServer {
    /// Creates a server with an empty registry and a fresh bus.
    pub fn new() -> Self {
        Self {
            bus: Arc::new(EventBus::new()),
            runs: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// The server's event bus, for subscribers.
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// A snapshot of a registered run.
    pub fn run(&self, id: &str) -> Option<Run> {
        self.runs.lock().expect("registry poisoned").get(id).cloned()
    }

    fn register(&self, project_path: &Utf8PathBuf, task_names: Vec<String>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let run = Run {
            id: id.clone(),
            project_path: project_path.clone(),
            task_names,
            status: RunStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.runs
            .lock()
            .expect("registry poisoned")
            .insert(id.clone(), run);
        id
    }

    /// Dispatches a run and blocks until `run_completed`, bounded by
    /// `ceiling`.
    ///
    /// On a ceiling breach the orchestrator thread is abandoned (its
    /// per-task deadlines still bound it) and the run is marked
    /// cancelled.
    pub fn run_sync(
        &self,
        pipeline: Pipeline,
        target: Arc<dyn Target>,
        opts: RunOptions,
        ceiling: Duration,
    ) -> Result<RunOutcome, SykliError> {
        let task_names: Vec<String> = pipeline.tasks.iter().map(|t| t.name.clone()).collect();
        let run_id = self.register(&opts.workdir, task_names.clone());
        debug!(run = %run_id, tasks = task_names.len(), "run registered");

        // Subscribe before publishing run_started so this entry point
        // observes its own run from the first event.
        let events = self.bus.subscribe();

        transition(&self.runs, &run_id, RunStatus::Running);
        self.bus.publish(RunEvent::RunStarted {
            run: run_id.clone(),
            project: opts.workdir.to_string(),
            tasks: task_names,
        });

        let (outcome_tx, outcome_rx) = channel();
        let bus = Arc::clone(&self.bus);
        let runs = Arc::clone(&self.runs);
        let worker_run_id = run_id.clone();
        thread::Builder::new()
            .name("sykli-run".to_string())
            .spawn(move || {
                let sink = BusSink {
                    bus: Arc::clone(&bus),
                    run_id: worker_run_id.clone(),
                };
                let outcome = orchestrator::run(&pipeline, target.as_ref(), &opts, &sink);
                let status = if outcome.success() {
                    RunStatus::Succeeded
                } else {
                    RunStatus::Failed
                };
                transition(&runs, &worker_run_id, status);
                bus.publish(RunEvent::RunCompleted {
                    run: worker_run_id,
                    status,
                });
                let _ = outcome_tx.send(outcome);
            })
            .map_err(|e| SykliError::Crashed(format!("failed to spawn run thread: {}", e)))?;

        // Drain our subscription until our run completes; other runs'
        // events may interleave on a shared server.
        let deadline = std::time::Instant::now() + ceiling;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match events.recv_timeout(remaining) {
                Ok(RunEvent::RunCompleted { run, .. }) if run == run_id => {
                    return outcome_rx.recv().map_err(|_| {
                        SykliError::Crashed("run thread dropped its outcome".to_string())
                    });
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }

        warn!(run = %run_id, "run exceeded its ceiling; abandoning");
        transition(&self.runs, &run_id, RunStatus::Cancelled);
        Err(SykliError::Timeout {
            task: format!("run {}", run_id),
            timeout_s: ceiling.as_secs(),
        })
    }
}

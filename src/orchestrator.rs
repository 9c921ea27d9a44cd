//! Level-parallel DAG runner.
//!
//! Tasks are grouped into ordered levels by dependency depth; within a
//! level each task runs on its own thread, and the level is a barrier:
//! nothing in level N+1 starts before everything in level N terminated.
//!
//! Each task walks the same pipeline: condition, gate, task inputs, OIDC,
//! secrets, cache check, services, retried execution, cache store,
//! service teardown, result record. A failed task aborts the run:
//! same-level siblings are awaited (they cannot be cancelled
//! retroactively without lying about their state), but no later level
//! starts.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::cache::{CacheDecision, CacheStore};
use crate::condition::{ConditionContext, Verdict, evaluate};
use crate::error::SykliError;
use crate::graph::{MountKind, Pipeline, Resource, Task};
use crate::hints;
use crate::services::artifacts;
use crate::services::gate::{self, GateOutcome};
use crate::services::oidc;
use crate::services::progress::Progress;
use crate::services::retry::Backoff;
use crate::target::{MountSpec, NetworkInfo, Services, Target, TaskSpec};

/// Terminal status of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    /// Ran (or restored from cache) successfully.
    Succeeded,
    /// Condition evaluated false (or was invalid); the task did not run.
    Skipped,
    /// The task failed; the run aborts after this level.
    Failed,
}

/// Structured record of one terminated task.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskResult {
    /// Task name.
    pub name: String,
    /// Terminal status.
    pub status: TaskStatus,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// True when outputs were restored from cache instead of executing.
    pub cached: bool,
    /// Stable error kind, for programmatic consumers.
    pub error_kind: Option<String>,
    /// Human-readable error, when failed.
    pub error: Option<String>,
    /// Consecutive-success count including this run: the prior streak
    /// from run history plus one on success, zero on failure, absent
    /// when the task was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streak: Option<u32>,
}

impl TaskResult {
    fn skipped(name: &str, started: Instant) -> Self {
        Self {
            name: name.to_string(),
            status: TaskStatus::Skipped,
            duration_ms: started.elapsed().as_millis() as u64,
            cached: false,
            error_kind: None,
            error: None,
            streak: None,
        }
    }

    fn succeeded(name: &str, started: Instant, cached: bool, streak: u32) -> Self {
        Self {
            name: name.to_string(),
            status: TaskStatus::Succeeded,
            duration_ms: started.elapsed().as_millis() as u64,
            cached,
            error_kind: None,
            error: None,
            streak: Some(streak),
        }
    }

    fn failed(name: &str, started: Instant, error: &SykliError) -> Self {
        Self {
            name: name.to_string(),
            status: TaskStatus::Failed,
            duration_ms: started.elapsed().as_millis() as u64,
            cached: false,
            error_kind: Some(error.kind().to_string()),
            error: Some(error.to_string()),
            streak: Some(0),
        }
    }
}

/// Result of one orchestrator invocation: every terminated task's record
/// plus the first failure, so callers know which tasks succeeded.
#[derive(Debug)]
pub struct RunOutcome {
    /// Records in termination order within levels, level order overall.
    pub results: Vec<TaskResult>,
    /// The first failure, when the run aborted.
    pub error: Option<String>,
}

impl RunOutcome {
    /// True when every task succeeded or was skipped.
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Receives per-task lifecycle notifications; the run server adapts
/// these into bus events with run ids attached.
pub trait EventSink: Send + Sync {
    /// A task's pipeline is starting.
    fn task_started(&self, task: &str);
    /// A task terminated (success, skip or failure).
    fn task_completed(&self, task: &str, result: &TaskResult);
}

/// Sink that drops every event; used by entry points that do not
/// subscribe.
pub struct NullSink;

impl EventSink for NullSink {
    fn task_started(&self, _task: &str) {}
    fn task_completed(&self, _task: &str, _result: &TaskResult) {}
}

/// Options for one run.
pub struct RunOptions {
    /// The pipeline workdir; shell tasks and the cache walk run here.
    pub workdir: Utf8PathBuf,
    /// The content-addressed cache; `None` disables caching entirely.
    pub cache: Option<CacheStore>,
    /// Condition evaluation context.
    pub context: ConditionContext,
    /// Walk the full pipeline but skip gates and cache writes; command
    /// execution is the executor's concern (it logs instead of running).
    pub dry_run: bool,
    /// Prior consecutive-success streak per task, seeded from the
    /// project's run history. Missing entries count as zero.
    pub streaks: BTreeMap<String, u32>,
}

/// Removes service containers on every exit path, including panics in
/// the task pipeline.
struct ServiceGuard<'a> {
    services: &'a dyn Services,
    info: Option<NetworkInfo>,
}

impl ServiceGuard<'_> {
    fn network(&self) -> Option<String> {
        self.info.as_ref().map(|i| i.network.clone())
    }
}

impl Drop for ServiceGuard<'_> {
    fn drop(&mut self) {
        if let Some(info) = self.info.take()
            && let Err(e) = self.services.stop_services(&info)
        {
            warn!(network = %info.network, error = %e, "service teardown failed");
        }
    }
}

/// Runs a validated, expanded pipeline against a target.
pub fn run(
    pipeline: &Pipeline,
    target: &dyn Target,
    opts: &RunOptions,
    sink: &dyn EventSink,
) -> RunOutcome {
    if let Some(lifecycle) = target.lifecycle()
        && let Err(e) = lifecycle.setup()
    {
        return RunOutcome {
            results: Vec::new(),
            error: Some(format!("target setup failed: {}", e)),
        };
    }

    let outcome = run_levels(pipeline, target, opts, sink);

    if let Some(lifecycle) = target.lifecycle()
        && let Err(e) = lifecycle.teardown()
    {
        warn!(error = %e, "target teardown failed");
    }

    outcome
}

fn run_levels(
    pipeline: &Pipeline,
    target: &dyn Target,
    opts: &RunOptions,
    sink: &dyn EventSink,
) -> RunOutcome {
    let levels = crate::graph::level::assign(&pipeline.tasks);
    let progress = Arc::new(Progress::new(pipeline.tasks.len()));

    // Outputs by task, for task_inputs resolution.
    let outputs_by_task: BTreeMap<String, BTreeMap<String, String>> = pipeline
        .tasks
        .iter()
        .map(|t| (t.name.clone(), t.outputs.clone()))
        .collect();

    let mut results: Vec<TaskResult> = Vec::with_capacity(pipeline.tasks.len());
    let mut first_error: Option<String> = None;

    for (level_index, level) in levels.iter().enumerate() {
        info!(
            level = level_index,
            tasks = level.len(),
            "starting level"
        );

        let level_results: Vec<TaskResult> = thread::scope(|scope| {
            let handles: Vec<_> = level
                .iter()
                .map(|task| {
                    let progress = Arc::clone(&progress);
                    let outputs_by_task = &outputs_by_task;
                    let resources = &pipeline.resources;
                    scope.spawn(move || {
                        sink.task_started(&task.name);
                        let result = run_one(task, target, opts, outputs_by_task, resources);
                        let done = progress.complete_one();
                        info!(
                            task = %task.name,
                            status = %result.status,
                            cached = result.cached,
                            "[{}/{}] task terminated",
                            done,
                            progress.total()
                        );
                        sink.task_completed(&task.name, &result);
                        result
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().expect("task thread panicked"))
                .collect()
        });

        let failed = level_results
            .iter()
            .find(|r| r.status == TaskStatus::Failed)
            .map(|r| {
                format!(
                    "task {:?} failed: {}",
                    r.name,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            });
        results.extend(level_results);

        if let Some(error) = failed {
            first_error = Some(error);
            break;
        }
    }

    RunOutcome {
        results,
        error: first_error,
    }
}

/// The per-task pipeline; every early return terminates exactly this
/// task, never the siblings in its level.
fn run_one(
    task: &Task,
    target: &dyn Target,
    opts: &RunOptions,
    outputs_by_task: &BTreeMap<String, BTreeMap<String, String>>,
    resources: &BTreeMap<String, Resource>,
) -> TaskResult {
    let started = Instant::now();
    // The streak this run would extend; a success records prior + 1.
    let next_streak = opts.streaks.get(&task.name).copied().unwrap_or(0) + 1;
    let fail = |error: SykliError| {
        print_failure_block(task, &error, None, started);
        TaskResult::failed(&task.name, started, &error)
    };

    // a. Condition.
    if let Some(expression) = &task.condition {
        match evaluate(expression, &opts.context) {
            Verdict::Run => {}
            Verdict::Skip => {
                info!(task = %task.name, "condition false, skipped");
                return TaskResult::skipped(&task.name, started);
            }
            Verdict::Invalid(reason) => {
                warn!(task = %task.name, reason = %reason, "invalid condition, skipping (fail-safe)");
                return TaskResult::skipped(&task.name, started);
            }
        }
    }

    // b. Gate.
    if let Some(g) = &task.gate {
        if opts.dry_run {
            info!(task = %task.name, "dry run: skipping gate");
        } else {
            match gate::acquire(&task.name, g) {
                GateOutcome::Approved => {}
                GateOutcome::Denied => {
                    return fail(SykliError::GateDenied {
                        task: task.name.clone(),
                    });
                }
                GateOutcome::TimedOut => {
                    return fail(SykliError::GateTimedOut {
                        task: task.name.clone(),
                        timeout_s: g.timeout_s,
                    });
                }
            }
        }
    }

    // c. Task inputs (artifacts from upstream tasks).
    if !task.task_inputs.is_empty() {
        let Some(storage) = target.storage() else {
            return fail(SykliError::TargetCapability {
                target: target.name().to_string(),
                capability: "storage".to_string(),
                task: task.name.clone(),
            });
        };
        let resolved = match artifacts::resolve(task, outputs_by_task) {
            Ok(resolved) => resolved,
            Err(e) => return fail(e),
        };
        for input in &resolved {
            if let Err(e) = storage.copy_artifact(
                Utf8Path::new(&input.source_path),
                Utf8Path::new(&input.dest),
                &opts.workdir,
            ) {
                return fail(e);
            }
        }
    }

    // d. OIDC exchange; temp files are removed when `_oidc_files` drops,
    // on every exit path below.
    let mut extra_env: Vec<(String, String)> = Vec::new();
    let _oidc_files = match &task.oidc {
        Some(binding) => match oidc::exchange(&task.name, binding) {
            Ok((env, files)) => {
                extra_env.extend(env);
                Some(files)
            }
            Err(e) => return fail(e),
        },
        None => None,
    };

    // e. Secrets.
    if !task.secrets.is_empty() {
        let Some(secrets) = target.secrets() else {
            return fail(SykliError::TargetCapability {
                target: target.name().to_string(),
                capability: "secrets".to_string(),
                task: task.name.clone(),
            });
        };
        for name in &task.secrets {
            match secrets.resolve_secret(name) {
                Ok(value) => extra_env.push((name.clone(), value)),
                Err(e) if opts.dry_run => {
                    warn!(task = %task.name, secret = %name, error = %e, "dry run: secret unresolved");
                }
                Err(e) => return fail(e),
            }
        }
    }

    // f. Cache check.
    let mut cache_slot: Option<(String, String)> = None;
    if let Some(store) = &opts.cache {
        match store.check(task, &opts.workdir) {
            Ok(CacheDecision::Hit { key }) => {
                if opts.dry_run {
                    info!(task = %task.name, "dry run: cache hit");
                    return TaskResult::succeeded(&task.name, started, true, next_streak);
                }
                match store.restore(&key, &opts.workdir) {
                    Ok(files) => {
                        info!(task = %task.name, files, "cache hit, outputs restored");
                        return TaskResult::succeeded(&task.name, started, true, next_streak);
                    }
                    Err(e) => {
                        // A failed restore is a miss in disguise; run the
                        // command instead of failing the task.
                        warn!(task = %task.name, error = %e, "cache restore failed, executing");
                    }
                }
            }
            Ok(CacheDecision::Miss {
                key,
                reason,
                inputs_fingerprint,
            }) => {
                info!(task = %task.name, reason = %reason, "cache miss");
                cache_slot = Some((key, inputs_fingerprint));
            }
            Err(e) => {
                warn!(task = %task.name, error = %e, "cache check failed, executing");
            }
        }
    }

    // g. Services, torn down by the guard on every exit path.
    let mut guard: Option<ServiceGuard<'_>> = None;
    if !task.services.is_empty() {
        let Some(services) = target.services() else {
            return fail(SykliError::TargetCapability {
                target: target.name().to_string(),
                capability: "services".to_string(),
                task: task.name.clone(),
            });
        };
        match services.start_services(&task.name, &task.services) {
            Ok(info) => {
                guard = Some(ServiceGuard {
                    services,
                    info: Some(info),
                });
            }
            Err(e) => return fail(e),
        }
    }

    // h. Retried execution under the per-task deadline.
    let spec = build_spec(
        task,
        resources,
        extra_env,
        guard.as_ref().and_then(|g| g.network()),
    );
    let backoff = Backoff::default();
    let attempts = task.attempts();
    let mut outcome = None;
    for attempt in 1..=attempts {
        let this = target.run_task(&spec);
        if this.success {
            outcome = Some(this);
            break;
        }
        if attempt < attempts {
            let delay = backoff.delay(attempt);
            warn!(
                task = %task.name,
                attempt,
                of = attempts,
                delay_ms = delay.as_millis() as u64,
                "attempt failed, retrying"
            );
            thread::sleep(delay);
        } else {
            outcome = Some(this);
        }
    }
    let outcome = outcome.expect("at least one attempt ran");

    if !outcome.success {
        let error = outcome.error.unwrap_or(SykliError::Crashed(
            "task failed without a structured error".to_string(),
        ));
        print_failure_block(task, &error, Some((&outcome.output_tail, outcome.exit_code)), started);
        return TaskResult::failed(&task.name, started, &error);
    }

    // i. Store outputs under the pre-execution fingerprint.
    if let (Some(store), Some((key, inputs_fp))) = (&opts.cache, &cache_slot)
        && !opts.dry_run
        && let Err(e) = store.store(
            task,
            &opts.workdir,
            key,
            inputs_fp,
            started.elapsed().as_millis() as u64,
        )
    {
        warn!(task = %task.name, error = %e, "failed to store cache entry");
    }

    // j. Services stop via the guard dropping here.
    drop(guard);

    TaskResult::succeeded(&task.name, started, false, next_streak)
}

/// Assembles the target-facing spec: resolved mounts, merged env,
/// effective deadline.
fn build_spec(
    task: &Task,
    resources: &BTreeMap<String, Resource>,
    extra_env: Vec<(String, String)>,
    network: Option<String>,
) -> TaskSpec {
    let mut env: Vec<(String, String)> = task
        .env
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    env.extend(extra_env);

    TaskSpec {
        name: task.name.clone(),
        command: task.command.clone(),
        image: task.container.clone(),
        workdir: task.workdir.clone(),
        env,
        mounts: resolve_mounts(task, resources),
        timeout: std::time::Duration::from_secs(task.timeout_secs()),
        network,
        requires: task.requires.clone(),
    }
}

/// Maps each task mount onto a host path (directory resources) or a
/// volume name (cache resources). A mount naming an undeclared resource
/// falls back to its resource id as the source path, matching version-1
/// pipelines that never declare resources.
fn resolve_mounts(task: &Task, resources: &BTreeMap<String, Resource>) -> Vec<MountSpec> {
    task.mounts
        .iter()
        .map(|mount| {
            let source = match resources.get(&mount.resource) {
                Some(Resource::Directory { path, .. }) => path.clone(),
                Some(Resource::Cache { name }) => crate::target::local::cache_volume_name(name),
                None => match mount.kind {
                    MountKind::Directory => mount
                        .resource
                        .strip_prefix("src:")
                        .unwrap_or(&mount.resource)
                        .to_string(),
                    MountKind::Cache => crate::target::local::cache_volume_name(&mount.resource),
                },
            };
            MountSpec {
                source,
                target: mount.path.clone(),
                kind: mount.kind,
            }
        })
        .collect()
}

/// Prints the formatted failure block: task name, final command (with
/// container prefix), exit code, retained output tail, duration, hints.
fn print_failure_block(
    task: &Task,
    error: &SykliError,
    execution: Option<(&str, Option<i32>)>,
    started: Instant,
) {
    let mut block = String::new();
    block.push_str(&format!("\n  task {} failed: {}\n", task.name, error));

    let command = match &task.container {
        Some(image) => format!("[{}] {}", image, task.command),
        None => task.command.clone(),
    };
    block.push_str(&format!("  command: {}\n", command));

    if let Some((tail, exit_code)) = execution {
        if let Some(code) = exit_code {
            block.push_str(&format!("  exit code: {}\n", code));
        }
        if !tail.is_empty() {
            block.push_str("  output (tail):\n");
            for line in tail.lines() {
                block.push_str(&format!("    {}\n", line));
            }
        }
        for hint in hints::hints_for(exit_code, tail) {
            block.push_str(&format!("  hint: {}\n", hint));
        }
    }

    block.push_str(&format!(
        "  duration: {}ms\n",
        started.elapsed().as_millis()
    ));
    eprintln!("{}", block);
}

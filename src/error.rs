//! Domain-specific error types for sykli.
//!
//! This module defines `SykliError`, a `thiserror`-based enum with one
//! variant per failure kind in the engine's closed taxonomy. Public API
//! functions return `Result<T, SykliError>` for programmatic error
//! handling, while trait boundaries and the application shell use
//! `anyhow::Result`.
//!
//! The kind set is stable: pipeline authors and SDK front-ends match on
//! `kind()` strings, so variants are added but never renamed.

use std::io;

/// Formats an IO error kind into a human-readable message.
///
/// Provides consistent messages for common IO error kinds instead of the
/// OS-level text. For unrecognized kinds, falls back to the OS message.
pub(crate) fn io_error_kind_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "I/O error: not found".to_string(),
        io::ErrorKind::PermissionDenied => "I/O error: permission denied".to_string(),
        io::ErrorKind::IsADirectory => "I/O error: is a directory".to_string(),
        _ => format!("I/O error: {}", err),
    }
}

/// Domain-specific error type for sykli.
///
/// Each variant corresponds to one kind in the engine's closed error
/// taxonomy, enabling callers to match programmatically rather than
/// parsing message strings.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SykliError {
    // ---- parse ----
    /// The pipeline description was not parseable as JSON.
    #[error("invalid pipeline JSON: {0}")]
    InvalidJson(String),

    /// The pipeline JSON parsed but violated the schema.
    #[error("pipeline schema error: {0}")]
    Schema(String),

    // ---- validation ----
    /// A task has an empty or missing name.
    #[error("task has an empty name")]
    EmptyName,

    /// Two or more tasks share the same name.
    #[error("duplicate task name: {name:?}")]
    DuplicateTask {
        /// The repeated task name.
        name: String,
    },

    /// A task lists itself in `depends_on`.
    #[error("task {task:?} depends on itself")]
    SelfDependency {
        /// The offending task.
        task: String,
    },

    /// A task depends on a name that does not exist in the graph.
    #[error("task {task:?} depends on unknown task {dep:?}")]
    MissingDependency {
        /// The depending task.
        task: String,
        /// The missing dependency name.
        dep: String,
    },

    /// The dependency graph contains a cycle.
    ///
    /// The path starts and ends at the same task, e.g. `["a", "b", "a"]`.
    /// Self-loops are reported as length-1 cycles.
    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle {
        /// The cycle path, closed back to its first element.
        path: Vec<String>,
    },

    // ---- capabilities ----
    /// A capability name does not match `[a-z][a-z0-9_-]*`.
    #[error("invalid capability name {name:?} on task {task:?}")]
    CapabilityInvalidName {
        /// The offending capability name.
        name: String,
        /// The declaring task.
        task: String,
    },

    /// A task both provides and needs the same capability.
    #[error("task {task:?} both provides and needs capability {name:?}")]
    CapabilitySelf {
        /// The capability name.
        name: String,
        /// The offending task.
        task: String,
    },

    /// A task declares both a matrix and provides; expansion would make
    /// the provider ambiguous.
    #[error("task {task:?} cannot combine a matrix with provides")]
    CapabilityMatrix {
        /// The offending task.
        task: String,
    },

    /// Two tasks provide the same capability name.
    #[error("capability {name:?} is provided by both {first:?} and {second:?}")]
    CapabilityDuplicate {
        /// The capability name.
        name: String,
        /// The first provider seen.
        first: String,
        /// The conflicting provider.
        second: String,
    },

    /// A task needs a capability no task provides.
    #[error("task {task:?} needs capability {name:?} but no task provides it")]
    CapabilityMissing {
        /// The capability name.
        name: String,
        /// The needing task.
        task: String,
    },

    // ---- artifact resolution ----
    /// A `task_inputs` entry references a task that does not exist.
    #[error("task {task:?} requests output from unknown task {from_task:?}")]
    SourceTaskNotFound {
        /// The consuming task.
        task: String,
        /// The missing source task.
        from_task: String,
    },

    /// A `task_inputs` entry references an output the source task does
    /// not declare.
    #[error("task {from_task:?} has no output named {output:?}")]
    OutputNotFound {
        /// The source task.
        from_task: String,
        /// The missing output name.
        output: String,
    },

    /// An artifact copy failed.
    #[error("failed to copy artifact from {src} to {dst}: {reason}")]
    CopyFailed {
        /// Source path.
        src: String,
        /// Destination path.
        dst: String,
        /// Human-readable reason.
        reason: String,
    },

    /// An artifact path escapes the pipeline workdir.
    #[error("path {path} escapes the pipeline workdir")]
    PathTraversal {
        /// The offending path.
        path: String,
    },

    // ---- auth ----
    /// A declared secret could not be resolved by the target.
    #[error("secret {name:?} could not be resolved")]
    SecretUnresolved {
        /// The secret name.
        name: String,
    },

    /// OIDC exchange was requested but no provider token is available.
    #[error("OIDC unavailable: {0}")]
    OidcUnavailable(String),

    /// OIDC credential exchange failed.
    #[error("credential exchange failed: {0}")]
    CredentialExchange(String),

    // ---- services ----
    /// A service container or its network failed to start.
    #[error("failed to start services for task {task:?}: {reason}")]
    ServiceStart {
        /// The task whose services failed.
        task: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Service teardown failed.
    #[error("failed to stop services on network {network:?}: {reason}")]
    ServiceStop {
        /// The network being cleaned up.
        network: String,
        /// Human-readable reason.
        reason: String,
    },

    // ---- gates ----
    /// A gate was explicitly denied.
    #[error("gate denied for task {task:?}")]
    GateDenied {
        /// The gated task.
        task: String,
    },

    /// A gate did not resolve before its deadline.
    #[error("gate timed out for task {task:?} after {timeout_s}s")]
    GateTimedOut {
        /// The gated task.
        task: String,
        /// The gate deadline in seconds.
        timeout_s: u64,
    },

    // ---- execution ----
    /// The task exceeded its deadline and was killed.
    #[error("task {task:?} timed out after {timeout_s}s")]
    Timeout {
        /// The task name.
        task: String,
        /// The deadline in seconds.
        timeout_s: u64,
    },

    /// The command exited with a non-zero status.
    #[error("command exited with code {code}")]
    ExitCode {
        /// The process exit code.
        code: i32,
    },

    /// The command terminated without an exit status (signal, spawn
    /// failure, reader panic).
    #[error("command crashed: {0}")]
    Crashed(String),

    // ---- targeting ----
    /// The selected target lacks a capability the task requires.
    #[error("target {target:?} does not support {capability} (task {task:?})")]
    TargetCapability {
        /// The target name.
        target: String,
        /// The missing capability (e.g. "services").
        capability: String,
        /// The task that needed it.
        task: String,
    },

    /// No node satisfied the task's `requires` labels, or all candidates
    /// failed.
    #[error("no node could run task {task:?}: {reason}")]
    Placement {
        /// The task name.
        task: String,
        /// Why placement failed.
        reason: String,
    },

    /// An I/O operation failed with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// What was being done when the error occurred.
        context: String,
        /// Human-readable description derived from [`io_error_kind_message`].
        message: String,
        /// The underlying I/O error, preserved for programmatic inspection.
        #[source]
        source: std::io::Error,
    },
}

impl SykliError {
    /// Creates an `Io` variant with the `message` field derived from the
    /// `source` via [`io_error_kind_message`].
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }

    /// Returns the stable kind string for this error.
    ///
    /// Kind strings are part of the engine's public contract; they are
    /// added but never renamed.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::Schema(_) => "schema",
            Self::EmptyName => "empty_name",
            Self::DuplicateTask { .. } => "duplicate_task",
            Self::SelfDependency { .. } => "self_dependency",
            Self::MissingDependency { .. } => "missing_dependency",
            Self::Cycle { .. } => "cycle",
            Self::CapabilityInvalidName { .. } => "capability_invalid_name",
            Self::CapabilitySelf { .. } => "capability_self",
            Self::CapabilityMatrix { .. } => "capability_matrix",
            Self::CapabilityDuplicate { .. } => "capability_duplicate",
            Self::CapabilityMissing { .. } => "capability_missing",
            Self::SourceTaskNotFound { .. } => "source_task_not_found",
            Self::OutputNotFound { .. } => "output_not_found",
            Self::CopyFailed { .. } => "copy_failed",
            Self::PathTraversal { .. } => "path_traversal",
            Self::SecretUnresolved { .. } => "secret_unresolved",
            Self::OidcUnavailable(_) => "oidc_unavailable",
            Self::CredentialExchange(_) => "credential_exchange",
            Self::ServiceStart { .. } => "service_start",
            Self::ServiceStop { .. } => "service_stop",
            Self::GateDenied { .. } => "gate_denied",
            Self::GateTimedOut { .. } => "gate_timed_out",
            Self::Timeout { .. } => "timeout",
            Self::ExitCode { .. } => "exit_code",
            Self::Crashed(_) => "crashed",
            Self::TargetCapability { .. } => "target_capability",
            Self::Placement { .. } => "placement",
            Self::Io { .. } => "io",
        }
    }
}

//! Task graph model: typed task/resource records and pipeline JSON parsing.
//!
//! The pipeline description arrives as UTF-8 JSON emitted by an SDK
//! front-end. This module parses it into typed records and applies the
//! normalisations downstream stages rely on:
//!
//! - a list-shaped `outputs` becomes `{output_0: v0, output_1: v1, ...}`
//! - `when` takes precedence over the legacy `condition` field
//! - a missing `task_inputs` becomes the empty sequence
//! - a mount's `type` string becomes a tagged [`MountKind`]
//!
//! Parsing fails with `InvalidJson` (not parseable) or `Schema` (required
//! field absent / wrong type) before any downstream stage runs. Unknown
//! fields at every level are ignored so newer SDKs stay compatible with
//! older engines.

pub mod capability;
pub mod level;
pub mod matrix;
pub mod validate;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use camino::Utf8Path;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::SykliError;

/// Default per-task deadline in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Kind of a resource mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// Bind-mount of a host directory.
    Directory,
    /// Named cache volume that persists between runs.
    Cache,
}

/// A resource mount inside a task's container.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Mount {
    /// Resource id this mount refers to (`src:<path>` or a cache name).
    pub resource: String,
    /// Absolute path inside the container.
    pub path: String,
    /// Mount kind.
    #[serde(rename = "type")]
    pub kind: MountKind,
}

/// A background service container attached to a task's network.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Service {
    /// Container image, e.g. `redis:7`.
    pub image: String,
    /// Service name; also the DNS alias on the task network.
    pub name: String,
}

/// An artifact consumed from another task's declared outputs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskInput {
    /// The producing task.
    pub from_task: String,
    /// The output name declared by the producing task.
    pub output_name: String,
    /// Destination path, relative to the pipeline workdir.
    pub dest: String,
}

/// A capability declaration: a name, optionally carrying a value that is
/// injected into needers' environments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provide {
    /// Capability name; must match `[a-z][a-z0-9_-]*`.
    pub name: String,
    /// Optional value injected as `SYKLI_CAP_<NAME>` into needers.
    pub value: Option<String>,
}

impl<'de> Deserialize<'de> for Provide {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Name(String),
            Full { name: String, value: Option<String> },
        }

        match Wire::deserialize(deserializer)? {
            Wire::Name(name) => Ok(Provide { name, value: None }),
            Wire::Full { name, value } => Ok(Provide { name, value }),
        }
    }
}

/// Strategy for resolving a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GateStrategy {
    /// Ask an interactive TTY; denied in non-interactive environments.
    Prompt,
    /// Poll a named environment variable.
    Env,
    /// Poll for a file; first existence approves unless it says `denied`.
    File,
    /// Declared but unimplemented; always denied.
    Webhook,
}

/// An approval checkpoint attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Gate {
    /// Resolution strategy.
    pub strategy: GateStrategy,
    /// Message shown to the approver.
    #[serde(default)]
    pub message: String,
    /// Deadline in seconds.
    #[serde(default = "default_gate_timeout")]
    pub timeout_s: u64,
    /// Environment variable name for the `env` strategy.
    #[serde(default)]
    pub env_var: Option<String>,
    /// File path for the `file` strategy.
    #[serde(default)]
    pub file_path: Option<String>,
}

fn default_gate_timeout() -> u64 {
    60
}

/// An OIDC credential binding; exchanged by an external collaborator
/// before the task command runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OidcBinding {
    /// Provider identifier, e.g. `aws`.
    pub provider: String,
    /// Optional audience restriction.
    #[serde(default)]
    pub audience: Option<String>,
}

/// The unit of execution: a shell command with its dependencies, inputs,
/// outputs and optional container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Unique, non-empty, stable identifier (`[A-Za-z0-9_-]+`).
    pub name: String,
    /// Shell command string.
    pub command: String,
    /// Optional container image; absent means plain shell execution.
    pub container: Option<String>,
    /// Working directory: absolute inside the container, or relative to
    /// the pipeline workdir for shell tasks.
    pub workdir: Option<String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Resource mounts, in declaration order.
    pub mounts: Vec<Mount>,
    /// Glob patterns feeding the cache fingerprint, in order.
    pub inputs: Vec<String>,
    /// Declared outputs, name to path.
    pub outputs: BTreeMap<String, String>,
    /// Dependency task names; order preserved for display.
    pub depends_on: Vec<String>,
    /// `when` expression, if any.
    pub condition: Option<String>,
    /// Secret names to resolve and inject.
    pub secrets: Vec<String>,
    /// Matrix dimensions in declaration order; empty means no expansion.
    pub matrix: Vec<(String, Vec<String>)>,
    /// Dimension bindings recorded on expanded variants.
    pub matrix_values: Vec<(String, String)>,
    /// Service containers, in declaration order.
    pub services: Vec<Service>,
    /// Retry count; `None` means a single attempt.
    pub retry: Option<u32>,
    /// Deadline in seconds; `None` means [`DEFAULT_TIMEOUT_SECS`].
    pub timeout: Option<u64>,
    /// Artifacts consumed from other tasks.
    pub task_inputs: Vec<TaskInput>,
    /// Node label tags required in distributed mode.
    pub requires: Vec<String>,
    /// Capabilities this task provides.
    pub provides: Vec<Provide>,
    /// Capabilities this task needs.
    pub needs: Vec<String>,
    /// Optional approval gate.
    pub gate: Option<Gate>,
    /// Optional OIDC credential binding.
    pub oidc: Option<OidcBinding>,
}

impl Task {
    /// Creates a minimal task with the given name and command.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            container: None,
            workdir: None,
            env: BTreeMap::new(),
            mounts: Vec::new(),
            inputs: Vec::new(),
            outputs: BTreeMap::new(),
            depends_on: Vec::new(),
            condition: None,
            secrets: Vec::new(),
            matrix: Vec::new(),
            matrix_values: Vec::new(),
            services: Vec::new(),
            retry: None,
            timeout: None,
            task_inputs: Vec::new(),
            requires: Vec::new(),
            provides: Vec::new(),
            needs: Vec::new(),
            gate: None,
            oidc: None,
        }
    }

    /// Number of execution attempts: `max(1, retry)`.
    pub fn attempts(&self) -> u32 {
        self.retry.map_or(1, |r| r.max(1))
    }

    /// Effective deadline in seconds.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }
}

/// A directory or named cache volume referenced by task mounts.
///
/// Resources are consumed by mounts, not owned by a specific task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Resource {
    /// A host directory, optionally filtered by glob patterns.
    Directory {
        /// Host path.
        path: String,
        /// Glob filters; empty means everything.
        #[serde(default)]
        globs: Vec<String>,
    },
    /// A named cache volume that persists between runs.
    Cache {
        /// Volume name.
        name: String,
    },
}

impl Resource {
    /// Returns the resource id: `src:<path>` for directories, the name
    /// for caches.
    pub fn id(&self) -> String {
        match self {
            Resource::Directory { path, .. } => format!("src:{}", path),
            Resource::Cache { name } => name.clone(),
        }
    }
}

/// The validated, expanded graph of tasks plus named resources.
///
/// The pipeline exclusively owns its tasks and resources; its lifetime is
/// one invocation of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    /// Wire format version, informational (`"1"` or `"2"`).
    pub version: String,
    /// Tasks in declaration order; names are unique after validation.
    pub tasks: Vec<Task>,
    /// Resources keyed by id.
    pub resources: BTreeMap<String, Resource>,
}

impl Pipeline {
    /// Looks up a task by name.
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Outputs arrive either as a name-to-path map or as a bare list; the
/// list form is normalised to `output_0`, `output_1`, ...
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OutputsWire {
    Map(BTreeMap<String, String>),
    List(Vec<String>),
}

impl OutputsWire {
    fn normalise(self) -> BTreeMap<String, String> {
        match self {
            OutputsWire::Map(map) => map,
            OutputsWire::List(paths) => paths
                .into_iter()
                .enumerate()
                .map(|(i, p)| (format!("output_{}", i), p))
                .collect(),
        }
    }
}

/// Matrix dimension values may be strings, numbers or booleans on the
/// wire; all are carried as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScalarWire {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ScalarWire {
    fn into_string(self) -> String {
        match self {
            ScalarWire::String(s) => s,
            ScalarWire::Int(n) => n.to_string(),
            ScalarWire::Float(f) => f.to_string(),
            ScalarWire::Bool(b) => b.to_string(),
        }
    }
}

/// Deserialises the matrix map preserving dimension declaration order;
/// variant names are hyphen-joined in that order.
fn deserialize_matrix<'de, D>(deserializer: D) -> Result<Vec<(String, Vec<String>)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct MatrixVisitor;

    impl<'de> Visitor<'de> for MatrixVisitor {
        type Value = Vec<(String, Vec<String>)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of dimension name to list of values")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut dims = Vec::new();
            while let Some((key, values)) = map.next_entry::<String, Vec<ScalarWire>>()? {
                dims.push((key, values.into_iter().map(ScalarWire::into_string).collect()));
            }
            Ok(dims)
        }
    }

    deserializer.deserialize_map(MatrixVisitor)
}

#[derive(Debug, Deserialize)]
struct TaskWire {
    name: String,
    command: String,
    #[serde(default)]
    container: Option<String>,
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    mounts: Vec<Mount>,
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default)]
    outputs: Option<OutputsWire>,
    #[serde(default)]
    depends_on: Vec<String>,
    /// Preferred condition field.
    #[serde(default)]
    when: Option<String>,
    /// Legacy condition field; `when` wins when both are present.
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    secrets: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_matrix")]
    matrix: Vec<(String, Vec<String>)>,
    #[serde(default)]
    services: Vec<Service>,
    #[serde(default)]
    retry: Option<u32>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    task_inputs: Vec<TaskInput>,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    provides: Vec<Provide>,
    #[serde(default)]
    needs: Vec<String>,
    #[serde(default)]
    gate: Option<Gate>,
    #[serde(default)]
    oidc: Option<OidcBinding>,
}

impl TaskWire {
    fn normalise(self) -> Task {
        Task {
            name: self.name,
            command: self.command,
            container: self.container,
            workdir: self.workdir,
            env: self.env,
            mounts: self.mounts,
            inputs: self.inputs,
            outputs: self.outputs.map(OutputsWire::normalise).unwrap_or_default(),
            depends_on: self.depends_on,
            condition: self.when.or(self.condition),
            secrets: self.secrets,
            matrix: self.matrix,
            matrix_values: Vec::new(),
            services: self.services,
            retry: self.retry,
            timeout: self.timeout,
            task_inputs: self.task_inputs,
            requires: self.requires,
            provides: self.provides,
            needs: self.needs,
            gate: self.gate,
            oidc: self.oidc,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PipelineWire {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    resources: BTreeMap<String, Resource>,
    tasks: Vec<TaskWire>,
}

fn default_version() -> String {
    "1".to_string()
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parses a pipeline description from a JSON string.
///
/// Fails with [`SykliError::InvalidJson`] when the input is not JSON at
/// all, or [`SykliError::Schema`] when a required field is absent or has
/// the wrong type. Unknown fields are ignored.
pub fn parse_pipeline(json: &str) -> Result<Pipeline, SykliError> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| SykliError::InvalidJson(e.to_string()))?;

    let wire: PipelineWire =
        serde_json::from_value(value).map_err(|e| SykliError::Schema(e.to_string()))?;

    let pipeline = Pipeline {
        version: wire.version,
        tasks: wire.tasks.into_iter().map(TaskWire::normalise).collect(),
        resources: wire.resources,
    };
    debug!(
        version = %pipeline.version,
        tasks = pipeline.tasks.len(),
        resources = pipeline.resources.len(),
        "parsed pipeline"
    );
    Ok(pipeline)
}

/// Loads and parses a pipeline description from a file.
#[tracing::instrument]
pub fn load_pipeline(path: &Utf8Path) -> Result<Pipeline, SykliError> {
    let json = fs::read_to_string(path)
        .map_err(|e| SykliError::io(format!("failed to read pipeline file: {}", path), e))?;
    parse_pipeline(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_pipeline() {
        let p = parse_pipeline(r#"{"tasks":[{"name":"a","command":"echo 1"}]}"#).unwrap();
        assert_eq!(p.version, "1");
        assert_eq!(p.tasks.len(), 1);
        assert_eq!(p.tasks[0].name, "a");
        assert_eq!(p.tasks[0].command, "echo 1");
        assert!(p.tasks[0].outputs.is_empty());
        assert!(p.tasks[0].task_inputs.is_empty());
    }

    #[test]
    fn test_invalid_json() {
        let err = parse_pipeline("not json {").unwrap_err();
        assert!(matches!(err, SykliError::InvalidJson(_)));
    }

    #[test]
    fn test_schema_error_on_missing_command() {
        let err = parse_pipeline(r#"{"tasks":[{"name":"a"}]}"#).unwrap_err();
        assert!(matches!(err, SykliError::Schema(_)));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let p = parse_pipeline(
            r#"{"tasks":[{"name":"a","command":"x","mystery":1}],"extra":true}"#,
        )
        .unwrap();
        assert_eq!(p.tasks[0].name, "a");
    }

    #[test]
    fn test_outputs_list_normalised() {
        let p = parse_pipeline(
            r#"{"tasks":[{"name":"a","command":"x","outputs":["bin/app","dist/"]}]}"#,
        )
        .unwrap();
        assert_eq!(p.tasks[0].outputs.get("output_0").unwrap(), "bin/app");
        assert_eq!(p.tasks[0].outputs.get("output_1").unwrap(), "dist/");
    }

    #[test]
    fn test_outputs_map_kept() {
        let p = parse_pipeline(
            r#"{"tasks":[{"name":"a","command":"x","outputs":{"app":"bin/app"}}]}"#,
        )
        .unwrap();
        assert_eq!(p.tasks[0].outputs.get("app").unwrap(), "bin/app");
    }

    #[test]
    fn test_when_wins_over_condition() {
        let p = parse_pipeline(
            r#"{"tasks":[{"name":"a","command":"x","when":"branch == 'main'","condition":"branch == 'dev'"}]}"#,
        )
        .unwrap();
        assert_eq!(p.tasks[0].condition.as_deref(), Some("branch == 'main'"));
    }

    #[test]
    fn test_legacy_condition_used_when_no_when() {
        let p = parse_pipeline(
            r#"{"tasks":[{"name":"a","command":"x","condition":"ci == 'true'"}]}"#,
        )
        .unwrap();
        assert_eq!(p.tasks[0].condition.as_deref(), Some("ci == 'true'"));
    }

    #[test]
    fn test_mount_kind_tagged() {
        let p = parse_pipeline(
            r#"{"version":"2",
                "resources":{"src:.":{"type":"directory","path":"."},
                             "cargo":{"type":"cache","name":"cargo"}},
                "tasks":[{"name":"a","command":"x","mounts":[
                    {"resource":"src:.","path":"/src","type":"directory"},
                    {"resource":"cargo","path":"/cargo","type":"cache"}]}]}"#,
        )
        .unwrap();
        assert_eq!(p.tasks[0].mounts[0].kind, MountKind::Directory);
        assert_eq!(p.tasks[0].mounts[1].kind, MountKind::Cache);
        assert_eq!(p.resources.get("src:.").unwrap().id(), "src:.");
        assert_eq!(p.resources.get("cargo").unwrap().id(), "cargo");
    }

    #[test]
    fn test_matrix_preserves_dimension_order() {
        let p = parse_pipeline(
            r#"{"tasks":[{"name":"t","command":"x","matrix":{"os":["linux","mac"],"ver":[1,2]}}]}"#,
        )
        .unwrap();
        let matrix = &p.tasks[0].matrix;
        assert_eq!(matrix[0].0, "os");
        assert_eq!(matrix[1].0, "ver");
        assert_eq!(matrix[1].1, vec!["1", "2"]);
    }

    #[test]
    fn test_provides_string_and_struct_forms() {
        let p = parse_pipeline(
            r#"{"tasks":[{"name":"a","command":"x",
                "provides":["db-ready",{"name":"api-url","value":"http://localhost:8080"}]}]}"#,
        )
        .unwrap();
        let provides = &p.tasks[0].provides;
        assert_eq!(provides[0].name, "db-ready");
        assert_eq!(provides[0].value, None);
        assert_eq!(provides[1].name, "api-url");
        assert_eq!(provides[1].value.as_deref(), Some("http://localhost:8080"));
    }

    #[test]
    fn test_task_defaults() {
        let t = Task::new("t", "echo");
        assert_eq!(t.attempts(), 1);
        assert_eq!(t.timeout_secs(), DEFAULT_TIMEOUT_SECS);

        let mut retried = Task::new("t", "echo");
        retried.retry = Some(0);
        assert_eq!(retried.attempts(), 1);
        retried.retry = Some(3);
        assert_eq!(retried.attempts(), 3);
    }

    #[test]
    fn test_gate_parsed() {
        let p = parse_pipeline(
            r#"{"tasks":[{"name":"deploy","command":"x",
                "gate":{"strategy":"env","message":"ship it?","timeout_s":120,"env_var":"APPROVE"}}]}"#,
        )
        .unwrap();
        let gate = p.tasks[0].gate.as_ref().unwrap();
        assert_eq!(gate.strategy, GateStrategy::Env);
        assert_eq!(gate.timeout_s, 120);
        assert_eq!(gate.env_var.as_deref(), Some("APPROVE"));
    }
}

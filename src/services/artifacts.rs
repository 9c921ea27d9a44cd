//! Resolution of `task_inputs`: artifacts consumed from other tasks'
//! declared outputs.
//!
//! Separated from the orchestrator so both list-form and map-form outputs
//! resolve through the same lookup, and so misses produce precise errors
//! before any copy is attempted.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::SykliError;
use crate::graph::Task;

/// A resolved artifact copy: source output path to destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    /// The producing task.
    pub from_task: String,
    /// The output path as declared by the producing task.
    pub source_path: String,
    /// Destination path, relative to the pipeline workdir.
    pub dest: String,
}

/// Resolves every `task_inputs` entry of `task` against the outputs
/// declared across the graph.
///
/// `outputs_by_task` maps task name to its normalised output map (list
/// forms were already normalised to `output_N` keys at parse time).
pub fn resolve(
    task: &Task,
    outputs_by_task: &BTreeMap<String, BTreeMap<String, String>>,
) -> Result<Vec<ResolvedInput>, SykliError> {
    let mut resolved = Vec::with_capacity(task.task_inputs.len());

    for input in &task.task_inputs {
        let Some(outputs) = outputs_by_task.get(&input.from_task) else {
            return Err(SykliError::SourceTaskNotFound {
                task: task.name.clone(),
                from_task: input.from_task.clone(),
            });
        };
        let Some(source_path) = outputs.get(&input.output_name) else {
            return Err(SykliError::OutputNotFound {
                from_task: input.from_task.clone(),
                output: input.output_name.clone(),
            });
        };
        resolved.push(ResolvedInput {
            from_task: input.from_task.clone(),
            source_path: source_path.clone(),
            dest: input.dest.clone(),
        });
    }

    if !resolved.is_empty() {
        debug!(task = %task.name, inputs = resolved.len(), "resolved task inputs");
    }
    Ok(resolved)
}

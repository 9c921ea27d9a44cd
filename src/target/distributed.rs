//! Distributed target: selects remote nodes by labels and dispatches
//! tasks to them, falling back through candidates in order.
//!
//! The cluster layer (how nodes find each other, the RPC transport) is
//! an external collaborator behind the [`Mesh`] trait; the core only
//! selects and dispatches. Secrets, artifacts and services keep their
//! local-only semantics and delegate to the wrapped local target:
//! artifacts are *not* transported between nodes, which is a documented
//! limitation of distributed mode, not an error the target raises.

use tracing::{debug, warn};

use crate::error::SykliError;
use crate::target::local::LocalTarget;
use crate::target::{Secrets, Services, Storage, Target, TaskOutcome, TaskSpec};

/// The reserved node id meaning "run on the current node via the wrapped
/// local target".
pub const LOCAL_NODE: &str = "local";

/// A candidate node advertised by the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    /// Node id; [`LOCAL_NODE`] is reserved for the current node.
    pub id: String,
    /// Label tags the node advertises, matched against task `requires`.
    pub labels: Vec<String>,
}

/// Cluster discovery and RPC dispatch, implemented outside the core.
pub trait Mesh: Send + Sync {
    /// Candidate nodes, in preference order.
    fn candidates(&self) -> Vec<NodeDescriptor>;

    /// Dispatches a task to a remote node and waits for its outcome.
    /// An `Err` is an RPC failure; the selector advances to the next
    /// candidate.
    fn dispatch(&self, node: &str, spec: &TaskSpec) -> Result<TaskOutcome, SykliError>;
}

/// Mesh for single-node deployments: the only candidate is the local
/// sentinel, carrying the labels advertised through `SYKLI_NODE_LABELS`
/// (comma-separated). The real cluster discovery layer lives outside the
/// core and replaces this wholesale.
pub struct LocalOnlyMesh;

impl Mesh for LocalOnlyMesh {
    fn candidates(&self) -> Vec<NodeDescriptor> {
        let labels = std::env::var("SYKLI_NODE_LABELS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        vec![NodeDescriptor {
            id: LOCAL_NODE.to_string(),
            labels,
        }]
    }

    fn dispatch(&self, node: &str, spec: &TaskSpec) -> Result<TaskOutcome, SykliError> {
        Err(SykliError::Placement {
            task: spec.name.clone(),
            reason: format!("no RPC transport for node {:?}", node),
        })
    }
}

/// Filters candidates by required labels and tries them in order through
/// a runner function.
pub struct NodeSelector;

impl NodeSelector {
    /// Returns the candidates whose labels cover every required tag,
    /// preserving mesh order.
    pub fn filter<'a>(
        candidates: &'a [NodeDescriptor],
        requires: &[String],
    ) -> Vec<&'a NodeDescriptor> {
        candidates
            .iter()
            .filter(|node| requires.iter().all(|tag| node.labels.contains(tag)))
            .collect()
    }

    /// Tries each eligible candidate through `runner` until one accepts
    /// the dispatch. A runner `Err` advances to the next candidate; no
    /// eligible node or all candidates failing yields `Placement`.
    pub fn run(
        task: &str,
        requires: &[String],
        candidates: &[NodeDescriptor],
        mut runner: impl FnMut(&NodeDescriptor) -> Result<TaskOutcome, SykliError>,
    ) -> Result<TaskOutcome, SykliError> {
        let eligible = Self::filter(candidates, requires);
        if eligible.is_empty() {
            return Err(SykliError::Placement {
                task: task.to_string(),
                reason: format!(
                    "no node satisfies required labels {:?} ({} candidates)",
                    requires,
                    candidates.len()
                ),
            });
        }

        let mut last_error = None;
        for node in &eligible {
            match runner(node) {
                Ok(outcome) => {
                    debug!(task, node = %node.id, "task placed");
                    return Ok(outcome);
                }
                Err(e) => {
                    warn!(task, node = %node.id, error = %e, "dispatch failed, trying next candidate");
                    last_error = Some(e);
                }
            }
        }

        Err(SykliError::Placement {
            task: task.to_string(),
            reason: format!(
                "all {} eligible nodes failed; last error: {}",
                eligible.len(),
                last_error.map(|e| e.to_string()).unwrap_or_default()
            ),
        })
    }
}

/// Wraps a local target with mesh-based node selection.
pub struct DistributedTarget {
    local: LocalTarget,
    mesh: Box<dyn Mesh>,
}

impl DistributedTarget {
    /// Creates a distributed target over the given mesh; the local
    /// target serves the `local` sentinel and every local-only
    /// capability.
    pub fn new(local: LocalTarget, mesh: Box<dyn Mesh>) -> Self {
        Self { local, mesh }
    }

}

impl Target for DistributedTarget {
    fn name(&self) -> &'static str {
        "distributed"
    }

    fn run_task(&self, spec: &TaskSpec) -> TaskOutcome {
        let candidates = self.mesh.candidates();
        let result = NodeSelector::run(&spec.name, &spec.requires, &candidates, |node| {
            if node.id == LOCAL_NODE {
                Ok(self.local.run_task(spec))
            } else {
                self.mesh.dispatch(&node.id, spec)
            }
        });
        match result {
            Ok(outcome) => outcome,
            Err(e) => TaskOutcome::failed(e, std::time::Duration::ZERO),
        }
    }

    fn secrets(&self) -> Option<&dyn Secrets> {
        self.local.secrets()
    }

    fn storage(&self) -> Option<&dyn Storage> {
        self.local.storage()
    }

    fn services(&self) -> Option<&dyn Services> {
        self.local.services()
    }
}

//! Structural validation of the normalised task graph.
//!
//! Checks run in a fixed order, accumulating every finding rather than
//! stopping at the first: empty names, duplicates, self-dependencies,
//! missing dependencies, then cycles. Validation errors abort the run
//! before any task starts, so reporting them together saves the author a
//! round trip per mistake.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::SykliError;
use crate::graph::Task;

/// Task names are restricted so they can appear in container, network and
/// cache-volume names without escaping.
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static name pattern"));

/// Returns true if `name` is a well-formed task name.
pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

/// Outcome of validating a task graph.
#[derive(Debug)]
pub struct ValidationReport {
    /// True when no errors were found.
    pub valid: bool,
    /// Every error found, in check order.
    pub errors: Vec<SykliError>,
    /// Non-fatal findings, e.g. `no_tasks`.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn push_error(&mut self, err: SykliError) {
        self.valid = false;
        self.errors.push(err);
    }
}

/// DFS colouring for cycle detection.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    /// Not yet visited.
    White,
    /// On the current DFS stack.
    Grey,
    /// Fully explored.
    Black,
}

/// Validates the normalised graph, accumulating every finding.
///
/// An empty task list is a warning, not an error: an SDK that emits no
/// tasks produced a pipeline that trivially succeeds.
pub fn validate(tasks: &[Task]) -> ValidationReport {
    let mut report = ValidationReport::new();

    if tasks.is_empty() {
        report.warnings.push("no_tasks".to_string());
        return report;
    }

    // 1. Empty or malformed names.
    for task in tasks {
        if task.name.is_empty() {
            report.push_error(SykliError::EmptyName);
        } else if !is_valid_name(&task.name) {
            report.push_error(SykliError::Schema(format!(
                "task name {:?} contains characters outside [A-Za-z0-9_-]",
                task.name
            )));
        }
    }

    // 2. Duplicates.
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for task in tasks {
        *seen.entry(task.name.as_str()).or_insert(0) += 1;
    }
    for (name, count) in &seen {
        if *count > 1 {
            report.push_error(SykliError::DuplicateTask {
                name: (*name).to_string(),
            });
        }
    }

    // 3. Self-dependencies.
    for task in tasks {
        if task.depends_on.iter().any(|d| d == &task.name) {
            report.push_error(SykliError::SelfDependency {
                task: task.name.clone(),
            });
        }
    }

    // 4. Missing dependencies.
    for task in tasks {
        for dep in &task.depends_on {
            if !seen.contains_key(dep.as_str()) {
                report.push_error(SykliError::MissingDependency {
                    task: task.name.clone(),
                    dep: dep.clone(),
                });
            }
        }
    }

    // 5. Cycles. Self-loops were reported above as SelfDependency; they
    // also surface here as length-1 cycles, matching the taxonomy.
    for cycle in find_cycles(tasks) {
        report.push_error(SykliError::Cycle { path: cycle });
    }

    debug!(
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "validated graph"
    );
    report
}

/// Finds dependency cycles via three-colour DFS.
///
/// A grey edge (back edge onto the current stack) marks a cycle; the path
/// is reconstructed by walking parent pointers from the back-edge source
/// up to the target, then closed back to the target.
fn find_cycles(tasks: &[Task]) -> Vec<Vec<String>> {
    let index: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    let mut colour = vec![Colour::White; tasks.len()];
    let mut parent: Vec<Option<usize>> = vec![None; tasks.len()];
    let mut cycles = Vec::new();

    for start in 0..tasks.len() {
        if colour[start] != Colour::White {
            continue;
        }
        // Iterative DFS; entries are (node, next-edge cursor).
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        colour[start] = Colour::Grey;

        while let Some(top) = stack.last_mut() {
            let (node, edge) = *top;
            if edge >= tasks[node].depends_on.len() {
                colour[node] = Colour::Black;
                stack.pop();
                continue;
            }
            top.1 += 1;

            let Some(&next) = index.get(tasks[node].depends_on[edge].as_str()) else {
                // Missing deps were already reported; skip the edge.
                continue;
            };
            match colour[next] {
                Colour::White => {
                    parent[next] = Some(node);
                    colour[next] = Colour::Grey;
                    stack.push((next, 0));
                }
                Colour::Grey => {
                    cycles.push(reconstruct_cycle(tasks, &parent, node, next));
                }
                Colour::Black => {}
            }
        }
    }

    cycles
}

/// Walks parent pointers from the back-edge source back to the target and
/// emits the closed cycle path.
fn reconstruct_cycle(
    tasks: &[Task],
    parent: &[Option<usize>],
    from: usize,
    to: usize,
) -> Vec<String> {
    let mut path = vec![tasks[from].name.clone()];
    let mut node = from;
    while node != to {
        match parent[node] {
            Some(p) => {
                node = p;
                path.push(tasks[node].name.clone());
            }
            None => break,
        }
    }
    path.reverse();
    path.push(tasks[to].name.clone());
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, deps: &[&str]) -> Task {
        let mut t = Task::new(name, "true");
        t.depends_on = deps.iter().map(|s| s.to_string()).collect();
        t
    }

    #[test]
    fn test_empty_graph_warns() {
        let report = validate(&[]);
        assert!(report.valid);
        assert_eq!(report.warnings, vec!["no_tasks"]);
    }

    #[test]
    fn test_valid_linear_graph() {
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];
        let report = validate(&tasks);
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_empty_name() {
        let tasks = vec![task("", &[])];
        let report = validate(&tasks);
        assert!(!report.valid);
        assert!(matches!(report.errors[0], SykliError::EmptyName));
    }

    #[test]
    fn test_invalid_name_characters() {
        let tasks = vec![task("has space", &[])];
        let report = validate(&tasks);
        assert!(!report.valid);
        assert!(matches!(report.errors[0], SykliError::Schema(_)));
    }

    #[test]
    fn test_duplicate_names() {
        let tasks = vec![task("a", &[]), task("a", &[])];
        let report = validate(&tasks);
        assert!(!report.valid);
        assert!(
            report
                .errors
                .iter()
                .any(|e| matches!(e, SykliError::DuplicateTask { name } if name == "a"))
        );
    }

    #[test]
    fn test_self_dependency() {
        let tasks = vec![task("a", &["a"])];
        let report = validate(&tasks);
        assert!(!report.valid);
        assert!(
            report
                .errors
                .iter()
                .any(|e| matches!(e, SykliError::SelfDependency { task } if task == "a"))
        );
        // Self-loops also surface as length-1 cycles.
        assert!(report.errors.iter().any(
            |e| matches!(e, SykliError::Cycle { path } if path == &["a".to_string(), "a".to_string()])
        ));
    }

    #[test]
    fn test_missing_dependency() {
        let tasks = vec![task("a", &["ghost"])];
        let report = validate(&tasks);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| matches!(
            e,
            SykliError::MissingDependency { task, dep } if task == "a" && dep == "ghost"
        )));
    }

    #[test]
    fn test_two_task_cycle() {
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];
        let report = validate(&tasks);
        assert!(!report.valid);
        let cycle = report
            .errors
            .iter()
            .find_map(|e| match e {
                SykliError::Cycle { path } => Some(path),
                _ => None,
            })
            .expect("cycle reported");
        // Any rotation containing both names, closed back to its start.
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.contains(&"a".to_string()));
        assert!(cycle.contains(&"b".to_string()));
    }

    #[test]
    fn test_longer_cycle_path() {
        let tasks = vec![
            task("a", &["c"]),
            task("b", &["a"]),
            task("c", &["b"]),
            task("d", &["a"]),
        ];
        let report = validate(&tasks);
        assert!(!report.valid);
        let cycle = report
            .errors
            .iter()
            .find_map(|e| match e {
                SykliError::Cycle { path } => Some(path),
                _ => None,
            })
            .expect("cycle reported");
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ];
        let report = validate(&tasks);
        assert!(report.valid, "diamond graphs are DAGs: {:?}", report.errors);
    }

    #[test]
    fn test_errors_accumulate() {
        let tasks = vec![task("", &[]), task("a", &["a"]), task("b", &["ghost"])];
        let report = validate(&tasks);
        assert!(!report.valid);
        assert!(report.errors.len() >= 3);
    }
}

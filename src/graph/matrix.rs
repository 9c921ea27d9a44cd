//! Matrix expansion: one declared task becomes one concrete variant per
//! combination of its matrix dimension values.
//!
//! Expansion happens after validation and before capability resolution.
//! Each variant is named `original-v1-v2-...` (hyphen-joined in dimension
//! declaration order), binds each dimension name in its environment, and
//! records the combination in `matrix_values`. The original task is
//! removed and every dependant's `depends_on` entry is rewritten to the
//! full set of variant names, preserving order.

use std::collections::BTreeMap;

use tracing::debug;

use crate::graph::Task;

/// Expands every matrixed task in `tasks` into concrete variants and
/// rewrites dependants. Tasks without a matrix pass through unchanged, so
/// the operation is idempotent on already-expanded graphs.
pub fn expand(tasks: Vec<Task>) -> Vec<Task> {
    // First pass: expand, remembering original -> variant-name mappings.
    let mut expanded: Vec<Task> = Vec::with_capacity(tasks.len());
    let mut rewrites: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for task in tasks {
        if task.matrix.is_empty() {
            expanded.push(task);
            continue;
        }

        let combinations = cartesian(&task.matrix);
        debug!(
            task = %task.name,
            dimensions = task.matrix.len(),
            variants = combinations.len(),
            "expanding matrix"
        );

        let mut variant_names = Vec::with_capacity(combinations.len());
        for combo in combinations {
            let variant = instantiate(&task, &combo);
            variant_names.push(variant.name.clone());
            expanded.push(variant);
        }
        rewrites.insert(task.name.clone(), variant_names);
    }

    // Second pass: rewrite dependants to the full variant set, in place,
    // preserving the position of the original entry.
    if !rewrites.is_empty() {
        for task in &mut expanded {
            if task.depends_on.iter().any(|d| rewrites.contains_key(d)) {
                let mut new_deps = Vec::with_capacity(task.depends_on.len());
                for dep in task.depends_on.drain(..) {
                    match rewrites.get(&dep) {
                        Some(variants) => new_deps.extend(variants.iter().cloned()),
                        None => new_deps.push(dep),
                    }
                }
                task.depends_on = new_deps;
            }
        }
    }

    expanded
}

/// Builds one concrete variant for a single dimension-value combination.
fn instantiate(task: &Task, combo: &[(String, String)]) -> Task {
    let mut variant = task.clone();
    variant.matrix = Vec::new();

    let suffix: Vec<&str> = combo.iter().map(|(_, v)| v.as_str()).collect();
    variant.name = format!("{}-{}", task.name, suffix.join("-"));

    for (dim, value) in combo {
        variant.env.insert(dim.clone(), value.clone());
    }
    variant.matrix_values = combo.to_vec();
    variant
}

/// Cartesian product of dimension values, in declaration order.
fn cartesian(matrix: &[(String, Vec<String>)]) -> Vec<Vec<(String, String)>> {
    let mut combos: Vec<Vec<(String, String)>> = vec![Vec::new()];
    for (dim, values) in matrix {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut extended = combo.clone();
                extended.push((dim.clone(), value.clone()));
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

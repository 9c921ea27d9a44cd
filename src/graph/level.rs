//! Topological levelling: groups tasks into ordered buckets by
//! dependency depth.
//!
//! A task's level is `0` when it has no dependencies, otherwise
//! `1 + max(level(dep))`. Tasks within a level are independent of each
//! other and run concurrently; levels form barriers. Levelling assumes a
//! validated (acyclic) graph.

use std::collections::HashMap;

use crate::graph::Task;

/// Assigns each task its dependency depth and returns the ordered level
/// buckets. Within a bucket, the original declaration order is kept.
pub fn assign(tasks: &[Task]) -> Vec<Vec<&Task>> {
    let index: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    let mut levels: Vec<Option<usize>> = vec![None; tasks.len()];

    fn level_of(
        i: usize,
        tasks: &[Task],
        index: &HashMap<&str, usize>,
        levels: &mut Vec<Option<usize>>,
    ) -> usize {
        if let Some(l) = levels[i] {
            return l;
        }
        let l = tasks[i]
            .depends_on
            .iter()
            .filter_map(|d| index.get(d.as_str()).copied())
            .map(|dep| level_of(dep, tasks, index, levels) + 1)
            .max()
            .unwrap_or(0);
        levels[i] = Some(l);
        l
    }

    let mut max_level = 0;
    for i in 0..tasks.len() {
        max_level = max_level.max(level_of(i, tasks, &index, &mut levels));
    }

    let mut buckets: Vec<Vec<&Task>> = vec![Vec::new(); if tasks.is_empty() { 0 } else { max_level + 1 }];
    for (i, task) in tasks.iter().enumerate() {
        buckets[levels[i].expect("level assigned")].push(task);
    }
    buckets
}

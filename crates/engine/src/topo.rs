// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topological sort and level batching (component F): Kahn's algorithm
//! with input-order tie-breaking for full determinism, then a level
//! partition so the executor can dispatch each batch in parallel.

use std::collections::{HashMap, HashSet, VecDeque};
use wf_core::ExecutorError;

/// A DAG node as seen by the scheduler: its id and its declared deps.
#[derive(Debug, Clone)]
pub struct StepNode {
    pub id: String,
    pub deps: Vec<String>,
}

/// Sort `steps` into a valid topological order. Ties (multiple indegree-0
/// nodes) resolve in input order.
pub fn topo_sort(steps: &[StepNode]) -> Result<Vec<String>, ExecutorError> {
    let mut seen = HashSet::new();
    for s in steps {
        if !seen.insert(s.id.as_str()) {
            return Err(ExecutorError::DuplicateStepId(s.id.clone()));
        }
    }

    let ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    for s in steps {
        for dep in &s.deps {
            if !ids.contains(dep.as_str()) {
                return Err(ExecutorError::MissingDependency {
                    step: s.id.clone(),
                    missing: dep.clone(),
                });
            }
        }
    }

    // Position in the input order, used both for initial ready-order and
    // for inserting newly-ready nodes at the right tie-break slot.
    let input_pos: HashMap<&str, usize> = steps.iter().enumerate().map(|(i, s)| (s.id.as_str(), i)).collect();

    let mut indegree: HashMap<&str, usize> = steps.iter().map(|s| (s.id.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = steps.iter().map(|s| (s.id.as_str(), Vec::new())).collect();
    for s in steps {
        for dep in &s.deps {
            *indegree.entry(s.id.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(s.id.as_str());
        }
    }

    // `steps` order defines tie-break priority among ready nodes.
    let mut ready: VecDeque<&str> = VecDeque::new();
    for s in steps {
        if indegree.get(s.id.as_str()).copied().unwrap_or(0) == 0 {
            ready.push_back(s.id.as_str());
        }
    }

    let mut order = Vec::with_capacity(steps.len());
    while let Some(id) = ready.pop_front() {
        order.push(id.to_string());
        let Some(dependents_of_id) = dependents.get(id) else {
            continue;
        };
        for &dependent in dependents_of_id {
            let entry = indegree.entry(dependent).or_insert(0);
            *entry = entry.saturating_sub(1);
            if *entry == 0 {
                let pos = input_pos.get(dependent).copied().unwrap_or(usize::MAX);
                let insert_at = ready
                    .iter()
                    .position(|r| input_pos.get(r).copied().unwrap_or(usize::MAX) > pos)
                    .unwrap_or(ready.len());
                ready.insert(insert_at, dependent);
            }
        }
    }

    if order.len() != steps.len() {
        let remaining: Vec<String> = steps
            .iter()
            .map(|s| s.id.clone())
            .filter(|id| !order.contains(id))
            .collect();
        return Err(ExecutorError::CycleDetected(remaining));
    }

    Ok(order)
}

/// Partition an already-sorted step list into level batches.
/// `level(s) = 0` if `deps` is empty, else `1 + max(level(d) for d in deps)`.
pub fn group_into_batches(sorted: &[String], steps: &[StepNode]) -> Vec<Vec<String>> {
    let deps_by_id: HashMap<&str, &[String]> = steps.iter().map(|s| (s.id.as_str(), s.deps.as_slice())).collect();
    let mut level_of: HashMap<&str, usize> = HashMap::new();

    for id in sorted {
        let deps = deps_by_id.get(id.as_str()).copied().unwrap_or(&[]);
        let level = deps
            .iter()
            .map(|d| level_of.get(d.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        level_of.insert(id.as_str(), level);
    }

    let max_level = level_of.values().copied().max().unwrap_or(0);
    let mut batches: Vec<Vec<String>> = vec![Vec::new(); max_level + 1];
    for id in sorted {
        let level = level_of.get(id.as_str()).copied().unwrap_or(0);
        batches[level].push(id.clone());
    }
    batches
}

#[cfg(test)]
#[path = "topo_tests.rs"]
mod tests;

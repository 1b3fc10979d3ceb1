//! Structural validation for task dependency graphs.
//!
//! The builder takes a candidate task set (already-inserted tasks plus a new
//! batch) and rejects duplicates, unknown dependencies, edges that point into
//! a later phase, and cycles. Cycle detection only ever runs here, at
//! insertion time, so the scheduler can assume an acyclic graph.

use crate::dag::task::Task;
use crate::errors::{PlannerError, Result};
use std::collections::HashMap;

/// Validator over a candidate task set.
pub struct DagBuilder<'a> {
    tasks: &'a [Task],
}

impl<'a> DagBuilder<'a> {
    /// Create a new builder over the given tasks.
    pub fn new(tasks: &'a [Task]) -> Self {
        Self { tasks }
    }

    /// Validate the graph structure:
    /// - Task ids must be unique
    /// - All dependencies must reference existing tasks
    /// - A dependency may not belong to a later phase than its dependent
    /// - No cycles are allowed
    pub fn validate(self) -> Result<()> {
        let mut index_map = HashMap::with_capacity(self.tasks.len());
        for (i, task) in self.tasks.iter().enumerate() {
            if index_map.insert(task.id.as_str(), i).is_some() {
                return Err(PlannerError::DuplicateTask {
                    task_id: task.id.clone(),
                });
            }
        }

        // index -> tasks that depend on it
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.tasks.len()];
        let mut in_degree: Vec<usize> = vec![0; self.tasks.len()];

        for (to_idx, task) in self.tasks.iter().enumerate() {
            for dep in &task.depends_on {
                let from_idx = *index_map.get(dep.as_str()).ok_or_else(|| {
                    PlannerError::UnknownDependency {
                        task_id: task.id.clone(),
                        dependency: dep.clone(),
                    }
                })?;

                let upstream = &self.tasks[from_idx];
                if upstream.phase > task.phase {
                    return Err(PlannerError::LaterPhaseDependency {
                        task_id: task.id.clone(),
                        phase: task.phase,
                        dependency: dep.clone(),
                        dependency_phase: upstream.phase,
                    });
                }

                dependents[from_idx].push(to_idx);
                in_degree[to_idx] += 1;
            }
        }

        self.validate_no_cycles(&dependents, in_degree)
    }

    /// Kahn's algorithm: every node must drain to in-degree zero.
    fn validate_no_cycles(&self, dependents: &[Vec<usize>], mut in_degree: Vec<usize>) -> Result<()> {
        let mut queue: Vec<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();
        let mut processed = 0;

        while let Some(node) = queue.pop() {
            processed += 1;
            for &dependent in &dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if processed != self.tasks.len() {
            let tasks: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .filter_map(|(i, _)| self.tasks.get(i).map(|t| t.id.clone()))
                .collect();

            return Err(PlannerError::CyclicDependency { tasks });
        }

        Ok(())
    }
}

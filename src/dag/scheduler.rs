//! Task graph: holds tasks, enforces status transitions and selects ready work.
//!
//! Selection is deterministic. Among pending tasks of the requested phase
//! whose dependencies are all completed, the scheduler prefers the task with
//! the fewest unmet soft-priority hints, then the lowest insertion sequence.

use crate::dag::builder::DagBuilder;
use crate::dag::task::{Task, TaskStatus};
use crate::errors::{PlannerError, Result};
use crate::phase::ProjectPhase;
use std::collections::{HashMap, HashSet};

/// The set of work items and their dependency edges.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    /// Inserted tasks in insertion order
    tasks: Vec<Task>,
    /// Definitions known to the plan but not inserted yet
    deferred: Vec<Task>,
    /// Map from task id to position in `tasks`
    index: HashMap<String, usize>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from persisted parts, re-validating its structure.
    pub fn from_parts(tasks: Vec<Task>, deferred: Vec<Task>) -> Result<Self> {
        DagBuilder::new(&tasks).validate()?;
        let index = Self::build_index(&tasks);
        Ok(Self {
            tasks,
            deferred,
            index,
        })
    }

    fn build_index(tasks: &[Task]) -> HashMap<String, usize> {
        tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect()
    }

    /// Get all inserted tasks in insertion order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Get the deferred (not yet inserted) definitions.
    pub fn deferred(&self) -> &[Task] {
        &self.deferred
    }

    /// Get the number of inserted tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if no task has been inserted.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Get a task by id.
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id).and_then(|&i| self.tasks.get(i))
    }

    /// Check if a task id is inserted.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Get a deferred definition by id.
    pub fn deferred_definition(&self, id: &str) -> Option<&Task> {
        self.deferred.iter().find(|t| t.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Task> {
        let i = *self.index.get(id).ok_or_else(|| PlannerError::UnknownTask {
            task_id: id.to_string(),
        })?;
        Ok(&mut self.tasks[i])
    }

    fn next_sequence(&self) -> u64 {
        self.tasks
            .iter()
            .map(|t| t.sequence)
            .max()
            .map_or(0, |max| max + 1)
    }

    /// Insert a batch of tasks created during planning.
    ///
    /// The batch is validated together with the already-inserted tasks:
    /// duplicate ids, unknown dependencies and cycles reject the whole batch
    /// and leave the graph untouched. `deferred` definitions are kept aside as
    /// the synthesis source for dependency blockers.
    pub fn insert_batch(&mut self, batch: Vec<Task>, deferred: Vec<Task>) -> Result<Vec<String>> {
        let mut sequence = self.next_sequence();
        let mut candidate = self.tasks.clone();
        let mut inserted = Vec::with_capacity(batch.len());

        for mut task in batch {
            task.status = TaskStatus::Pending;
            task.outputs.clear();
            task.blocked_reason = None;
            task.touched.clear();
            task.requeued = false;
            task.sequence = sequence;
            sequence += 1;
            inserted.push(task.id.clone());
            candidate.push(task);
        }

        DagBuilder::new(&candidate).validate()?;

        let mut known: HashSet<&str> = candidate.iter().map(|t| t.id.as_str()).collect();
        known.extend(self.deferred.iter().map(|t| t.id.as_str()));
        for definition in &deferred {
            if !known.insert(definition.id.as_str()) {
                return Err(PlannerError::DuplicateTask {
                    task_id: definition.id.clone(),
                });
            }
        }
        // A deferred definition may lean on inserted tasks or on other definitions
        for definition in &deferred {
            if let Some(dep) = definition.depends_on.iter().find(|d| !known.contains(d.as_str())) {
                return Err(PlannerError::UnknownDependency {
                    task_id: definition.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        self.index = Self::build_index(&candidate);
        self.tasks = candidate;
        self.deferred.extend(deferred);

        Ok(inserted)
    }

    /// Re-run structural validation over the inserted tasks.
    pub fn validate(&self) -> Result<()> {
        DagBuilder::new(&self.tasks).validate()
    }

    /// Check if every dependency of a task is completed.
    pub fn dependencies_completed(&self, task: &Task) -> bool {
        task.depends_on
            .iter()
            .all(|dep| self.get(dep).is_some_and(|d| d.status.is_completed()))
    }

    fn unmet_hints(&self, task: &Task) -> usize {
        task.hints
            .iter()
            .filter(|hint| self.get(hint).is_some_and(|h| !h.status.is_completed()))
            .count()
    }

    /// Select the next task to run in `phase`.
    ///
    /// Returns `None` when nothing qualifies; use [`TaskGraph::has_blocked`]
    /// to tell a finished phase from a stalled one.
    pub fn next_ready_task(&self, phase: ProjectPhase) -> Option<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && t.phase == phase)
            .filter(|t| self.dependencies_completed(t))
            .min_by_key(|t| (self.unmet_hints(t), t.sequence))
    }

    /// Check if any task of `phase` is blocked.
    pub fn has_blocked(&self, phase: ProjectPhase) -> bool {
        self.tasks
            .iter()
            .any(|t| t.phase == phase && t.status == TaskStatus::Blocked)
    }

    /// Ids of tasks in `phase` that are not completed.
    pub fn outstanding(&self, phase: ProjectPhase) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.phase == phase && t.status.is_outstanding())
            .map(|t| t.id.clone())
            .collect()
    }

    /// Tasks belonging to `phase`, in insertion order.
    pub fn tasks_in_phase(&self, phase: ProjectPhase) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.phase == phase).collect()
    }

    /// Move a pending task with completed dependencies to `in_progress`.
    ///
    /// Returns whether the task had been re-queued from `blocked`.
    pub fn mark_in_progress(&mut self, id: &str) -> Result<bool> {
        let ready = {
            let task = self.get(id).ok_or_else(|| PlannerError::UnknownTask {
                task_id: id.to_string(),
            })?;
            task.status == TaskStatus::Pending && self.dependencies_completed(task)
        };

        let task = self.get_mut(id)?;
        if !ready {
            return Err(PlannerError::InvalidTransition {
                task_id: id.to_string(),
                from: task.status,
                to: TaskStatus::InProgress,
            });
        }

        task.status = TaskStatus::InProgress;
        Ok(std::mem::take(&mut task.requeued))
    }

    /// Complete an `in_progress` task with its outputs.
    pub fn mark_completed(&mut self, id: &str, outputs: Vec<String>) -> Result<()> {
        let task = self.get_mut(id)?;
        if task.status != TaskStatus::InProgress {
            return Err(PlannerError::InvalidTransition {
                task_id: id.to_string(),
                from: task.status,
                to: TaskStatus::Completed,
            });
        }

        task.status = TaskStatus::Completed;
        task.outputs = outputs;
        task.blocked_reason = None;
        task.touched.clear();
        Ok(())
    }

    /// Block an `in_progress` task.
    pub fn mark_blocked(&mut self, id: &str, reason: &str) -> Result<()> {
        let task = self.get_mut(id)?;
        if task.status != TaskStatus::InProgress {
            return Err(PlannerError::InvalidTransition {
                task_id: id.to_string(),
                from: task.status,
                to: TaskStatus::Blocked,
            });
        }

        task.status = TaskStatus::Blocked;
        task.blocked_reason = Some(reason.to_string());
        Ok(())
    }

    /// Return tasks left `in_progress` by an interrupted run to `pending`.
    ///
    /// Touched artifacts are kept; the restart counts as a retry.
    pub fn recover_interrupted(&mut self) -> Vec<String> {
        let mut recovered = Vec::new();
        for task in self
            .tasks
            .iter_mut()
            .filter(|t| t.status == TaskStatus::InProgress)
        {
            task.status = TaskStatus::Pending;
            task.requeued = true;
            recovered.push(task.id.clone());
        }
        recovered
    }

    /// Remember artifacts touched by an unaccepted attempt.
    pub fn record_touched(&mut self, id: &str, artifacts: &[String]) -> Result<()> {
        let task = self.get_mut(id)?;
        for artifact in artifacts {
            if !task.touched.contains(artifact) {
                task.touched.push(artifact.clone());
            }
        }
        Ok(())
    }

    /// Put a blocked task back to `pending`.
    ///
    /// With `defer`, the task moves behind every other task in scheduling order.
    pub fn requeue(&mut self, id: &str, defer: bool) -> Result<()> {
        let sequence = self.next_sequence();
        let task = self.get_mut(id)?;
        if task.status != TaskStatus::Blocked {
            return Err(PlannerError::InvalidTransition {
                task_id: id.to_string(),
                from: task.status,
                to: TaskStatus::Pending,
            });
        }

        task.status = TaskStatus::Pending;
        task.blocked_reason = None;
        task.requeued = true;
        if defer {
            task.sequence = sequence;
        }
        Ok(())
    }

    /// Insert a deferred definition and link it as a dependency of `into`.
    ///
    /// Deferred definitions it depends on are pulled in too. Every synthesized
    /// task joins the phase of `into` so it can run before `into` resumes.
    /// Returns the synthesized ids, dependencies first. On error the graph is
    /// left untouched.
    pub fn synthesize(&mut self, id: &str, into: &str) -> Result<Vec<String>> {
        if self.deferred_definition(id).is_none() {
            return Err(PlannerError::UnknownTask {
                task_id: id.to_string(),
            });
        }
        let into_index = *self.index.get(into).ok_or_else(|| PlannerError::UnknownTask {
            task_id: into.to_string(),
        })?;
        let phase = self.tasks[into_index].phase;

        let mut chain: Vec<String> = Vec::new();
        let mut queue = vec![id.to_string()];
        while let Some(next) = queue.pop() {
            if chain.contains(&next) {
                continue;
            }
            if let Some(definition) = self.deferred_definition(&next) {
                queue.extend(
                    definition
                        .depends_on
                        .iter()
                        .filter(|d| !self.index.contains_key(d.as_str()))
                        .cloned(),
                );
                chain.push(next);
            }
        }
        chain.reverse();

        let mut candidate = self.tasks.clone();
        let mut sequence = self.next_sequence();
        for synthesized in &chain {
            if let Some(definition) = self.deferred_definition(synthesized) {
                let mut task = definition.clone();
                task.status = TaskStatus::Pending;
                task.phase = phase;
                task.sequence = sequence;
                sequence += 1;
                candidate.push(task);
            }
        }

        let target = &mut candidate[into_index];
        if !target.depends_on.iter().any(|d| d == id) {
            target.depends_on.push(id.to_string());
        }

        DagBuilder::new(&candidate).validate()?;

        self.deferred.retain(|t| !chain.contains(&t.id));
        self.index = Self::build_index(&candidate);
        self.tasks = candidate;
        Ok(chain)
    }

    /// Reset a blocked or running task back to `pending`.
    ///
    /// Returns every artifact the task touched or produced.
    pub fn reset(&mut self, id: &str) -> Result<Vec<String>> {
        let task = self.get_mut(id)?;
        if !matches!(task.status, TaskStatus::Blocked | TaskStatus::InProgress) {
            return Err(PlannerError::InvalidTransition {
                task_id: id.to_string(),
                from: task.status,
                to: TaskStatus::Pending,
            });
        }

        let mut artifacts = std::mem::take(&mut task.touched);
        for output in task.outputs.drain(..) {
            if !artifacts.contains(&output) {
                artifacts.push(output);
            }
        }
        task.status = TaskStatus::Pending;
        task.blocked_reason = None;
        task.requeued = false;
        Ok(artifacts)
    }

    /// Operator override: complete a task from any outstanding status.
    pub fn force_complete(&mut self, id: &str, outputs: Vec<String>) -> Result<()> {
        let task = self.get_mut(id)?;
        if task.status.is_completed() {
            return Err(PlannerError::InvalidTransition {
                task_id: id.to_string(),
                from: task.status,
                to: TaskStatus::Completed,
            });
        }

        task.status = TaskStatus::Completed;
        task.outputs = outputs;
        task.blocked_reason = None;
        task.touched.clear();
        task.requeued = false;
        Ok(())
    }
}

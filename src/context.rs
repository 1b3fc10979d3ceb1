//! Context bundles handed to capability handlers.
//!
//! A bundle is built fresh for every delegation and never persisted. It
//! carries the active task, the outputs of its completed dependencies, the
//! carried-forward decisions and the phase context. Before delegation the
//! bundle is validated against the capability's declared required inputs; a
//! missing input is a configuration error and is reported immediately.

use crate::dag::{Task, TaskGraph};
use crate::errors::{PlannerError, Result};
use crate::phase::ProjectPhase;
use crate::skills::SkillRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outputs of one completed dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamOutput {
    pub task_id: String,
    pub title: String,
    pub outputs: Vec<String>,
}

/// The per-invocation payload handed to a capability handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    /// The task being delegated
    pub task: Task,
    /// Capability actually invoked (the task's own, or its fallback)
    pub capability: String,
    /// Completed dependencies in declaration order
    pub upstream: Vec<UpstreamOutput>,
    /// Decisions recorded earlier in the project
    pub decisions: BTreeMap<String, String>,
    pub phase: ProjectPhase,
    /// Guidance for the active phase
    pub phase_context: String,
}

impl ContextBundle {
    /// All upstream output identifiers, in dependency order.
    pub fn upstream_outputs(&self) -> impl Iterator<Item = &str> {
        self.upstream
            .iter()
            .flat_map(|u| u.outputs.iter().map(String::as_str))
    }

    /// Check if some dependency produced `output`.
    pub fn has_output(&self, output: &str) -> bool {
        self.upstream_outputs().any(|o| o == output)
    }
}

/// Assembles context bundles from the task graph and project decisions.
pub struct ContextBundler<'a> {
    graph: &'a TaskGraph,
    registry: &'a SkillRegistry,
    decisions: &'a BTreeMap<String, String>,
    phase_notes: Option<&'a str>,
}

impl<'a> ContextBundler<'a> {
    pub fn new(
        graph: &'a TaskGraph,
        registry: &'a SkillRegistry,
        decisions: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            graph,
            registry,
            decisions,
            phase_notes: None,
        }
    }

    /// Append project-specific notes to the phase context.
    pub fn with_phase_notes(mut self, notes: Option<&'a str>) -> Self {
        self.phase_notes = notes;
        self
    }

    /// Build the bundle for `task`, delegated to `capability`.
    ///
    /// Fails with `MissingUpstreamOutput` when the capability's descriptor
    /// requires an input that no completed dependency produced. A capability
    /// without a descriptor is not validated here; the orchestrator reports it
    /// as a technical blocker instead.
    pub fn build(&self, task: &Task, capability: &str) -> Result<ContextBundle> {
        let mut upstream = Vec::with_capacity(task.depends_on.len());
        for dep in &task.depends_on {
            let dependency = self.graph.get(dep).ok_or_else(|| PlannerError::UnknownTask {
                task_id: dep.clone(),
            })?;
            if dependency.status.is_completed() {
                upstream.push(UpstreamOutput {
                    task_id: dependency.id.clone(),
                    title: dependency.title.clone(),
                    outputs: dependency.outputs.clone(),
                });
            }
        }

        let mut phase_context = task.phase.description().to_string();
        if let Some(notes) = self.phase_notes.filter(|n| !n.trim().is_empty()) {
            phase_context.push_str("\n\n");
            phase_context.push_str(notes.trim());
        }

        let bundle = ContextBundle {
            task: task.clone(),
            capability: capability.to_string(),
            upstream,
            decisions: self.decisions.clone(),
            phase: task.phase,
            phase_context,
        };

        if let Some(descriptor) = self.registry.descriptor(capability) {
            for input in &descriptor.required_inputs {
                if !bundle.has_output(input) {
                    return Err(PlannerError::MissingUpstreamOutput {
                        task_id: task.id.clone(),
                        capability: capability.to_string(),
                        input: input.clone(),
                    });
                }
            }
        }

        Ok(bundle)
    }
}

use super::classifier::Classification;
use crate::dag::TaskGraph;
use crate::errors::{BlockerKind, PlannerError, Result};
use crate::skills::SkillRegistry;
use crate::state::ProjectState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the resolver did about a blocker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Remediation {
    /// A deferred definition was inserted and linked as a dependency
    Synthesized { task_id: String },
    /// The task was re-queued behind every other task
    Reordered,
    /// The resource was recorded and the task re-queued on a fallback capability
    Fallback { resource: String, capability: String },
    /// The resource was recorded; no fallback exists so the task stays blocked
    ResourceRecorded { resource: String },
    /// Nothing was attempted
    Escalated,
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remediation::Synthesized { task_id } => {
                write!(f, "synthesized deferred task {} and re-linked", task_id)
            }
            Remediation::Reordered => write!(f, "re-queued after reordering"),
            Remediation::Fallback {
                resource,
                capability,
            } => write!(
                f,
                "recorded missing resource {}; re-queued on fallback {}",
                resource, capability
            ),
            Remediation::ResourceRecorded { resource } => {
                write!(f, "recorded missing resource {}; no fallback", resource)
            }
            Remediation::Escalated => write!(f, "no automatic remediation"),
        }
    }
}

/// Classification trail for one blocked observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub kind: BlockerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub remediation: Remediation,
    /// Whether the task went back to `pending`
    pub requeued: bool,
}

/// Applies the remediation matching a blocker's category.
pub struct BlockerResolver<'a> {
    registry: &'a SkillRegistry,
}

impl<'a> BlockerResolver<'a> {
    pub fn new(registry: &'a SkillRegistry) -> Self {
        Self { registry }
    }

    /// Remediate a blocked task according to its classification.
    ///
    /// The task must be `blocked`. On return it is either back to `pending`
    /// (`requeued`) or still `blocked` and awaiting the operator.
    pub fn resolve(
        &self,
        graph: &mut TaskGraph,
        state: &mut ProjectState,
        task_id: &str,
        classification: &Classification,
    ) -> Result<Resolution> {
        let remediation = match classification.kind {
            BlockerKind::Dependency => {
                self.resolve_dependency(graph, task_id, classification.subject.as_deref())?
            }
            BlockerKind::Technical => self.resolve_technical(
                graph,
                state,
                task_id,
                classification.subject.as_deref(),
            )?,
            BlockerKind::Product => Remediation::Escalated,
        };

        let requeued = matches!(
            remediation,
            Remediation::Synthesized { .. } | Remediation::Reordered | Remediation::Fallback { .. }
        );

        tracing::debug!(
            task = %task_id,
            kind = %classification.kind,
            remediation = %remediation,
            requeued,
            "Blocker resolved"
        );

        Ok(Resolution {
            kind: classification.kind,
            subject: classification.subject.clone(),
            remediation,
            requeued,
        })
    }

    fn resolve_dependency(
        &self,
        graph: &mut TaskGraph,
        task_id: &str,
        subject: Option<&str>,
    ) -> Result<Remediation> {
        graph.validate()?;

        if let Some(missing) = subject
            && graph.deferred_definition(missing).is_some()
        {
            match graph.synthesize(missing, task_id) {
                Ok(synthesized) => {
                    tracing::debug!(task = %task_id, synthesized = ?synthesized, "Deferred tasks inserted");
                    graph.requeue(task_id, false)?;
                    return Ok(Remediation::Synthesized {
                        task_id: missing.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        task = %task_id,
                        missing = %missing,
                        error = %e,
                        "Cannot synthesize deferred task; reordering instead"
                    );
                }
            }
        }

        graph.requeue(task_id, true)?;
        Ok(Remediation::Reordered)
    }

    fn resolve_technical(
        &self,
        graph: &mut TaskGraph,
        state: &mut ProjectState,
        task_id: &str,
        subject: Option<&str>,
    ) -> Result<Remediation> {
        let capability = graph
            .get(task_id)
            .map(|t| t.capability.clone())
            .ok_or_else(|| PlannerError::UnknownTask {
                task_id: task_id.to_string(),
            })?;
        let resource = subject.unwrap_or(&capability).to_string();
        state.missing_resources.insert(resource.clone());

        match self.registry.fallback_for(&capability) {
            Some(fallback) => {
                state
                    .degraded
                    .insert(task_id.to_string(), fallback.to_string());
                graph.requeue(task_id, false)?;
                Ok(Remediation::Fallback {
                    resource,
                    capability: fallback.to_string(),
                })
            }
            None => Ok(Remediation::ResourceRecorded { resource }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocker::classify;
    use crate::context::ContextBundle;
    use crate::dag::{Task, TaskStatus};
    use crate::skills::{BlockedReport, HandlerResponse, SkillDescriptor, SkillHandler};
    use std::sync::Arc;

    fn noop() -> Arc<dyn SkillHandler> {
        Arc::new(|_: &ContextBundle| -> anyhow::Result<HandlerResponse> {
            Ok(HandlerResponse::completed(Vec::<String>::new()))
        })
    }

    fn blocked_graph(deferred: Vec<Task>) -> TaskGraph {
        let mut graph = TaskGraph::new();
        graph
            .insert_batch(
                vec![
                    Task::new("api", "Api", "y", vec![]),
                    Task::new("ui", "Ui", "y", vec![]),
                ],
                deferred,
            )
            .unwrap();
        graph.mark_in_progress("api").unwrap();
        graph.mark_blocked("api", "blocked").unwrap();
        graph
    }

    fn resolve(
        graph: &mut TaskGraph,
        registry: &SkillRegistry,
        state: &mut ProjectState,
        reason: &str,
    ) -> Resolution {
        let classification = classify(&BlockedReport::new(reason));
        BlockerResolver::new(registry)
            .resolve(graph, state, "api", &classification)
            .unwrap()
    }

    #[test]
    fn test_dependency_synthesizes_deferred_definition() {
        let mut graph = blocked_graph(vec![Task::new("schema", "Schema", "x", vec![])]);
        let registry = SkillRegistry::new();
        let mut state = ProjectState::default();

        let resolution = resolve(&mut graph, &registry, &mut state, "missing task schema");

        assert_eq!(
            resolution.remediation,
            Remediation::Synthesized {
                task_id: "schema".into()
            }
        );
        assert!(resolution.requeued);
        assert_eq!(graph.get("api").unwrap().status, TaskStatus::Pending);
        assert_eq!(graph.get("api").unwrap().depends_on, vec!["schema"]);
    }

    #[test]
    fn test_dependency_synthesizes_deferred_chain() {
        let mut graph = blocked_graph(vec![
            Task::new("seed", "Seed", "x", vec!["schema".into()]),
            Task::new("schema", "Schema", "x", vec![]),
        ]);
        let registry = SkillRegistry::new();
        let mut state = ProjectState::default();

        let resolution = resolve(&mut graph, &registry, &mut state, "missing task seed");

        assert_eq!(
            resolution.remediation,
            Remediation::Synthesized {
                task_id: "seed".into()
            }
        );
        assert!(graph.contains("schema"));
        assert_eq!(graph.get("api").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_unsynthesizable_definition_reorders() {
        let mut graph = blocked_graph(vec![Task::new("schema", "Schema", "x", vec!["api".into()])]);
        let registry = SkillRegistry::new();
        let mut state = ProjectState::default();

        let resolution = resolve(&mut graph, &registry, &mut state, "missing task schema");

        assert_eq!(resolution.remediation, Remediation::Reordered);
        assert!(resolution.requeued);
        assert!(!graph.contains("schema"));
        assert_eq!(graph.get("api").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_dependency_without_definition_reorders() {
        let mut graph = blocked_graph(vec![]);
        let registry = SkillRegistry::new();
        let mut state = ProjectState::default();

        let resolution = resolve(&mut graph, &registry, &mut state, "missing output o1");

        assert_eq!(resolution.kind, BlockerKind::Dependency);
        assert_eq!(resolution.remediation, Remediation::Reordered);
        let next = graph
            .next_ready_task(crate::phase::ProjectPhase::Building)
            .unwrap();
        assert_eq!(next.id, "ui");
    }

    #[test]
    fn test_technical_without_fallback_stays_blocked() {
        let mut graph = blocked_graph(vec![]);
        let registry = SkillRegistry::new();
        let mut state = ProjectState::default();

        let resolution = resolve(&mut graph, &registry, &mut state, "missing package pg");

        assert_eq!(
            resolution.remediation,
            Remediation::ResourceRecorded {
                resource: "pg".into()
            }
        );
        assert!(!resolution.requeued);
        assert!(state.missing_resources.contains("pg"));
        assert_eq!(graph.get("api").unwrap().status, TaskStatus::Blocked);
    }

    #[test]
    fn test_technical_with_fallback_requeues_on_fallback() {
        let mut graph = blocked_graph(vec![]);
        let mut registry = SkillRegistry::new();
        registry.register(SkillDescriptor::new("generic"), noop()).unwrap();
        registry.register_fallback("y", "generic").unwrap();
        let mut state = ProjectState::default();

        let resolution = resolve(
            &mut graph,
            &registry,
            &mut state,
            "missing handler for capability y",
        );

        assert!(resolution.requeued);
        assert_eq!(state.degraded.get("api").map(String::as_str), Some("generic"));
        assert!(state.missing_resources.contains("y"));
        assert_eq!(graph.get("api").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_product_is_escalated_untouched() {
        let mut graph = blocked_graph(vec![]);
        let registry = SkillRegistry::new();
        let mut state = ProjectState::default();

        let resolution = resolve(
            &mut graph,
            &registry,
            &mut state,
            "Should admins see deleted orders?",
        );

        assert_eq!(resolution.kind, BlockerKind::Product);
        assert_eq!(resolution.remediation, Remediation::Escalated);
        assert_eq!(graph.get("api").unwrap().status, TaskStatus::Blocked);
        assert!(state.missing_resources.is_empty());
    }
}

//! Skill registry and the delegation contract.
//!
//! A skill is an external, opaque capability handler. The orchestrator only
//! knows a skill by its capability name and its [`SkillDescriptor`]; the
//! actual domain work happens behind the [`SkillHandler`] trait.
//!
//! # Delegation contract
//!
//! A handler receives a [`ContextBundle`] and answers with one of two shapes:
//!
//! ```json
//! {"status": "completed", "outputs": ["schema.sql"]}
//! {"status": "blocked", "reason": "missing package pg", "kind": "technical", "subject": "pg"}
//! ```
//!
//! Any other answer (a handler error, an unparseable reply) is a contract
//! violation and is turned into a technical blocker by the orchestrator.
//!
//! # Fallbacks
//!
//! A capability may name a fallback capability, either in its descriptor or
//! through [`SkillRegistry::register_fallback`] when the capability itself has
//! no handler. The blocker resolver re-queues technical blockers only when a
//! fallback exists.

mod command;

pub use command::CommandHandler;

use crate::context::ContextBundle;
use crate::errors::{BlockerKind, PlannerError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Static registry entry for a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDescriptor {
    /// Capability name tasks refer to
    pub capability: String,
    /// Output identifiers a dependency must have produced before delegation
    #[serde(default)]
    pub required_inputs: Vec<String>,
    /// Capability to use when this one cannot run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl SkillDescriptor {
    /// Create a descriptor with no required inputs.
    pub fn new(capability: &str) -> Self {
        Self {
            capability: capability.to_string(),
            required_inputs: Vec::new(),
            fallback: None,
        }
    }

    /// Declare required upstream inputs.
    pub fn requires(mut self, inputs: &[&str]) -> Self {
        self.required_inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Declare a fallback capability.
    pub fn with_fallback(mut self, fallback: &str) -> Self {
        self.fallback = Some(fallback.to_string());
        self
    }
}

/// Details a handler reports when it cannot finish a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockedReport {
    /// Free-text diagnostic
    pub reason: String,
    /// Structured category, when the handler knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<BlockerKind>,
    /// The missing task, output or resource the blocker is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Artifacts touched by the unaccepted attempt
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    /// Size of output produced but not accepted by this attempt
    #[serde(default)]
    pub growth: u64,
}

impl BlockedReport {
    /// Create a report with only a reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Default::default()
        }
    }

    /// Tag the report with a category.
    pub fn with_kind(mut self, kind: BlockerKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Name what is missing.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Report the size of unaccepted output.
    pub fn with_growth(mut self, growth: u64) -> Self {
        self.growth = growth;
        self
    }

    /// Report artifacts touched by the attempt.
    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// A handler's answer to a delegation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HandlerResponse {
    /// The task is done.
    Completed {
        #[serde(default)]
        outputs: Vec<String>,
    },
    /// The task cannot proceed.
    Blocked(BlockedReport),
}

impl HandlerResponse {
    /// Shorthand for a completed response.
    pub fn completed<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Completed {
            outputs: outputs.into_iter().map(Into::into).collect(),
        }
    }

    /// Shorthand for a blocked response with only a reason.
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::Blocked(BlockedReport::new(reason))
    }

    /// Parse a handler reply.
    ///
    /// Handlers may print diagnostics before their answer; the last line that
    /// parses as a JSON object is taken as the response.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let candidate = text
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| line.starts_with('{') && line.ends_with('}'))
            .unwrap_or_else(|| text.trim());

        serde_json::from_str(candidate).map_err(|e| {
            anyhow::anyhow!(
                "handler reply is neither a completed nor a blocked response ({}): {}",
                e,
                truncate(candidate, 120)
            )
        })
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

/// A capability handler.
#[async_trait]
pub trait SkillHandler: Send + Sync {
    /// Perform the task described by the bundle.
    async fn execute(&self, bundle: &ContextBundle) -> anyhow::Result<HandlerResponse>;
}

#[async_trait]
impl<F> SkillHandler for F
where
    F: Fn(&ContextBundle) -> anyhow::Result<HandlerResponse> + Send + Sync,
{
    async fn execute(&self, bundle: &ContextBundle) -> anyhow::Result<HandlerResponse> {
        (self)(bundle)
    }
}

/// A descriptor paired with its handler.
#[derive(Clone)]
pub struct RegisteredSkill {
    pub descriptor: SkillDescriptor,
    pub handler: Arc<dyn SkillHandler>,
}

impl std::fmt::Debug for RegisteredSkill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredSkill")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Typed lookup from capability name to handler.
#[derive(Debug, Clone, Default)]
pub struct SkillRegistry {
    skills: BTreeMap<String, RegisteredSkill>,
    /// Fallbacks for capabilities that have no handler of their own
    fallbacks: BTreeMap<String, String>,
}

impl SkillRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a capability.
    ///
    /// Rejects empty names, duplicate capabilities and self-referencing
    /// fallbacks. Fallback targets are checked by [`SkillRegistry::validate`]
    /// once every skill is registered.
    pub fn register(
        &mut self,
        descriptor: SkillDescriptor,
        handler: Arc<dyn SkillHandler>,
    ) -> Result<()> {
        let capability = descriptor.capability.trim();
        if capability.is_empty() || capability != descriptor.capability {
            return Err(PlannerError::InvalidDescriptor(format!(
                "capability name '{}' must be non-empty without surrounding whitespace",
                descriptor.capability
            )));
        }
        if descriptor.required_inputs.iter().any(|i| i.trim().is_empty()) {
            return Err(PlannerError::InvalidDescriptor(format!(
                "capability '{}' declares an empty required input",
                capability
            )));
        }
        if descriptor.fallback.as_deref() == Some(capability) {
            return Err(PlannerError::InvalidDescriptor(format!(
                "capability '{}' cannot fall back to itself",
                capability
            )));
        }
        if self.skills.contains_key(capability) {
            return Err(PlannerError::DuplicateCapability {
                capability: capability.to_string(),
            });
        }

        self.skills.insert(
            capability.to_string(),
            RegisteredSkill {
                descriptor,
                handler,
            },
        );
        Ok(())
    }

    /// Name a fallback for a capability that has no handler of its own.
    pub fn register_fallback(&mut self, capability: &str, fallback: &str) -> Result<()> {
        if !self.skills.contains_key(fallback) {
            return Err(PlannerError::UnknownFallback {
                capability: capability.to_string(),
                fallback: fallback.to_string(),
            });
        }
        self.fallbacks
            .insert(capability.to_string(), fallback.to_string());
        Ok(())
    }

    /// Check that every descriptor fallback points at a registered skill.
    pub fn validate(&self) -> Result<()> {
        for skill in self.skills.values() {
            if let Some(fallback) = &skill.descriptor.fallback
                && !self.skills.contains_key(fallback)
            {
                return Err(PlannerError::UnknownFallback {
                    capability: skill.descriptor.capability.clone(),
                    fallback: fallback.clone(),
                });
            }
        }
        Ok(())
    }

    /// Check if a capability has a handler.
    pub fn contains(&self, capability: &str) -> bool {
        self.skills.contains_key(capability)
    }

    /// Get a registered skill.
    pub fn get(&self, capability: &str) -> Option<&RegisteredSkill> {
        self.skills.get(capability)
    }

    /// Get the descriptor of a capability.
    pub fn descriptor(&self, capability: &str) -> Option<&SkillDescriptor> {
        self.skills.get(capability).map(|s| &s.descriptor)
    }

    /// The fallback capability for `capability`, if one is registered.
    pub fn fallback_for(&self, capability: &str) -> Option<&str> {
        self.descriptor(capability)
            .and_then(|d| d.fallback.as_deref())
            .or_else(|| self.fallbacks.get(capability).map(String::as_str))
            .filter(|fallback| self.skills.contains_key(*fallback))
    }

    /// Registered capability names, sorted.
    pub fn capabilities(&self) -> Vec<&str> {
        self.skills.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn SkillHandler> {
        Arc::new(|_: &ContextBundle| -> anyhow::Result<HandlerResponse> {
            Ok(HandlerResponse::completed(Vec::<String>::new()))
        })
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = SkillRegistry::new();
        registry
            .register(SkillDescriptor::new("api").requires(&["schema.sql"]), noop())
            .unwrap();

        assert!(registry.contains("api"));
        assert_eq!(
            registry.descriptor("api").unwrap().required_inputs,
            vec!["schema.sql"]
        );
        assert_eq!(registry.capabilities(), vec!["api"]);
    }

    #[test]
    fn test_duplicate_capability_rejected() {
        let mut registry = SkillRegistry::new();
        registry.register(SkillDescriptor::new("api"), noop()).unwrap();
        let result = registry.register(SkillDescriptor::new("api"), noop());
        assert!(matches!(result, Err(PlannerError::DuplicateCapability { .. })));
    }

    #[test]
    fn test_invalid_descriptors_rejected() {
        let mut registry = SkillRegistry::new();
        assert!(registry.register(SkillDescriptor::new(" "), noop()).is_err());
        assert!(
            registry
                .register(SkillDescriptor::new("api").requires(&[""]), noop())
                .is_err()
        );
        assert!(
            registry
                .register(SkillDescriptor::new("api").with_fallback("api"), noop())
                .is_err()
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_fallbacks() {
        let mut registry = SkillRegistry::new();
        registry.register(SkillDescriptor::new("generic"), noop()).unwrap();
        registry
            .register(SkillDescriptor::new("api").with_fallback("generic"), noop())
            .unwrap();
        registry.validate().unwrap();

        assert_eq!(registry.fallback_for("api"), Some("generic"));
        assert_eq!(registry.fallback_for("generic"), None);

        assert!(registry.register_fallback("z", "missing").is_err());
        registry.register_fallback("z", "generic").unwrap();
        assert_eq!(registry.fallback_for("z"), Some("generic"));
    }

    #[test]
    fn test_validate_reports_unknown_fallback() {
        let mut registry = SkillRegistry::new();
        registry
            .register(SkillDescriptor::new("api").with_fallback("ghost"), noop())
            .unwrap();
        assert!(matches!(
            registry.validate(),
            Err(PlannerError::UnknownFallback { .. })
        ));
    }

    #[test]
    fn test_parse_completed_response() {
        let response = HandlerResponse::parse(r#"{"status": "completed", "outputs": ["o1"]}"#)
            .unwrap();
        assert_eq!(response, HandlerResponse::completed(["o1"]));
    }

    #[test]
    fn test_parse_blocked_response_with_tags() {
        let text = "compiling...\n{\"status\": \"blocked\", \"reason\": \"missing package pg\", \"kind\": \"technical\", \"subject\": \"pg\", \"growth\": 40}\n";
        let response = HandlerResponse::parse(text).unwrap();
        match response {
            HandlerResponse::Blocked(report) => {
                assert_eq!(report.reason, "missing package pg");
                assert_eq!(report.kind, Some(BlockerKind::Technical));
                assert_eq!(report.subject.as_deref(), Some("pg"));
                assert_eq!(report.growth, 40);
            }
            other => panic!("Expected Blocked, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert!(HandlerResponse::parse(r#"{"status": "maybe"}"#).is_err());
        assert!(HandlerResponse::parse("all done!").is_err());
        assert!(HandlerResponse::parse(r#"{"status": "blocked"}"#).is_err());
    }

    #[tokio::test]
    async fn test_closure_handler() {
        use crate::dag::Task;
        use crate::phase::ProjectPhase;

        let handler: Arc<dyn SkillHandler> =
            Arc::new(|bundle: &ContextBundle| -> anyhow::Result<HandlerResponse> {
                Ok(HandlerResponse::completed([format!("{}.md", bundle.task.id)]))
            });
        let bundle = ContextBundle {
            task: Task::new("a", "A", "x", vec![]),
            capability: "x".into(),
            upstream: vec![],
            decisions: Default::default(),
            phase: ProjectPhase::Building,
            phase_context: String::new(),
        };

        let response = handler.execute(&bundle).await.unwrap();
        assert_eq!(response, HandlerResponse::completed(["a.md"]));
    }
}

//! Project lifecycle phases.
//!
//! A project moves through a fixed, ordered set of phases:
//!
//! ```text
//! discovery -> stack -> planning -> building -> review
//! ```
//!
//! Phases only move forward one step at a time. The single backward move is
//! `review -> building` on an explicit "iterate" command; anything else needs
//! an operator override. The gating rules live in
//! [`Orchestrator::advance_phase`](crate::orchestrator::Orchestrator::advance_phase);
//! this module only knows the ordering.

use crate::errors::{PlannerError, Result};
use serde::{Deserialize, Serialize};

/// One of the five lifecycle phases.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPhase {
    /// Understand what is being built
    #[default]
    Discovery,
    /// Choose the technology stack
    Stack,
    /// Break the work into tasks
    Planning,
    /// Execute the task graph
    Building,
    /// Verify and accept the result
    Review,
}

impl ProjectPhase {
    /// All phases in lifecycle order.
    pub const ALL: [ProjectPhase; 5] = [
        ProjectPhase::Discovery,
        ProjectPhase::Stack,
        ProjectPhase::Planning,
        ProjectPhase::Building,
        ProjectPhase::Review,
    ];

    /// The phase that follows this one, or `None` at the terminal phase.
    pub fn next(self) -> Option<ProjectPhase> {
        match self {
            ProjectPhase::Discovery => Some(ProjectPhase::Stack),
            ProjectPhase::Stack => Some(ProjectPhase::Planning),
            ProjectPhase::Planning => Some(ProjectPhase::Building),
            ProjectPhase::Building => Some(ProjectPhase::Review),
            ProjectPhase::Review => None,
        }
    }

    /// Whether this is the terminal phase.
    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }

    /// The phase reached by the "iterate" command.
    ///
    /// Only `review` can iterate, back into `building`.
    pub fn iterate(self) -> Result<ProjectPhase> {
        match self {
            ProjectPhase::Review => Ok(ProjectPhase::Building),
            other => Err(PlannerError::InvalidPhaseTransition {
                from: other,
                to: ProjectPhase::Building,
            }),
        }
    }

    /// Short description handed to capability handlers as phase context.
    pub fn description(self) -> &'static str {
        match self {
            ProjectPhase::Discovery => "Clarify goals, users and constraints of the project",
            ProjectPhase::Stack => "Select languages, frameworks and services",
            ProjectPhase::Planning => "Decompose the project into dependency-ordered tasks",
            ProjectPhase::Building => "Implement planned tasks and produce artifacts",
            ProjectPhase::Review => "Review produced artifacts against the goals",
        }
    }

    /// Checkpoint label recorded when a phase is entered.
    pub fn start_label(self) -> String {
        format!("{}:start", self)
    }
}

impl std::fmt::Display for ProjectPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProjectPhase::Discovery => "discovery",
            ProjectPhase::Stack => "stack",
            ProjectPhase::Planning => "planning",
            ProjectPhase::Building => "building",
            ProjectPhase::Review => "review",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for ProjectPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "discovery" => Ok(ProjectPhase::Discovery),
            "stack" => Ok(ProjectPhase::Stack),
            "planning" => Ok(ProjectPhase::Planning),
            "building" => Ok(ProjectPhase::Building),
            "review" => Ok(ProjectPhase::Review),
            _ => anyhow::bail!(
                "Invalid phase '{}'. Valid values: discovery, stack, planning, building, review",
                s
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_advance_in_order() {
        let mut phase = ProjectPhase::default();
        let mut visited = vec![phase];
        while let Some(next) = phase.next() {
            visited.push(next);
            phase = next;
        }
        assert_eq!(visited, ProjectPhase::ALL.to_vec());
        assert!(phase.is_terminal());
    }

    #[test]
    fn test_ordering_matches_lifecycle() {
        assert!(ProjectPhase::Discovery < ProjectPhase::Stack);
        assert!(ProjectPhase::Building < ProjectPhase::Review);
    }

    #[test]
    fn test_iterate_only_from_review() {
        assert_eq!(ProjectPhase::Review.iterate().unwrap(), ProjectPhase::Building);
        let err = ProjectPhase::Planning.iterate().unwrap_err();
        assert!(matches!(err, PlannerError::InvalidPhaseTransition { .. }));
    }

    #[test]
    fn test_start_label() {
        assert_eq!(ProjectPhase::Stack.start_label(), "stack:start");
    }

    #[test]
    fn test_display_roundtrips_through_from_str() {
        for phase in ProjectPhase::ALL {
            let parsed: ProjectPhase = phase.to_string().parse().unwrap();
            assert_eq!(parsed, phase);
        }
        assert!("shipping".parse::<ProjectPhase>().is_err());
    }
}

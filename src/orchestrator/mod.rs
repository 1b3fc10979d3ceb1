//! The orchestration loop.
//!
//! One step: read the active phase, pick the next ready task, build its
//! context bundle, mark it `in_progress`, delegate to its capability handler,
//! then record the completion or route the blocker through the escape hatch
//! monitor and the blocker resolver. The loop is single-threaded; the only
//! suspension point is the awaited handler call.

mod runner;

pub use runner::{Orchestrator, OrchestratorSettings};

use crate::blocker::Resolution;
use crate::operator::Escalation;
use crate::phase::ProjectPhase;

/// What a single step did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed {
        task_id: String,
        outputs: Vec<String>,
    },
    /// Blocked, then remediated back to `pending`
    Requeued {
        task_id: String,
        resolution: Resolution,
    },
    /// Blocked and handed to the operator
    Escalated { escalation: Escalation },
    PhaseAdvanced {
        from: ProjectPhase,
        to: ProjectPhase,
    },
    /// Every task of the phase completed but auto-advance is off
    PhaseComplete { phase: ProjectPhase },
    /// Nothing is ready although the phase has outstanding tasks
    Idle {
        phase: ProjectPhase,
        outstanding: Vec<String>,
    },
    /// The terminal phase has no outstanding work
    Finished,
}

impl StepOutcome {
    /// Task this step ran, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            StepOutcome::Completed { task_id, .. } | StepOutcome::Requeued { task_id, .. } => {
                Some(task_id.as_str())
            }
            StepOutcome::Escalated { escalation } => Some(escalation.task_id()),
            _ => None,
        }
    }

    /// Whether [`Orchestrator::run`] stops after this outcome.
    pub fn stops_run(&self) -> bool {
        matches!(
            self,
            StepOutcome::Escalated { .. }
                | StepOutcome::PhaseComplete { .. }
                | StepOutcome::Idle { .. }
                | StepOutcome::Finished
        )
    }
}

/// Outcomes of a [`Orchestrator::run`] call, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub outcomes: Vec<StepOutcome>,
}

impl RunReport {
    /// Ids of the tasks delegated, in execution order.
    pub fn execution_order(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter_map(StepOutcome::task_id)
            .map(str::to_string)
            .collect()
    }

    pub fn finished(&self) -> bool {
        matches!(self.outcomes.last(), Some(StepOutcome::Finished))
    }

    pub fn escalations(&self) -> Vec<&Escalation> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                StepOutcome::Escalated { escalation } => Some(escalation),
                _ => None,
            })
            .collect()
    }

    pub fn last(&self) -> Option<&StepOutcome> {
        self.outcomes.last()
    }
}

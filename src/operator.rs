//! Operator escalation channel.
//!
//! Escalations are one-way notifications. The operator answers later with an
//! [`OperatorDecision`], usually through `planner resolve`, so pending
//! escalations are persisted in the project state.

use crate::blocker::Resolution;
use crate::escape::{EscapeCounters, StuckSignal};
use anyhow::Result;
use console::style;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Something the core cannot decide on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Escalation {
    /// The escape hatch fired
    Stuck(StuckSignal),
    /// A blocker the resolver could not remediate
    Unresolved {
        task_id: String,
        reason: String,
        resolution: Resolution,
        counters: EscapeCounters,
    },
}

impl Escalation {
    pub fn task_id(&self) -> &str {
        match self {
            Escalation::Stuck(signal) => &signal.task_id,
            Escalation::Unresolved { task_id, .. } => task_id,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Escalation::Stuck(signal) => &signal.reason,
            Escalation::Unresolved { reason, .. } => reason,
        }
    }

    /// One-line summary for logs and the journal.
    pub fn summary(&self) -> String {
        match self {
            Escalation::Stuck(signal) => format!(
                "stuck on {} (retries {}, oscillations {}, growth {}, time x{:.1}): {}",
                signal.triggering_metric,
                signal.counters.retry_count,
                signal.counters.oscillation_cycles,
                signal.counters.complexity_growth,
                signal.counters.time_multiplier,
                signal.reason
            ),
            Escalation::Unresolved {
                reason, resolution, ..
            } => format!(
                "{} blocker, {}: {}",
                resolution.kind, resolution.remediation, reason
            ),
        }
    }
}

/// The operator's answer to an escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum OperatorDecision {
    /// Re-queue with a recorded alternative approach
    AcceptAlternative { note: String },
    /// Discard everything the task touched and start it over
    Reset,
    /// Mark the task completed by hand
    OverrideCompleted { outputs: Vec<String> },
}

impl OperatorDecision {
    pub fn label(&self) -> &'static str {
        match self {
            OperatorDecision::AcceptAlternative { .. } => "accept alternative",
            OperatorDecision::Reset => "reset",
            OperatorDecision::OverrideCompleted { .. } => "override completed",
        }
    }
}

/// Receives escalations.
pub trait OperatorChannel: Send {
    fn notify(&mut self, escalation: &Escalation) -> Result<()>;
}

/// Prints escalations to stderr.
#[derive(Debug, Default)]
pub struct ConsoleOperator;

impl OperatorChannel for ConsoleOperator {
    fn notify(&mut self, escalation: &Escalation) -> Result<()> {
        let headline = match escalation {
            Escalation::Stuck(_) => style("STUCK").red().bold(),
            Escalation::Unresolved { .. } => style("BLOCKED").yellow().bold(),
        };
        eprintln!(
            "{} {} {}",
            headline,
            style(escalation.task_id()).bold(),
            escalation.summary()
        );
        if let Escalation::Stuck(signal) = escalation
            && !signal.history.is_empty()
        {
            eprintln!("    history: {}", signal.history.join(" -> "));
        }
        eprintln!(
            "    answer with: planner resolve {} --accept <note> | --reset | --complete <outputs>",
            escalation.task_id()
        );
        Ok(())
    }
}

/// Keeps escalations in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingOperator {
    received: Arc<Mutex<Vec<Escalation>>>,
}

impl RecordingOperator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn escalations(&self) -> Vec<Escalation> {
        self.received
            .lock()
            .map(|received| received.clone())
            .unwrap_or_default()
    }
}

impl OperatorChannel for RecordingOperator {
    fn notify(&mut self, escalation: &Escalation) -> Result<()> {
        self.received
            .lock()
            .map_err(|_| anyhow::anyhow!("operator buffer poisoned"))?
            .push(escalation.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocker::Remediation;
    use crate::errors::BlockerKind;
    use crate::escape::StuckMetric;

    fn unresolved() -> Escalation {
        Escalation::Unresolved {
            task_id: "checkout".into(),
            reason: "Guest checkout allowed?".into(),
            resolution: Resolution {
                kind: BlockerKind::Product,
                subject: None,
                remediation: Remediation::Escalated,
                requeued: false,
            },
            counters: EscapeCounters::default(),
        }
    }

    #[test]
    fn test_escalation_round_trips_with_type_tag() {
        let json = serde_json::to_string(&unresolved()).unwrap();
        assert!(json.contains(r#""type":"unresolved""#));
        let back: Escalation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, unresolved());
    }

    #[test]
    fn test_summary_includes_trail() {
        let summary = unresolved().summary();
        assert!(summary.contains("product"));
        assert!(summary.contains("no automatic remediation"));
        assert!(summary.contains("Guest checkout allowed?"));

        let stuck = Escalation::Stuck(StuckSignal {
            task_id: "c".into(),
            triggering_metric: StuckMetric::RetryCount,
            counters: EscapeCounters {
                retry_count: 3,
                ..Default::default()
            },
            history: vec![],
            reason: "missing handler for capability z".into(),
            kind: BlockerKind::Technical,
        });
        assert!(stuck.summary().contains("retry_count"));
        assert!(stuck.summary().contains("retries 3"));
        assert_eq!(stuck.task_id(), "c");
    }

    #[test]
    fn test_recording_operator_shares_buffer() {
        let recorder = RecordingOperator::new();
        let mut channel = recorder.clone();
        channel.notify(&unresolved()).unwrap();
        assert_eq!(recorder.escalations().len(), 1);
    }

    #[test]
    fn test_decision_json_shape() {
        let decision: OperatorDecision =
            serde_json::from_str(r#"{"decision":"override_completed","outputs":["o1"]}"#).unwrap();
        assert_eq!(
            decision,
            OperatorDecision::OverrideCompleted {
                outputs: vec!["o1".into()]
            }
        );
    }
}

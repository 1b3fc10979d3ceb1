use super::{RunReport, StepOutcome};
use crate::blocker::{BlockerResolver, Classification, classify};
use crate::config::Config;
use crate::context::{ContextBundle, ContextBundler};
use crate::dag::{Task, TaskGraph, TaskStatus};
use crate::errors::{BlockerKind, PlannerError, Result};
use crate::escape::{EscapeConfig, EscapeMonitor, median};
use crate::journal::{Journal, JournalEntry, JournalEvent};
use crate::operator::{Escalation, OperatorChannel, OperatorDecision};
use crate::phase::ProjectPhase;
use crate::skills::{BlockedReport, HandlerResponse, SkillRegistry};
use crate::state::{CheckpointEntry, ProjectState, Snapshot, StateStore};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Loop settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Advance to the next phase once every task of the current one completed
    pub auto_advance: bool,
    /// Per-delegation timeout; `None` waits for the handler indefinitely
    pub delegation_timeout: Option<Duration>,
    pub escape: EscapeConfig,
    pub phase_notes: BTreeMap<ProjectPhase, String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            auto_advance: true,
            delegation_timeout: None,
            escape: EscapeConfig::default(),
            phase_notes: BTreeMap::new(),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auto_advance: config.auto_advance(),
            delegation_timeout: config.toml.delegation_timeout(),
            escape: config.toml.escape.clone(),
            phase_notes: config.toml.phase_notes(),
        }
    }
}

/// The single owner of project state and the task graph.
///
/// Every mutation is written through to the [`StateStore`] before control
/// returns, so a crash leaves the last fully-applied transition on disk.
pub struct Orchestrator {
    state: ProjectState,
    graph: TaskGraph,
    registry: SkillRegistry,
    monitor: EscapeMonitor,
    settings: OrchestratorSettings,
    store: Box<dyn StateStore>,
    journal: Box<dyn Journal>,
    operator: Box<dyn OperatorChannel>,
}

impl Orchestrator {
    /// Create an orchestrator, resuming from the store's last snapshot.
    pub fn new(
        registry: SkillRegistry,
        store: Box<dyn StateStore>,
        journal: Box<dyn Journal>,
        operator: Box<dyn OperatorChannel>,
        settings: OrchestratorSettings,
    ) -> Result<Self> {
        registry.validate()?;

        let (state, mut graph) = match store.load().map_err(PlannerError::Storage)? {
            Some(snapshot) => (
                snapshot.project,
                TaskGraph::from_parts(snapshot.tasks, snapshot.deferred)?,
            ),
            None => (ProjectState::default(), TaskGraph::new()),
        };

        let recovered = graph.recover_interrupted();
        let monitor = EscapeMonitor::new(settings.escape.clone());
        let mut orchestrator = Self {
            state,
            graph,
            registry,
            monitor,
            settings,
            store,
            journal,
            operator,
        };

        if !recovered.is_empty() {
            warn!(tasks = ?recovered, "Re-queued tasks interrupted by a previous run");
            orchestrator.persist()?;
        }

        Ok(orchestrator)
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    pub fn phase(&self) -> ProjectPhase {
        self.state.phase
    }

    pub fn escalations(&self) -> &[Escalation] {
        &self.state.escalations
    }

    /// The checkpoint log, oldest first.
    pub fn checkpoints(&self) -> Result<Vec<CheckpointEntry>> {
        self.store.checkpoints().map_err(PlannerError::Storage)
    }

    fn persist(&mut self) -> Result<()> {
        self.state.version += 1;
        let snapshot = Snapshot::new(
            self.state.clone(),
            self.graph.tasks().to_vec(),
            self.graph.deferred().to_vec(),
        );
        self.store.save(&snapshot).map_err(PlannerError::Storage)
    }

    fn write_journal(&mut self, entry: JournalEntry) -> Result<()> {
        debug!(subject = %entry.subject, event = %entry.event, "{}", entry.detail);
        self.journal.record(entry).map_err(PlannerError::Other)
    }

    fn task(&self, id: &str) -> Result<&Task> {
        self.graph.get(id).ok_or_else(|| PlannerError::UnknownTask {
            task_id: id.to_string(),
        })
    }

    /// Insert a planned batch of tasks.
    ///
    /// The batch is all-or-nothing: a rejected batch leaves both the graph
    /// and the persisted snapshot untouched.
    pub fn plan(&mut self, tasks: Vec<Task>, deferred: Vec<Task>) -> Result<Vec<String>> {
        let deferred_count = deferred.len();
        let inserted = self.graph.insert_batch(tasks, deferred)?;
        self.persist()?;

        info!(tasks = inserted.len(), deferred = deferred_count, "Planned task batch");
        self.write_journal(JournalEntry::project(
            JournalEvent::Planned,
            format!(
                "inserted {} task(s) [{}], {} deferred definition(s)",
                inserted.len(),
                inserted.join(", "),
                deferred_count
            ),
        ))?;
        Ok(inserted)
    }

    /// Record a carried-forward decision.
    pub fn record_decision(&mut self, key: &str, value: &str) -> Result<()> {
        self.state
            .decisions
            .insert(key.to_string(), value.to_string());
        self.persist()?;
        self.write_journal(JournalEntry::project(
            JournalEvent::DecisionRecorded,
            format!("{} = {}", key, value),
        ))
    }

    /// Persist a checkpoint label.
    ///
    /// The label becomes the project checkpoint and is appended to the
    /// checkpoint log unless it is already the last entry.
    pub fn record_checkpoint(&mut self, label: &str) -> Result<()> {
        self.state.checkpoint = Some(label.to_string());
        self.persist()?;
        if self
            .store
            .append_checkpoint(label)
            .map_err(PlannerError::Storage)?
        {
            debug!(checkpoint = %label, "Checkpoint recorded");
        }
        Ok(())
    }

    /// Move to the next phase once every task of the current phase completed.
    pub fn advance_phase(&mut self) -> Result<ProjectPhase> {
        let from = self.state.phase;
        let to = from.next().ok_or(PlannerError::InvalidPhaseTransition { from, to: from })?;

        let outstanding = self.graph.outstanding(from);
        if !outstanding.is_empty() {
            return Err(PlannerError::PhaseNotReady {
                phase: from,
                outstanding,
            });
        }

        self.state.phase = to;
        self.record_checkpoint(&to.start_label())?;

        let completed = self.graph.tasks_in_phase(from).len();
        info!(from = %from, to = %to, "Phase advanced");
        self.write_journal(JournalEntry::project(
            JournalEvent::PhaseAdvanced,
            format!("{} -> {}: all {} task(s) of {} completed", from, to, completed, from),
        ))?;
        Ok(to)
    }

    /// Re-enter `building` from `review`.
    pub fn iterate(&mut self) -> Result<ProjectPhase> {
        let from = self.state.phase;
        let to = from.iterate()?;

        self.state.phase = to;
        self.record_checkpoint(&to.start_label())?;

        info!(from = %from, to = %to, "Iterating");
        self.write_journal(JournalEntry::project(
            JournalEvent::PhaseIterated,
            format!("{} -> {}: operator requested another building round", from, to),
        ))?;
        Ok(to)
    }

    /// Operator override: jump to any phase.
    pub fn override_phase(&mut self, target: ProjectPhase, reason: &str) -> Result<()> {
        let from = self.state.phase;
        self.state.phase = target;
        self.record_checkpoint(&target.start_label())?;

        warn!(from = %from, to = %target, reason = %reason, "Phase overridden by operator");
        self.write_journal(JournalEntry::project(
            JournalEvent::PhaseOverridden,
            format!("{} -> {}: {}", from, target, reason),
        ))
    }

    /// Build the context bundle a task would be delegated with.
    pub fn build_context(&self, task: &Task) -> Result<ContextBundle> {
        let capability = self.state.effective_capability(task);
        ContextBundler::new(&self.graph, &self.registry, &self.state.decisions)
            .with_phase_notes(self.settings.phase_notes.get(&task.phase).map(String::as_str))
            .build(task, capability)
    }

    /// Process exactly one unit of work.
    ///
    /// Either one task runs to completion or blockage, or the phase is
    /// advanced, or the loop reports that nothing can run.
    pub async fn step(&mut self) -> Result<StepOutcome> {
        let phase = self.state.phase;

        if let Some(task) = self.graph.next_ready_task(phase).cloned() {
            return self.run_task(task).await;
        }

        let outstanding = self.graph.outstanding(phase);
        if !outstanding.is_empty() {
            return Ok(StepOutcome::Idle { phase, outstanding });
        }

        if phase.is_terminal() {
            return Ok(StepOutcome::Finished);
        }

        if !self.settings.auto_advance {
            return Ok(StepOutcome::PhaseComplete { phase });
        }

        let to = self.advance_phase()?;
        Ok(StepOutcome::PhaseAdvanced { from: phase, to })
    }

    /// Step until nothing can run, an escalation is raised, the project
    /// finishes, or `max_steps` steps were taken.
    pub async fn run(&mut self, max_steps: Option<usize>) -> Result<RunReport> {
        let mut report = RunReport::default();

        while max_steps.is_none_or(|max| report.outcomes.len() < max) {
            let outcome = self.step().await?;
            let stop = outcome.stops_run();
            report.outcomes.push(outcome);
            if stop {
                break;
            }
        }

        Ok(report)
    }

    async fn run_task(&mut self, task: Task) -> Result<StepOutcome> {
        let capability = self.state.effective_capability(&task).to_string();

        let mut bundle = match self.build_context(&task) {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(task = %task.id, error = %e, "Context bundle rejected");
                return Err(e);
            }
        };

        let requeued = self.graph.mark_in_progress(&task.id)?;
        bundle.task.status = TaskStatus::InProgress;
        let record = self.state.escape_hatch.entry(task.id.clone()).or_default();
        self.monitor.record_start(record, requeued);
        self.persist()?;

        info!(
            task = %task.id,
            capability = %capability,
            phase = %task.phase,
            retry = requeued,
            "Delegating task"
        );

        let start = Instant::now();
        let response = self.delegate(&capability, &bundle).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let samples = self
            .state
            .durations
            .get(&task.capability)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let median_ms = median(samples);
        let record = self.state.escape_hatch.entry(task.id.clone()).or_default();
        self.monitor.record_elapsed(record, elapsed_ms, median_ms);

        match response {
            HandlerResponse::Completed { outputs } => self.complete_task(&task, outputs),
            HandlerResponse::Blocked(report) => self.block_task(&task, report),
        }
    }

    /// Invoke the handler, turning every failure into a technical blocker.
    async fn delegate(&self, capability: &str, bundle: &ContextBundle) -> HandlerResponse {
        let Some(skill) = self.registry.get(capability) else {
            return HandlerResponse::Blocked(
                BlockedReport::new(format!("missing handler for capability {}", capability))
                    .with_kind(BlockerKind::Technical)
                    .with_subject(capability),
            );
        };

        let handler = skill.handler.clone();
        let result = match self.settings.delegation_timeout {
            Some(limit) => match tokio::time::timeout(limit, handler.execute(bundle)).await {
                Ok(result) => result,
                Err(_) => {
                    return HandlerResponse::Blocked(
                        BlockedReport::new(format!(
                            "delegation timed out after {}s",
                            limit.as_secs_f64()
                        ))
                        .with_kind(BlockerKind::Technical)
                        .with_subject(capability),
                    );
                }
            },
            None => handler.execute(bundle).await,
        };

        match result {
            Ok(response) => response,
            Err(e) => HandlerResponse::Blocked(
                BlockedReport::new(format!("contract violation from {}: {:#}", capability, e))
                    .with_kind(BlockerKind::Technical)
                    .with_subject(capability),
            ),
        }
    }

    fn complete_task(&mut self, task: &Task, outputs: Vec<String>) -> Result<StepOutcome> {
        self.graph.mark_completed(&task.id, outputs.clone())?;

        let elapsed_ms = self
            .state
            .escape_hatch
            .remove(&task.id)
            .map(|r| r.elapsed_ms)
            .unwrap_or(0);
        self.state
            .durations
            .entry(task.capability.clone())
            .or_default()
            .push(elapsed_ms);
        self.state.degraded.remove(&task.id);

        self.record_checkpoint(&task.checkpoint_label(TaskStatus::Completed))?;

        info!(task = %task.id, outputs = outputs.len(), "Task completed");
        self.write_journal(JournalEntry::new(
            &task.id,
            JournalEvent::TaskCompleted,
            if outputs.is_empty() {
                "no outputs".to_string()
            } else {
                format!("outputs: {}", outputs.join(", "))
            },
        ))?;

        Ok(StepOutcome::Completed {
            task_id: task.id.clone(),
            outputs,
        })
    }

    fn block_task(&mut self, task: &Task, report: BlockedReport) -> Result<StepOutcome> {
        self.graph.mark_blocked(&task.id, &report.reason)?;
        self.graph.record_touched(&task.id, &report.artifacts)?;

        let classification = classify(&report);
        let record = self.state.escape_hatch.entry(task.id.clone()).or_default();
        self.monitor
            .record_blocked(record, &report.reason, report.growth);
        let stuck = self.monitor.check(record).map(|metric| {
            self.monitor
                .signal(&task.id, metric, record, &report.reason, classification.kind)
        });
        self.persist()?;

        warn!(
            task = %task.id,
            kind = %classification.kind,
            tagged = classification.tagged,
            reason = %report.reason,
            "Task blocked"
        );
        self.write_journal(JournalEntry::new(
            &task.id,
            JournalEvent::TaskBlocked,
            format!("{} blocker: {}", classification.kind, report.reason),
        ))?;

        if let Some(signal) = stuck {
            return self.escalate(Escalation::Stuck(signal));
        }

        self.remediate(task, &report, &classification)
    }

    fn remediate(
        &mut self,
        task: &Task,
        report: &BlockedReport,
        classification: &Classification,
    ) -> Result<StepOutcome> {
        let resolution = BlockerResolver::new(&self.registry).resolve(
            &mut self.graph,
            &mut self.state,
            &task.id,
            classification,
        )?;
        self.persist()?;

        if resolution.requeued {
            self.write_journal(JournalEntry::new(
                &task.id,
                JournalEvent::TaskRequeued,
                resolution.remediation.to_string(),
            ))?;
            return Ok(StepOutcome::Requeued {
                task_id: task.id.clone(),
                resolution,
            });
        }

        let counters = self
            .state
            .escape_hatch
            .get(&task.id)
            .map(|r| r.counters.clone())
            .unwrap_or_default();
        self.escalate(Escalation::Unresolved {
            task_id: task.id.clone(),
            reason: report.reason.clone(),
            resolution,
            counters,
        })
    }

    fn escalate(&mut self, escalation: Escalation) -> Result<StepOutcome> {
        self.state.push_escalation(escalation.clone());
        self.persist()?;

        warn!(task = %escalation.task_id(), "{}", escalation.summary());
        self.write_journal(JournalEntry::new(
            escalation.task_id(),
            JournalEvent::Escalated,
            escalation.summary(),
        ))?;
        self.operator
            .notify(&escalation)
            .map_err(PlannerError::Other)?;

        Ok(StepOutcome::Escalated { escalation })
    }

    /// Apply the operator's answer to a pending escalation.
    ///
    /// Returns the artifacts a reset discarded; empty for other decisions.
    pub fn apply_operator_decision(
        &mut self,
        task_id: &str,
        decision: OperatorDecision,
    ) -> Result<Vec<String>> {
        if self.state.escalation_for(task_id).is_none() {
            return Err(PlannerError::NoPendingEscalation {
                task_id: task_id.to_string(),
            });
        }
        let task = self.task(task_id)?.clone();

        let (artifacts, detail) = match &decision {
            OperatorDecision::AcceptAlternative { note } => {
                self.graph.requeue(task_id, false)?;
                if let Some(record) = self.state.escape_hatch.get_mut(task_id) {
                    self.monitor.clear_attempts(record);
                }
                self.state
                    .decisions
                    .insert(format!("alternative.{}", task_id), note.clone());
                self.state.take_escalation(task_id);
                self.persist()?;
                (Vec::new(), format!("accepted alternative: {}", note))
            }
            OperatorDecision::Reset => {
                let artifacts = self.graph.reset(task_id)?;
                self.state.escape_hatch.remove(task_id);
                self.state.degraded.remove(task_id);
                self.state.take_escalation(task_id);
                self.persist()?;
                self.store
                    .append_checkpoint(&format!("{}:{}:reset", task.phase, task_id))
                    .map_err(PlannerError::Storage)?;
                let detail = if artifacts.is_empty() {
                    "reset to pending; nothing touched".to_string()
                } else {
                    format!("reset to pending; discarded {}", artifacts.join(", "))
                };
                (artifacts, detail)
            }
            OperatorDecision::OverrideCompleted { outputs } => {
                self.graph.force_complete(task_id, outputs.clone())?;
                self.state.escape_hatch.remove(task_id);
                self.state.degraded.remove(task_id);
                self.state.take_escalation(task_id);
                self.record_checkpoint(&task.checkpoint_label(TaskStatus::Completed))?;
                (
                    Vec::new(),
                    format!("marked completed by operator; outputs: {}", outputs.join(", ")),
                )
            }
        };

        info!(task = %task_id, decision = decision.label(), "Operator decision applied");
        self.write_journal(JournalEntry::new(
            task_id,
            JournalEvent::OperatorDecision,
            detail,
        ))?;
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryJournal;
    use crate::operator::RecordingOperator;
    use crate::skills::{SkillDescriptor, SkillHandler};
    use crate::state::MemoryStateStore;
    use std::sync::Arc;

    fn handler(response: HandlerResponse) -> Arc<dyn SkillHandler> {
        Arc::new(move |_: &ContextBundle| -> anyhow::Result<HandlerResponse> {
            Ok(response.clone())
        })
    }

    fn orchestrator(registry: SkillRegistry) -> (Orchestrator, MemoryStateStore, MemoryJournal) {
        let store = MemoryStateStore::new();
        let journal = MemoryJournal::new();
        let orchestrator = Orchestrator::new(
            registry,
            Box::new(store.clone()),
            Box::new(journal.clone()),
            Box::new(RecordingOperator::new()),
            OrchestratorSettings::default(),
        )
        .unwrap();
        (orchestrator, store, journal)
    }

    #[tokio::test]
    async fn test_step_completes_and_checkpoints() {
        let mut registry = SkillRegistry::new();
        registry
            .register(SkillDescriptor::new("x"), handler(HandlerResponse::completed(["o1"])))
            .unwrap();
        let (mut orch, store, journal) = orchestrator(registry);
        orch.override_phase(ProjectPhase::Building, "skip discovery in test")
            .unwrap();
        orch.plan(vec![Task::new("a", "A", "x", vec![])], vec![])
            .unwrap();

        let outcome = orch.step().await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Completed {
                task_id: "a".into(),
                outputs: vec!["o1".into()]
            }
        );
        assert_eq!(orch.state().checkpoint.as_deref(), Some("building:a:completed"));
        assert!(store.labels().contains(&"building:a:completed".to_string()));
        assert_eq!(journal.events(JournalEvent::TaskCompleted).len(), 1);
        assert!(orch.state().escape_hatch.is_empty());
        assert_eq!(orch.state().durations.get("x").map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_handler_error_is_technical_blocker() {
        let mut registry = SkillRegistry::new();
        let failing: Arc<dyn SkillHandler> =
            Arc::new(|_: &ContextBundle| -> anyhow::Result<HandlerResponse> {
                Err(anyhow::anyhow!("garbled reply"))
            });
        registry.register(SkillDescriptor::new("x"), failing).unwrap();
        let (mut orch, _store, _journal) = orchestrator(registry);
        orch.override_phase(ProjectPhase::Building, "test").unwrap();
        orch.plan(vec![Task::new("a", "A", "x", vec![])], vec![])
            .unwrap();

        let outcome = orch.step().await.unwrap();
        match outcome {
            StepOutcome::Escalated {
                escalation: Escalation::Unresolved { reason, resolution, .. },
            } => {
                assert!(reason.contains("contract violation"));
                assert_eq!(resolution.kind, BlockerKind::Technical);
            }
            other => panic!("Expected unresolved technical escalation, got {:?}", other),
        }
        assert_eq!(orch.graph().get("a").unwrap().status, TaskStatus::Blocked);
        assert!(orch.state().missing_resources.contains("x"));
    }

    #[tokio::test]
    async fn test_idle_when_only_blocked_work_remains() {
        let mut registry = SkillRegistry::new();
        registry
            .register(
                SkillDescriptor::new("x"),
                handler(HandlerResponse::blocked("Which currency should prices use?")),
            )
            .unwrap();
        let (mut orch, _store, _journal) = orchestrator(registry);
        orch.override_phase(ProjectPhase::Building, "test").unwrap();
        orch.plan(vec![Task::new("a", "A", "x", vec![])], vec![])
            .unwrap();

        assert!(matches!(
            orch.step().await.unwrap(),
            StepOutcome::Escalated { .. }
        ));
        assert_eq!(
            orch.step().await.unwrap(),
            StepOutcome::Idle {
                phase: ProjectPhase::Building,
                outstanding: vec!["a".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_empty_phases_auto_advance_to_finish() {
        let (mut orch, store, _journal) = orchestrator(SkillRegistry::new());

        let report = orch.run(None).await.unwrap();
        assert!(report.finished());
        assert_eq!(orch.phase(), ProjectPhase::Review);
        assert_eq!(
            store.labels(),
            vec!["stack:start", "planning:start", "building:start", "review:start"]
        );
    }

    #[tokio::test]
    async fn test_auto_advance_off_stops_at_phase_end() {
        let store = MemoryStateStore::new();
        let mut orch = Orchestrator::new(
            SkillRegistry::new(),
            Box::new(store),
            Box::new(MemoryJournal::new()),
            Box::new(RecordingOperator::new()),
            OrchestratorSettings {
                auto_advance: false,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(
            orch.step().await.unwrap(),
            StepOutcome::PhaseComplete {
                phase: ProjectPhase::Discovery
            }
        );
        assert_eq!(orch.phase(), ProjectPhase::Discovery);
    }

    #[tokio::test]
    async fn test_decision_without_escalation_is_rejected() {
        let (mut orch, _store, _journal) = orchestrator(SkillRegistry::new());
        orch.plan(vec![Task::new("a", "A", "x", vec![])], vec![])
            .unwrap();
        let err = orch
            .apply_operator_decision("a", OperatorDecision::Reset)
            .unwrap_err();
        assert!(matches!(err, PlannerError::NoPendingEscalation { .. }));
    }

    #[test]
    fn test_iterate_only_from_review() {
        let (mut orch, _store, _journal) = orchestrator(SkillRegistry::new());
        assert!(matches!(
            orch.iterate(),
            Err(PlannerError::InvalidPhaseTransition { .. })
        ));

        orch.override_phase(ProjectPhase::Review, "test").unwrap();
        assert_eq!(orch.iterate().unwrap(), ProjectPhase::Building);
        assert_eq!(orch.state().checkpoint.as_deref(), Some("building:start"));
    }

    #[test]
    fn test_advance_from_review_is_invalid() {
        let (mut orch, _store, _journal) = orchestrator(SkillRegistry::new());
        orch.override_phase(ProjectPhase::Review, "test").unwrap();
        assert!(matches!(
            orch.advance_phase(),
            Err(PlannerError::InvalidPhaseTransition { .. })
        ));
    }
}

//! Escape hatch monitor.
//!
//! Tracks per-task signals that repeated remediation is not converging:
//!
//! - `retry_count`: restarts of a task that had been re-queued from `blocked`
//! - `oscillation_cycles`: blocker A leads to B which leads back to A
//! - `complexity_growth`: reported size of unaccepted output since the last success
//! - `time_multiplier`: time spent on the task over the median of similar completed tasks
//!
//! The monitor only raises a [`StuckSignal`]. Resolving it is the operator's
//! call, and nothing is reset without that decision.

use crate::errors::BlockerKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of reason hashes kept per task.
pub const HISTORY_LEN: usize = 6;

fn default_max_retries() -> u32 {
    3
}

fn default_max_oscillations() -> u32 {
    2
}

fn default_growth_threshold() -> u64 {
    2000
}

fn default_time_multiplier() -> f64 {
    5.0
}

/// Trigger thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscapeConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_oscillations")]
    pub max_oscillations: u32,
    /// Absolute growth limit; exceeding it triggers
    #[serde(default = "default_growth_threshold")]
    pub growth_threshold: u64,
    /// Ratio limit; exceeding it triggers
    #[serde(default = "default_time_multiplier")]
    pub time_multiplier: f64,
}

impl Default for EscapeConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_oscillations: default_max_oscillations(),
            growth_threshold: default_growth_threshold(),
            time_multiplier: default_time_multiplier(),
        }
    }
}

/// The four counters reported for a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscapeCounters {
    pub retry_count: u32,
    pub oscillation_cycles: u32,
    pub complexity_growth: u64,
    pub time_multiplier: f64,
}

/// Persisted per-task monitor state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscapeRecord {
    #[serde(flatten)]
    pub counters: EscapeCounters,
    /// Rolling window of blocker reason hashes, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<String>,
    /// Time spent delegating this task across attempts
    #[serde(default)]
    pub elapsed_ms: u64,
}

/// Which threshold fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StuckMetric {
    RetryCount,
    OscillationCycles,
    ComplexityGrowth,
    TimeMultiplier,
}

impl fmt::Display for StuckMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StuckMetric::RetryCount => write!(f, "retry_count"),
            StuckMetric::OscillationCycles => write!(f, "oscillation_cycles"),
            StuckMetric::ComplexityGrowth => write!(f, "complexity_growth"),
            StuckMetric::TimeMultiplier => write!(f, "time_multiplier"),
        }
    }
}

/// Structured escalation raised when a task is stuck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StuckSignal {
    pub task_id: String,
    pub triggering_metric: StuckMetric,
    pub counters: EscapeCounters,
    /// Reason hashes, oldest first
    pub history: Vec<String>,
    /// The blocker reason of the observation that fired
    pub reason: String,
    pub kind: BlockerKind,
}

/// Short stable hash of a blocker reason.
pub fn reason_hash(reason: &str) -> String {
    let normalized = reason.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.to_lowercase().as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

/// Median of a sample set, `None` when empty.
pub fn median(samples: &[u64]) -> Option<u64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(((u128::from(sorted[mid - 1]) + u128::from(sorted[mid])) / 2) as u64)
    } else {
        Some(sorted[mid])
    }
}

/// Updates counters and evaluates the trigger condition.
#[derive(Debug, Clone, Default)]
pub struct EscapeMonitor {
    config: EscapeConfig,
}

impl EscapeMonitor {
    pub fn new(config: EscapeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EscapeConfig {
        &self.config
    }

    /// Record a task start. Restarts after a re-queue count as retries.
    pub fn record_start(&self, record: &mut EscapeRecord, requeued: bool) {
        if requeued {
            record.counters.retry_count += 1;
        }
    }

    /// Record the time spent in one delegation.
    ///
    /// `median_ms` is the median duration of completed tasks with the same
    /// capability; without samples the multiplier stays at zero.
    pub fn record_elapsed(&self, record: &mut EscapeRecord, elapsed_ms: u64, median_ms: Option<u64>) {
        record.elapsed_ms = record.elapsed_ms.saturating_add(elapsed_ms);
        record.counters.time_multiplier = match median_ms {
            Some(median) if median > 0 => record.elapsed_ms as f64 / median as f64,
            _ => 0.0,
        };
    }

    /// Record one blocked observation.
    pub fn record_blocked(&self, record: &mut EscapeRecord, reason: &str, growth: u64) {
        record.history.push(reason_hash(reason));
        if record.history.len() > HISTORY_LEN {
            let excess = record.history.len() - HISTORY_LEN;
            record.history.drain(..excess);
        }

        if let [.., a, b, c] = record.history.as_slice()
            && a == c
            && a != b
        {
            record.counters.oscillation_cycles += 1;
        }

        record.counters.complexity_growth = record.counters.complexity_growth.saturating_add(growth);
    }

    /// Evaluate the trigger condition. Any single metric suffices.
    pub fn check(&self, record: &EscapeRecord) -> Option<StuckMetric> {
        let counters = &record.counters;
        if counters.retry_count >= self.config.max_retries {
            Some(StuckMetric::RetryCount)
        } else if counters.oscillation_cycles >= self.config.max_oscillations {
            Some(StuckMetric::OscillationCycles)
        } else if counters.complexity_growth > self.config.growth_threshold {
            Some(StuckMetric::ComplexityGrowth)
        } else if counters.time_multiplier > self.config.time_multiplier {
            Some(StuckMetric::TimeMultiplier)
        } else {
            None
        }
    }

    /// Build the signal for a fired metric.
    pub fn signal(
        &self,
        task_id: &str,
        metric: StuckMetric,
        record: &EscapeRecord,
        reason: &str,
        kind: BlockerKind,
    ) -> StuckSignal {
        StuckSignal {
            task_id: task_id.to_string(),
            triggering_metric: metric,
            counters: record.counters.clone(),
            history: record.history.clone(),
            reason: reason.to_string(),
            kind,
        }
    }

    /// Clear the retry and oscillation history after an accepted alternative.
    pub fn clear_attempts(&self, record: &mut EscapeRecord) {
        record.counters.retry_count = 0;
        record.counters.oscillation_cycles = 0;
        record.history.clear();
    }
}

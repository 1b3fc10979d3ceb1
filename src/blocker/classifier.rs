//! Blocker classification.
//!
//! Handlers should tag their blocked reports with a [`BlockerKind`] and a
//! subject. Untagged reports fall back to pattern matching on the free-text
//! reason.

use crate::errors::BlockerKind;
use crate::skills::BlockedReport;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static MISSING_OUTPUT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:missing|absent|no)\s+(?:upstream\s+)?outputs?\s+['"`]?([\w./:@-]+)"#)
        .unwrap()
});

static UNDECLARED_TASK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:unknown|undeclared|undefined|missing)\s+task\s+['"`]?([\w./:@-]+)"#)
        .unwrap()
});

static DEPENDENCY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:output\s+(?:is\s+)?(?:missing|absent)|depends?\s+on|dependenc(?:y|ies)\s+(?:not|missing|incomplete))")
        .unwrap()
});

static MISSING_RESOURCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:missing|no|unavailable)\s+(?:handler|capability|package|module|command|binary|library|tool)(?:\s+for)?(?:\s+capability)?\s+['"`]?([\w./:@-]+)"#,
    )
    .unwrap()
});

static TECHNICAL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:not\s+installed|command\s+not\s+found|contract\s+violation|timed\s+out|timeout|not\s+in\s+(?:the\s+)?(?:skill\s+)?registry)")
        .unwrap()
});

/// Outcome of classifying one blocked report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: BlockerKind,
    /// The missing task, output or resource, when one could be identified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Whether the handler tagged the report itself
    #[serde(default)]
    pub tagged: bool,
}

/// Classify a blocked report into exactly one category.
pub fn classify(report: &BlockedReport) -> Classification {
    if let Some(kind) = report.kind {
        let subject = report
            .subject
            .clone()
            .or_else(|| extract_subject(kind, &report.reason));
        return Classification {
            kind,
            subject,
            tagged: true,
        };
    }

    let kind = classify_reason(&report.reason);
    let subject = report
        .subject
        .clone()
        .or_else(|| extract_subject(kind, &report.reason));
    Classification {
        kind,
        subject,
        tagged: false,
    }
}

/// Classify a free-text reason with the fallback heuristics.
pub fn classify_reason(reason: &str) -> BlockerKind {
    if MISSING_OUTPUT_REGEX.is_match(reason) || UNDECLARED_TASK_REGEX.is_match(reason) {
        BlockerKind::Dependency
    } else if MISSING_RESOURCE_REGEX.is_match(reason) || TECHNICAL_REGEX.is_match(reason) {
        BlockerKind::Technical
    } else if DEPENDENCY_REGEX.is_match(reason) {
        BlockerKind::Dependency
    } else {
        BlockerKind::Product
    }
}

fn extract_subject(kind: BlockerKind, reason: &str) -> Option<String> {
    let patterns: &[&Regex] = match kind {
        BlockerKind::Dependency => &[&UNDECLARED_TASK_REGEX, &MISSING_OUTPUT_REGEX],
        BlockerKind::Technical => &[&MISSING_RESOURCE_REGEX],
        BlockerKind::Product => &[],
    };

    patterns.iter().find_map(|re| {
        re.captures(reason)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim_end_matches(['.', ',', ':']).to_string())
            .filter(|s| !s.is_empty())
    })
}

//! Blocker classification and local remediation.
//!
//! Every blocked observation is classified into a [`BlockerKind`]:
//!
//! | Kind | Remediation |
//! |------|-------------|
//! | Dependency | synthesize a deferred definition and re-link, else re-queue behind everything |
//! | Technical | record the missing resource, re-queue on a fallback capability if one exists |
//! | Product | none, the operator decides |
//!
//! The resulting [`Resolution`] is the trail attached to every escalation.

mod classifier;
mod resolver;

pub use classifier::{Classification, classify, classify_reason};
pub use resolver::{BlockerResolver, Remediation, Resolution};

//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                    |
//! |-----------------|-----------------------------------------------------|
//! | `project`       | `Init`, `Plan`                                      |
//! | `run`           | `Run`                                               |
//! | `phase`         | `Status`, `Advance`, `Iterate`, `OverridePhase`, `Checkpoints` |
//! | `resolve`       | `Resolve`, `Decide`                                 |
//! | `config`        | `Config`                                            |

pub mod config;
pub mod phase;
pub mod project;
pub mod resolve;
pub mod run;

pub use config::cmd_config;
pub use phase::{cmd_advance, cmd_checkpoints, cmd_iterate, cmd_override_phase, cmd_status};
pub use project::{cmd_init, cmd_plan};
pub use resolve::{cmd_decide, cmd_resolve};
pub use run::cmd_run;

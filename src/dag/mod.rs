//! Task graph for dependency-ordered scheduling.
//!
//! ## Architecture
//!
//! 1. **Task** - A unit of work with a capability name and dependencies
//! 2. **Builder** - Validates a task set (unique ids, known dependencies, phase order, no cycles)
//! 3. **Scheduler** - Owns the tasks, enforces status transitions, selects ready work
//!
//! Validation happens once per inserted batch; scheduling never re-checks for
//! cycles.
//!
//! ## Example
//!
//! ```
//! use planner::dag::{Task, TaskGraph};
//! use planner::phase::ProjectPhase;
//!
//! # fn example() -> planner::errors::Result<()> {
//! let mut graph = TaskGraph::new();
//! graph.insert_batch(
//!     vec![
//!         Task::new("a", "Scaffold", "x", vec![]),
//!         Task::new("b", "Routes", "y", vec!["a".to_string()]),
//!     ],
//!     vec![],
//! )?;
//!
//! assert_eq!(graph.next_ready_task(ProjectPhase::Building).unwrap().id, "a");
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

mod builder;
mod scheduler;
mod task;

pub use builder::DagBuilder;
pub use scheduler::TaskGraph;
pub use task::{Task, TaskStatus};

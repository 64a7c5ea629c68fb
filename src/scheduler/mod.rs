//! Task model and priority scheduling.
//!
//! This module defines what a research task is and how pending work is
//! ordered before an agent picks it up:
//!
//! - **Task**: an immutable unit of research work with a kind and a class
//! - **QueueItem**: the contract shared by every record kept in a durable queue
//! - **PrioritySelector**: a pure function interleaving `stock` work with
//!   all other classes at a configurable ratio
//!
//! # Interleave
//!
//! ```text
//!   pending: s1 s2 s3 s4 s5 s6 s7 s8 o1 o2
//!                       │
//!             ┌─────────┴─────────┐
//!   priority: s1 … s8       other: o1 o2
//!             └─────────┬─────────┘
//!   ordered:  s1 s2 s3 s4 o1 s5 s6 s7 s8 o2
//! ```

pub mod priority;
pub mod task;

pub use priority::{PrioritySelector, RoundPosition, SchedulerConfig};
pub use task::{QueueItem, Task, TaskClass, TaskKind, TaskState, TaskStatus};

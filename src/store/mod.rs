//! Durable, file-backed storage for prep sessions.
//!
//! - **TaskQueue**: a named queue of records with a completion log, a
//!   permanent failure registry and durable retry counters
//! - **PrepSession**: one staging directory holding every queue of a run,
//!   the organized brief and the event stream
//! - **BriefStore**: the organized brief document
//!
//! All writes go through write-then-rename so a crash never leaves a
//! partially visible record.

pub mod atomic;
pub mod brief;
pub mod events;
pub mod queue;
pub mod session;

pub use brief::{Brief, BriefSection, BriefStore, Placement};
pub use events::{EventLog, SessionEvent};
pub use queue::{FailureRecord, QueueCounters, QueueCounts, TaskQueue};
pub use session::{PrepSession, SessionInfo, StoreStats};

/// The research task queue.
pub type TaskStore = TaskQueue<crate::scheduler::Task>;

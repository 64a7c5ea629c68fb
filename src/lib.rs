//! prep-forge: deadline-bound multi-agent research prep.
//!
//! A strategy agent plans research tasks for a debate resolution; search,
//! cutter, and organizer agents turn them into fetched sources, evidence
//! cards, and a filed brief. All stages share durable queues with retry and
//! failure bookkeeping, and a live display shows progress until the deadline.

// Core modules
pub mod agents;
pub mod cli;
pub mod display;
pub mod error;
pub mod external;
pub mod llm;
pub mod prompts;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod utils;

// Re-export commonly used error types
pub use error::{ExternalError, LlmError, StoreError};

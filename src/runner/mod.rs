//! Session runner.
//!
//! Owns everything between "the user asked for a prep session" and "here is
//! what it produced": configuration, the shared deadline, spawning the
//! display and the agents, and the end-of-run summary.
//!
//! # Example
//!
//! ```ignore
//! use prep_forge::agents::{AgentKind, Side};
//! use prep_forge::runner::{Deadline, PrepConfig, PrepRunner};
//!
//! let runner = PrepRunner::new(PrepConfig::from_env()?, collaborators)?;
//! let deadline = Deadline::after(Duration::from_secs(600));
//! let summary = runner
//!     .run("Resolved: tariffs do more harm than good", Side::Pro, &deadline, &AgentKind::ALL)
//!     .await?;
//! print_summary(&summary);
//! ```

pub mod config;
pub mod deadline;
pub mod executor;
pub mod summary;

pub use config::{ConfigError, DisplayConfig, PollConfig, PrepConfig};
pub use deadline::Deadline;
pub use executor::{Collaborators, PrepRunner, RunnerError};
pub use summary::{print_summary, AgentCounters, SessionStats, SessionSummary};

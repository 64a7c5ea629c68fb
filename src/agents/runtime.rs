//! The uniform agent contract and the generic loop that drives it.
//!
//! ```text
//!   ┌──────────┐  none  ┌─────────┐
//!   │ checking │ ─────► │ waiting │ ── poll interval ──┐
//!   └──────────┘        └─────────┘                    │
//!        │ item  ▲                                     │
//!        ▼       └─────────────────────────────────────┘
//!   ┌─────────┐  ok   on_success (commit)
//!   │ working │ ────►
//!   └─────────┘  err  on_error (retry / fail / release)
//! ```
//!
//! The loop ends at the deadline or on cancellation. Only storage errors
//! escape it; everything else is handed to the agent's `on_error`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::{AgentError, AgentResult};
use super::state::{AgentStateHandle, AgentStatus};
use crate::error::StoreError;
use crate::runner::Deadline;

#[async_trait]
pub trait Agent: Send + Sync {
    type Item: Send + Sync;

    fn name(&self) -> &str;

    fn state(&self) -> &AgentStateHandle;

    /// How long to wait when there is no work.
    fn poll_interval(&self) -> Duration;

    /// Whether the agent has the upstream data it needs to run alone.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when a dependency is missing.
    fn check_dependencies(&self) -> Result<(), String> {
        Ok(())
    }

    async fn on_start(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Selects the next unit of work, if any.
    async fn check_for_work(&self) -> AgentResult<Option<Self::Item>>;

    async fn process(&self, item: &Self::Item) -> AgentResult<()>;

    /// Commits a successful `process`.
    async fn on_success(&self, item: &Self::Item) -> Result<(), StoreError>;

    /// Handles a failed or interrupted `process`.
    ///
    /// `AgentError::DeadlineExceeded` means the work was cut off; the item
    /// must be left neither done nor failed.
    async fn on_error(&self, item: &Self::Item, error: AgentError) -> Result<(), StoreError>;

    async fn on_stop(&self) {}
}

/// What one agent did during a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentReport {
    pub agent: String,
    pub processed: u64,
    pub succeeded: u64,
    pub errors: u64,
    /// Items cut off by the deadline.
    pub interrupted: u64,
}

impl AgentReport {
    fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            ..Default::default()
        }
    }
}

/// Drives `agent` until the deadline.
///
/// # Errors
///
/// Returns the first `StoreError` raised by the agent's hooks or work;
/// all other failures are routed to `on_error` and the loop continues.
pub async fn run_agent<A: Agent>(agent: &A, deadline: &Deadline) -> Result<AgentReport, StoreError> {
    let state = agent.state();
    state.set_status(AgentStatus::Starting);
    info!(agent = %agent.name(), "Agent starting");

    let mut report = AgentReport::new(agent.name());
    let result = match agent.on_start().await {
        Ok(()) => drive(agent, deadline, &mut report).await,
        Err(e) => Err(e),
    };

    agent.on_stop().await;
    state.set_status(AgentStatus::Stopped);

    match &result {
        Ok(()) => info!(
            agent = %agent.name(),
            processed = report.processed,
            succeeded = report.succeeded,
            errors = report.errors,
            "Agent stopped"
        ),
        Err(e) => warn!(agent = %agent.name(), error = %e, "Agent stopped on storage error"),
    }
    result.map(|()| report)
}

async fn drive<A: Agent>(
    agent: &A,
    deadline: &Deadline,
    report: &mut AgentReport,
) -> Result<(), StoreError> {
    let state = agent.state();

    while !deadline.is_expired() {
        state.set_status(AgentStatus::Checking);
        let item = match agent.check_for_work().await {
            Ok(Some(item)) => item,
            Ok(None) => {
                state.set_status(AgentStatus::Waiting);
                deadline.sleep(agent.poll_interval()).await;
                continue;
            }
            Err(AgentError::Store(e)) => return Err(e),
            Err(e) => {
                warn!(agent = %agent.name(), error = %e, "Selecting work failed");
                state.set_last_error(Some(e.to_string()));
                state.set_status(AgentStatus::Waiting);
                deadline.sleep(agent.poll_interval()).await;
                continue;
            }
        };

        state.set_status(AgentStatus::Working);
        match deadline.run(agent.process(&item)).await {
            None => {
                debug!(agent = %agent.name(), "Work interrupted by deadline");
                agent.on_error(&item, AgentError::DeadlineExceeded).await?;
                report.interrupted += 1;
                break;
            }
            Some(Ok(())) => {
                agent.on_success(&item).await?;
                state.set_last_error(None);
                report.succeeded += 1;
            }
            Some(Err(AgentError::Store(e))) => {
                // Release without touching retry state.
                agent.on_error(&item, AgentError::DeadlineExceeded).await?;
                return Err(e);
            }
            Some(Err(e)) => {
                state.set_last_error(Some(e.to_string()));
                agent.on_error(&item, e).await?;
                report.errors += 1;
            }
        }

        state.record_processed();
        report.processed += 1;
        tokio::task::yield_now().await;
    }

    Ok(())
}

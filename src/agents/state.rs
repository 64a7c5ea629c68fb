//! Per-agent observable state.
//!
//! Each agent owns one [`AgentStateHandle`] and is its only writer. The
//! handle publishes through a `tokio::sync::watch` channel; the status
//! display holds receivers and only ever reads the latest value.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

/// Number of recent actions kept per agent.
pub const RECENT_ACTIONS: usize = 6;
/// Number of recent search queries kept per agent.
pub const RECENT_QUERIES: usize = 10;

/// Coarse lifecycle status shown in the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Starting,
    Checking,
    Working,
    Waiting,
    Stopped,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Starting => "starting",
            AgentStatus::Checking => "checking",
            AgentStatus::Working => "working",
            AgentStatus::Waiting => "waiting",
            AgentStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source counters maintained by the search agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounters {
    pub sources_fetched: u64,
    pub sources_failed: u64,
    pub urls_collected: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    pub name: String,
    pub status: AgentStatus,
    /// What the agent is focused on, e.g. the producer's current phase.
    pub current_direction: String,
    pub items_processed: u64,
    pub items_created: u64,
    pub recent_actions: VecDeque<String>,
    pub recent_queries: VecDeque<String>,
    pub counters: SourceCounters,
    pub last_error: Option<String>,
}

impl AgentState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: AgentStatus::Idle,
            current_direction: String::new(),
            items_processed: 0,
            items_created: 0,
            recent_actions: VecDeque::with_capacity(RECENT_ACTIONS),
            recent_queries: VecDeque::with_capacity(RECENT_QUERIES),
            counters: SourceCounters::default(),
            last_error: None,
        }
    }
}

fn push_bounded(buf: &mut VecDeque<String>, value: String, cap: usize) {
    if buf.len() == cap {
        buf.pop_front();
    }
    buf.push_back(value);
}

/// Writer side of an agent's state.
///
/// Clones share the same channel; only the owning agent should mutate it.
#[derive(Debug, Clone)]
pub struct AgentStateHandle {
    tx: Arc<watch::Sender<AgentState>>,
}

impl AgentStateHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(AgentState::new(name))),
        }
    }

    /// A receiver for readers such as the status display.
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.tx.subscribe()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> AgentState {
        self.tx.borrow().clone()
    }

    pub fn status(&self) -> AgentStatus {
        self.tx.borrow().status
    }

    pub fn set_status(&self, status: AgentStatus) {
        self.tx.send_if_modified(|s| {
            let changed = s.status != status;
            s.status = status;
            changed
        });
    }

    pub fn set_direction(&self, direction: impl Into<String>) {
        let direction = direction.into();
        self.tx.send_modify(|s| s.current_direction = direction);
    }

    /// Records a human-readable action in the recent-actions ring.
    pub fn push_action(&self, action: impl Into<String>) {
        let action = action.into();
        self.tx
            .send_modify(|s| push_bounded(&mut s.recent_actions, action, RECENT_ACTIONS));
    }

    pub fn push_query(&self, query: impl Into<String>) {
        let query = query.into();
        self.tx
            .send_modify(|s| push_bounded(&mut s.recent_queries, query, RECENT_QUERIES));
    }

    pub fn record_processed(&self) {
        self.tx.send_modify(|s| s.items_processed += 1);
    }

    pub fn record_created(&self, count: u64) {
        if count > 0 {
            self.tx.send_modify(|s| s.items_created += count);
        }
    }

    pub fn record_sources(&self, fetched: u64, failed: u64) {
        self.tx.send_modify(|s| {
            s.counters.sources_fetched += fetched;
            s.counters.sources_failed += failed;
        });
    }

    pub fn record_urls(&self, count: u64) {
        self.tx.send_modify(|s| s.counters.urls_collected += count);
    }

    pub fn set_last_error(&self, error: Option<String>) {
        self.tx.send_modify(|s| s.last_error = error);
    }
}

//! Research agents and the runtime that drives them.
//!
//! One producer ([`StrategyAgent`]) writes research tasks; three consumer
//! stages turn them into search results, cards, and a filed brief. Every
//! consumer runs inside [`ConsumerAgent`], which owns selection, claims,
//! retries, and commit; the stages only implement [`Stage::process`].
//!
//! ```text
//!   strategy ──tasks──► search ──results──► cutter ──cards──► organizer
//!      ▲                                                         │
//!      └──────────────────────── feedback ───────────────────────┘
//! ```

pub mod consumer;
pub mod cutter;
pub mod dedup;
pub mod error;
pub mod organizer;
pub mod retry;
pub mod runtime;
pub mod search;
pub mod state;
pub mod strategy;
pub mod types;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use consumer::{ConsumerAgent, Stage, StageContext, DEFAULT_CONSUMER_POLL};
pub use cutter::CutterStage;
pub use dedup::ArgumentDeduper;
pub use error::{AgentError, AgentResult};
pub use organizer::OrganizerStage;
pub use retry::{RetryConfig, RetryDecision, RetryPolicy};
pub use runtime::{run_agent, Agent, AgentReport};
pub use search::{SearchConfig, SearchStage};
pub use state::{AgentState, AgentStateHandle, AgentStatus, SourceCounters};
pub use strategy::{Phase, StrategyAgent, StrategyWork, DEFAULT_PRODUCER_POLL};
pub use types::{Card, Feedback, FeedbackKind, SearchResult, Side, SourceRecord};

/// The four agents of a prep session, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Strategy,
    Search,
    Cutter,
    Organizer,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Strategy,
        AgentKind::Search,
        AgentKind::Cutter,
        AgentKind::Organizer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Strategy => "strategy",
            AgentKind::Search => "search",
            AgentKind::Cutter => "cutter",
            AgentKind::Organizer => "organizer",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strategy" => Ok(AgentKind::Strategy),
            "search" => Ok(AgentKind::Search),
            "cutter" => Ok(AgentKind::Cutter),
            "organizer" => Ok(AgentKind::Organizer),
            other => Err(format!(
                "unknown agent '{}', expected one of strategy, search, cutter, organizer",
                other
            )),
        }
    }
}

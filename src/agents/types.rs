//! Records exchanged between the research agents.
//!
//! Tasks flow from the strategy agent to search; search results flow to the
//! cutter; cards flow to the organizer; feedback flows back to strategy.
//! Every record carries the class of the task it descends from.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scheduler::{QueueItem, TaskClass, TaskKind};

/// Side of the resolution being prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Pro,
    Con,
}

impl Side {
    pub fn opponent(&self) -> Side {
        match self {
            Side::Pro => Side::Con,
            Side::Con => Side::Pro,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Pro => "pro",
            Side::Con => "con",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pro" | "aff" => Ok(Side::Pro),
            "con" | "neg" => Ok(Side::Con),
            other => Err(format!("unknown side '{}', expected pro or con", other)),
        }
    }
}

/// Outcome of fetching one candidate source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Fetched,
    Failed,
}

/// One source attempted while researching a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRecord {
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Extracted article text, present only when fetched.
    #[serde(default)]
    pub text: Option<String>,
    pub status: FetchStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl SourceRecord {
    pub fn fetched(url: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            text: Some(text.into()),
            status: FetchStatus::Fetched,
            error: None,
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            text: None,
            status: FetchStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn is_fetched(&self) -> bool {
        self.status == FetchStatus::Fetched && self.text.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Staged output of the search agent for one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub id: String,
    pub task_id: String,
    pub argument: String,
    #[serde(default)]
    pub search_intent: String,
    pub kind: TaskKind,
    pub class: TaskClass,
    pub query: String,
    pub sources: Vec<SourceRecord>,
    pub created_at: DateTime<Utc>,
}

impl SearchResult {
    /// Result id derived from the task id, so a retried task writes the same record.
    pub fn id_for_task(task_id: &str) -> String {
        format!("res-{}", task_id)
    }

    /// Sources with usable text.
    pub fn fetched_sources(&self) -> Vec<&SourceRecord> {
        self.sources.iter().filter(|s| s.is_fetched()).collect()
    }
}

impl QueueItem for SearchResult {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority_class(&self) -> TaskClass {
        self.class
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A quoted piece of evidence cut from a fetched source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Card {
    pub id: String,
    pub result_id: String,
    pub task_id: String,
    pub argument: String,
    pub kind: TaskKind,
    pub class: TaskClass,
    /// One-line statement of what the evidence proves.
    pub tag: String,
    pub author: String,
    pub year: String,
    pub source_title: String,
    pub url: String,
    pub text: String,
    /// Grouping hint used by the organizer.
    #[serde(default)]
    pub semantic_hint: String,
    pub created_at: DateTime<Utc>,
}

impl Card {
    /// Card id derived from its result and position, so re-cutting is idempotent.
    pub fn id_for(result_id: &str, index: usize) -> String {
        format!("{}-c{}", result_id, index + 1)
    }
}

impl QueueItem for Card {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority_class(&self) -> TaskClass {
        self.class
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// What the organizer noticed about the brief.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// An argument that needs more evidence.
    Gap,
    /// A new argument suggested by existing evidence.
    Opportunity,
    /// An impact scenario missing connecting evidence.
    LinkChain,
}

impl FromStr for FeedbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "gap" => Ok(FeedbackKind::Gap),
            "opportunity" => Ok(FeedbackKind::Opportunity),
            "link_chain" => Ok(FeedbackKind::LinkChain),
            other => Err(format!("unknown feedback type '{}'", other)),
        }
    }
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeedbackKind::Gap => "gap",
            FeedbackKind::Opportunity => "opportunity",
            FeedbackKind::LinkChain => "link_chain",
        };
        f.write_str(s)
    }
}

/// Organizer feedback consumed by the strategy agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    pub id: String,
    pub kind: FeedbackKind,
    pub message: String,
    #[serde(default)]
    pub suggested_intent: String,
    pub created_at: DateTime<Utc>,
}

impl Feedback {
    pub fn new(kind: FeedbackKind, message: impl Into<String>, suggested_intent: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            kind,
            message: message.into(),
            suggested_intent: suggested_intent.into(),
            created_at: Utc::now(),
        }
    }
}

impl QueueItem for Feedback {
    fn id(&self) -> &str {
        &self.id
    }

    // Feedback steers the plan, so it rides the priority stream.
    fn priority_class(&self) -> TaskClass {
        TaskClass::Stock
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

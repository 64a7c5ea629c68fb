//! Task definitions for the research scheduler.
//!
//! This module defines the core types every queue and agent agrees on:
//!
//! - `Task`: an immutable unit of research work created by the producer
//! - `TaskKind` / `TaskClass`: what the task argues and how urgently it is scheduled
//! - `TaskStatus`: externally tracked lifecycle state of a task
//! - `QueueItem`: the contract any record must satisfy to be stored and scheduled

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a research task is trying to establish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Evidence supporting one of our own arguments.
    Support,
    /// Evidence answering an opponent's argument.
    Answer,
    /// Additional evidence deepening an existing argument.
    Extension,
    /// Evidence for a terminal impact.
    Impact,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Support => "support",
            TaskKind::Answer => "answer",
            TaskKind::Extension => "extension",
            TaskKind::Impact => "impact",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "support" => Ok(TaskKind::Support),
            "answer" => Ok(TaskKind::Answer),
            "extension" => Ok(TaskKind::Extension),
            "impact" => Ok(TaskKind::Impact),
            other => Err(format!("unknown task kind '{}'", other)),
        }
    }
}

/// Scheduling class of a task. `Stock` is the high-priority stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    Stock,
    Creative,
    Niche,
    Opportunistic,
    SecondOrder,
}

impl TaskClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskClass::Stock => "stock",
            TaskClass::Creative => "creative",
            TaskClass::Niche => "niche",
            TaskClass::Opportunistic => "opportunistic",
            TaskClass::SecondOrder => "second_order",
        }
    }

    /// Returns true for the class that gets the larger share of the interleave.
    pub fn is_priority(&self) -> bool {
        matches!(self, TaskClass::Stock)
    }
}

impl fmt::Display for TaskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "stock" => Ok(TaskClass::Stock),
            "creative" => Ok(TaskClass::Creative),
            "niche" => Ok(TaskClass::Niche),
            "opportunistic" => Ok(TaskClass::Opportunistic),
            "second_order" => Ok(TaskClass::SecondOrder),
            other => Err(format!("unknown task class '{}'", other)),
        }
    }
}

/// Contract for records stored in a durable queue and ordered by the scheduler.
///
/// Downstream records (search results, cards, feedback) report the class of
/// the task they came from so the same interleave applies at every stage.
pub trait QueueItem: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Globally unique, immutable identifier. Used as the on-disk record name.
    fn id(&self) -> &str;

    /// Class used by the priority selector.
    fn priority_class(&self) -> TaskClass;

    /// Creation time, used as the ordering tie-break.
    fn created_at(&self) -> DateTime<Utc>;
}

/// A unit of research work.
///
/// Tasks are created once by the producer and never mutated; their progress
/// is tracked by the task store, not on the task itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique identifier for the task.
    pub id: String,
    /// Short label of the claim being researched.
    pub argument: String,
    /// What the evidence is for.
    pub kind: TaskKind,
    /// Scheduling class.
    pub class: TaskClass,
    /// What evidence to look for. May be empty.
    #[serde(default)]
    pub search_intent: String,
    /// Producer phase or feedback item that created this task.
    #[serde(default)]
    pub origin: String,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Creates a new task with a fresh id and the current timestamp.
    ///
    /// # Arguments
    ///
    /// * `argument` - The claim being researched
    /// * `kind` - What the evidence is for
    /// * `class` - Scheduling class
    pub fn new(argument: impl Into<String>, kind: TaskKind, class: TaskClass) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            argument: argument.into(),
            kind,
            class,
            search_intent: String::new(),
            origin: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Overrides the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_search_intent(mut self, intent: impl Into<String>) -> Self {
        self.search_intent = intent.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Overrides the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

impl QueueItem for Task {
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

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({}, {}/{}: {})", self.id, self.kind, self.class, self.argument)
    }
}

/// Lifecycle state of a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::InProgress => "in_progress",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status of an item as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub retry_count: u32,
}

impl TaskStatus {
    /// Returns true if the item will never be selected again.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TaskState::Done | TaskState::Failed)
    }
}

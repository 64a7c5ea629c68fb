//! Strategy agent: the single producer of research tasks.
//!
//! Each unit of work is either a pending feedback item from the organizer
//! or a generation round for the current phase. Phases rotate:
//!
//! ```text
//!   initial_arguments → opponent_answers → impact_chains → deep_dive ─┐
//!          ▲                                                          │
//!          └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Generation output is validated entry by entry; malformed entries are
//! dropped with a warning and never reach the queue. Near-duplicate
//! arguments are filtered by [`ArgumentDeduper`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dedup::ArgumentDeduper;
use super::error::{AgentError, AgentResult};
use super::runtime::Agent;
use super::state::AgentStateHandle;
use super::types::{Feedback, FeedbackKind};
use crate::error::StoreError;
use crate::external::{offload, TextGenerator};
use crate::prompts::{build_answers_prompt, build_arguments_prompt, build_impacts_prompt};
use crate::scheduler::{QueueItem, Task, TaskClass, TaskKind};
use crate::store::PrepSession;
use crate::utils::parse_json_array;

/// Default pause between generation rounds.
pub const DEFAULT_PRODUCER_POLL: Duration = Duration::from_secs(5);

/// New tasks accepted per generation round.
pub const MAX_TASKS_PER_ROUND: usize = 3;

/// New tasks accepted per impact-chain round.
pub const MAX_IMPACTS_PER_ROUND: usize = 2;

/// Arguments with fewer cards than this get a deep-dive task.
pub const DEEP_DIVE_MIN_CARDS: usize = 3;

/// Producer phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    InitialArguments,
    OpponentAnswers,
    ImpactChains,
    DeepDive,
}

impl Phase {
    pub fn next(&self) -> Phase {
        match self {
            Phase::InitialArguments => Phase::OpponentAnswers,
            Phase::OpponentAnswers => Phase::ImpactChains,
            Phase::ImpactChains => Phase::DeepDive,
            Phase::DeepDive => Phase::InitialArguments,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::InitialArguments => "initial_arguments",
            Phase::OpponentAnswers => "opponent_answers",
            Phase::ImpactChains => "impact_chains",
            Phase::DeepDive => "deep_dive",
        }
    }

    /// Line shown in the display while the phase runs.
    pub fn direction(&self) -> &'static str {
        match self {
            Phase::InitialArguments => "Generating arguments",
            Phase::OpponentAnswers => "Preparing answers to opponent claims",
            Phase::ImpactChains => "Building impact chains",
            Phase::DeepDive => "Deepening thin arguments",
        }
    }

    /// Kind given to entries that do not name one.
    pub fn default_kind(&self) -> TaskKind {
        match self {
            Phase::InitialArguments => TaskKind::Support,
            Phase::OpponentAnswers => TaskKind::Answer,
            Phase::ImpactChains => TaskKind::Impact,
            Phase::DeepDive => TaskKind::Extension,
        }
    }

    pub fn max_tasks(&self) -> usize {
        match self {
            Phase::ImpactChains => MAX_IMPACTS_PER_ROUND,
            Phase::DeepDive => 1,
            _ => MAX_TASKS_PER_ROUND,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of producer work.
#[derive(Debug, Clone)]
pub enum StrategyWork {
    Feedback(Feedback),
    Generate(Phase),
}

/// Validates one generated entry into a task.
///
/// # Errors
///
/// Returns `AgentError::MalformedTask` for a missing or empty argument, or an
/// unknown kind or class.
pub fn task_from_entry(entry: &Value, phase: Phase) -> AgentResult<Task> {
    let argument = entry
        .get("argument")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| AgentError::MalformedTask(format!("entry has no argument: {}", entry)))?;

    let kind = match entry.get("kind").and_then(Value::as_str) {
        Some(k) => k.parse::<TaskKind>().map_err(AgentError::MalformedTask)?,
        None => phase.default_kind(),
    };
    let class = match entry.get("class").and_then(Value::as_str) {
        Some(c) => c.parse::<TaskClass>().map_err(AgentError::MalformedTask)?,
        None => TaskClass::Stock,
    };
    let intent = entry
        .get("search_intent")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim();

    Ok(Task::new(argument, kind, class)
        .with_search_intent(intent)
        .with_origin(phase.as_str()))
}

/// Task created in response to an organizer feedback item.
///
/// The id is derived from the feedback id so a replayed item cannot create
/// a second task.
pub fn task_from_feedback(feedback: &Feedback) -> Task {
    let (kind, class) = match feedback.kind {
        FeedbackKind::Gap => (TaskKind::Support, TaskClass::Stock),
        FeedbackKind::Opportunity => (TaskKind::Support, TaskClass::Opportunistic),
        FeedbackKind::LinkChain => (TaskKind::Impact, TaskClass::SecondOrder),
    };
    let intent = if feedback.suggested_intent.trim().is_empty() {
        feedback.message.as_str()
    } else {
        feedback.suggested_intent.as_str()
    };
    Task::new(feedback.message.trim(), kind, class)
        .with_id(format!("fb-{}", feedback.id))
        .with_search_intent(intent)
        .with_origin(format!("feedback:{}", feedback.kind))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// The producer agent.
pub struct StrategyAgent {
    session: Arc<PrepSession>,
    generator: Arc<dyn TextGenerator>,
    state: AgentStateHandle,
    deduper: Mutex<ArgumentDeduper>,
    phase: Mutex<Phase>,
    next_round_at: Mutex<Option<Instant>>,
    poll_interval: Duration,
}

impl StrategyAgent {
    pub fn new(session: Arc<PrepSession>, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            session,
            generator,
            state: AgentStateHandle::new("strategy"),
            deduper: Mutex::new(ArgumentDeduper::default()),
            phase: Mutex::new(Phase::InitialArguments),
            next_round_at: Mutex::new(None),
            poll_interval: DEFAULT_PRODUCER_POLL,
        }
    }

    /// Sets the pause between generation rounds.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.deduper = Mutex::new(ArgumentDeduper::new(threshold));
        self
    }

    pub fn phase(&self) -> Phase {
        *lock(&self.phase)
    }

    /// Moves to the next phase and schedules the next round.
    fn finish_round(&self) {
        let mut phase = lock(&self.phase);
        *phase = phase.next();
        *lock(&self.next_round_at) = Some(Instant::now() + self.poll_interval);
    }

    fn existing_arguments(&self, answers: bool) -> Result<Vec<String>, StoreError> {
        Ok(self
            .session
            .tasks()
            .all_items()?
            .into_iter()
            .filter(|t| (t.kind == TaskKind::Answer) == answers)
            .map(|t| t.argument)
            .collect())
    }

    /// Enqueues `task` unless its argument duplicates an earlier one.
    fn accept(&self, task: &Task) -> Result<bool, StoreError> {
        if !lock(&self.deduper).check_and_remember(&task.argument) {
            debug!(argument = %task.argument, "Skipping near-duplicate argument");
            return Ok(false);
        }
        if !self.session.tasks().enqueue_if_absent(task)? {
            return Ok(false);
        }
        info!(task_id = %task.id, argument = %task.argument, kind = %task.kind, class = %task.class, "Task created");
        self.state.push_action(format!("New: {}", task.argument));
        self.state.record_created(1);
        self.session.log_event(
            "strategy",
            "task_created",
            json!({"task_id": task.id, "argument": task.argument, "kind": task.kind, "class": task.class, "origin": task.origin}),
        );
        Ok(true)
    }

    async fn generate(&self, phase: Phase) -> AgentResult<usize> {
        let resolution = self.session.resolution();
        let side = self.session.side();
        let existing = self.existing_arguments(phase == Phase::OpponentAnswers)?;
        let existing: Vec<&str> = existing.iter().map(String::as_str).collect();
        let prompt = match phase {
            Phase::OpponentAnswers => build_answers_prompt(resolution, side, &existing),
            Phase::ImpactChains => build_impacts_prompt(resolution, side, &existing),
            _ => build_arguments_prompt(resolution, side, &existing),
        };

        let generator = self.generator.clone();
        let response = offload(move || generator.generate(&prompt)).await??;
        let entries: Vec<Value> = parse_json_array(&response)?;

        let mut created = 0;
        for entry in &entries {
            if created >= phase.max_tasks() {
                break;
            }
            let task = match task_from_entry(entry, phase) {
                Ok(task) => task,
                Err(e) => {
                    warn!(phase = %phase, error = %e, "Dropping malformed entry");
                    self.session.log_event("strategy", "malformed_entry", json!({"phase": phase.as_str(), "error": e.to_string()}));
                    continue;
                }
            };
            if self.accept(&task)? {
                created += 1;
            }
        }
        Ok(created)
    }

    fn deep_dive(&self) -> AgentResult<usize> {
        let brief = self.session.brief().load()?;
        let Some((argument, cards)) = brief.thinnest_argument(DEEP_DIVE_MIN_CARDS) else {
            return Ok(0);
        };

        let already_queued = self
            .session
            .tasks()
            .pending_tasks()?
            .iter()
            .any(|t| t.kind == TaskKind::Extension && t.argument == argument);
        if already_queued {
            return Ok(0);
        }

        let task = Task::new(argument, TaskKind::Extension, TaskClass::Stock)
            .with_search_intent(format!("Find additional evidence for: {}", argument))
            .with_origin(Phase::DeepDive.as_str());
        self.session.tasks().enqueue(&task)?;
        info!(task_id = %task.id, argument = %argument, cards, "Deep-dive task created");
        self.state.push_action(format!("Deep dive: {}", argument));
        self.state.record_created(1);
        self.session.log_event(
            "strategy",
            "task_created",
            json!({"task_id": task.id, "argument": argument, "kind": "extension", "origin": "deep_dive"}),
        );
        Ok(1)
    }
}

#[async_trait]
impl Agent for StrategyAgent {
    type Item = StrategyWork;

    fn name(&self) -> &str {
        "strategy"
    }

    fn state(&self) -> &AgentStateHandle {
        &self.state
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn on_start(&self) -> Result<(), StoreError> {
        let tasks = self.session.tasks().all_items()?;
        let mut deduper = lock(&self.deduper);
        for task in &tasks {
            deduper.remember(&task.argument);
        }
        debug!(seeded = deduper.len(), "Seeded argument deduper");
        Ok(())
    }

    async fn check_for_work(&self) -> AgentResult<Option<StrategyWork>> {
        let feedback_queue = self.session.feedback();
        for item in feedback_queue.pending_tasks()? {
            if feedback_queue.try_claim(item.id()) {
                return Ok(Some(StrategyWork::Feedback(item)));
            }
        }

        let due = match *lock(&self.next_round_at) {
            Some(at) => Instant::now() >= at,
            None => true,
        };
        if due {
            return Ok(Some(StrategyWork::Generate(self.phase())));
        }
        Ok(None)
    }

    async fn process(&self, item: &StrategyWork) -> AgentResult<()> {
        match item {
            StrategyWork::Feedback(feedback) => {
                self.state.set_direction(format!("Responding: {}", feedback.message));
                let task = task_from_feedback(feedback);
                self.accept(&task)?;
                Ok(())
            }
            StrategyWork::Generate(phase) => {
                self.state.set_direction(phase.direction());
                let created = match phase {
                    Phase::DeepDive => self.deep_dive()?,
                    _ => self.generate(*phase).await?,
                };
                info!(phase = %phase, created, "Generation round complete");
                self.session.log_event(
                    "strategy",
                    "round_complete",
                    json!({"phase": phase.as_str(), "created": created}),
                );
                Ok(())
            }
        }
    }

    async fn on_success(&self, item: &StrategyWork) -> Result<(), StoreError> {
        match item {
            StrategyWork::Feedback(feedback) => {
                let queue = self.session.feedback();
                let result = queue.mark_done(&feedback.id);
                queue.release(&feedback.id);
                result
            }
            StrategyWork::Generate(_) => {
                self.finish_round();
                Ok(())
            }
        }
    }

    async fn on_error(&self, item: &StrategyWork, error: AgentError) -> Result<(), StoreError> {
        match item {
            StrategyWork::Feedback(feedback) => {
                let queue = self.session.feedback();
                let result = match error {
                    AgentError::DeadlineExceeded => Ok(()),
                    error => {
                        warn!(feedback_id = %feedback.id, error = %error, "Feedback could not be applied");
                        queue.mark_failed(&feedback.id, &error.to_string())
                    }
                };
                queue.release(&feedback.id);
                result
            }
            StrategyWork::Generate(phase) => {
                if matches!(error, AgentError::DeadlineExceeded) {
                    return Ok(());
                }
                warn!(phase = %phase, error = %error, "Generation round failed");
                self.state.push_action(format!("Round failed: {}", phase));
                self.session.log_event(
                    "strategy",
                    "round_failed",
                    json!({"phase": phase.as_str(), "error": error.to_string()}),
                );
                self.finish_round();
                Ok(())
            }
        }
    }
}

//! Shared consumer core: selection, claims, retries, and commit.
//!
//! A [`Stage`] only knows how to turn one input record into output records.
//! [`ConsumerAgent`] wraps it with everything else: it picks the next input
//! through the priority selector, claims it so no sibling agent processes it
//! concurrently, holds failed items out of selection for the retry delay,
//! and resolves each input exactly once in the completion log or the
//! failure registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::{AgentError, AgentResult};
use super::retry::{RetryConfig, RetryDecision, RetryPolicy};
use super::runtime::Agent;
use super::state::AgentStateHandle;
use crate::error::StoreError;
use crate::scheduler::{PrioritySelector, QueueItem, RoundPosition, SchedulerConfig};
use crate::store::{PrepSession, TaskQueue};

/// Default wait between polls of an empty input queue.
pub const DEFAULT_CONSUMER_POLL: Duration = Duration::from_secs(2);

/// What a stage sees while processing one item.
pub struct StageContext<'a> {
    pub session: &'a PrepSession,
    pub state: &'a AgentStateHandle,
    /// Failed attempts recorded for this item so far (0 on the first try).
    pub attempt: u32,
}

/// One step of the research pipeline.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    type Input: QueueItem;

    fn name(&self) -> &str;

    /// The queue this stage consumes.
    fn input_queue(&self, session: &PrepSession) -> Arc<TaskQueue<Self::Input>>;

    /// Short label for logs and the display.
    fn describe(&self, item: &Self::Input) -> String {
        item.id().to_string()
    }

    /// Processes one item, writing any outputs idempotently.
    async fn process(&self, item: &Self::Input, ctx: &StageContext<'_>) -> AgentResult<()>;
}

/// A stage driven by the shared consumer discipline.
pub struct ConsumerAgent<S: Stage> {
    stage: S,
    session: Arc<PrepSession>,
    queue: Arc<TaskQueue<S::Input>>,
    selector: PrioritySelector,
    round: Mutex<RoundPosition>,
    retry: RetryPolicy,
    cooldowns: Mutex<HashMap<String, Instant>>,
    state: AgentStateHandle,
    poll_interval: Duration,
}

impl<S: Stage> ConsumerAgent<S> {
    pub fn new(stage: S, session: Arc<PrepSession>) -> Self {
        let queue = stage.input_queue(&session);
        let state = AgentStateHandle::new(stage.name());
        Self {
            stage,
            session,
            queue,
            selector: PrioritySelector::default(),
            round: Mutex::new(RoundPosition::default()),
            retry: RetryPolicy::default(),
            cooldowns: Mutex::new(HashMap::new()),
            state,
            poll_interval: DEFAULT_CONSUMER_POLL,
        }
    }

    pub fn with_scheduler(mut self, config: SchedulerConfig) -> Self {
        self.selector = PrioritySelector::new(config);
        self
    }

    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = RetryPolicy::new(config);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    pub fn queue(&self) -> &Arc<TaskQueue<S::Input>> {
        &self.queue
    }

    fn lock_cooldowns(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        match self.cooldowns.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Records a failed attempt and either schedules a retry or fails the item.
    fn settle_failure(&self, item: &S::Input, error: AgentError) -> Result<(), StoreError> {
        let id = item.id();
        let label = self.stage.describe(item);
        let retry_count = self.queue.record_retry(id)?;

        match self.retry.decide(retry_count, &error) {
            RetryDecision::Retry { retry_count, delay } => {
                self.lock_cooldowns().insert(id.to_string(), Instant::now() + delay);
                warn!(
                    agent = %self.stage.name(),
                    item_id = %id,
                    retry_count,
                    error = %error,
                    "Attempt failed, will retry"
                );
                self.state.push_action(format!(
                    "Retry {}/{}: {}",
                    retry_count,
                    self.retry.config().max_retries,
                    label
                ));
                self.session.log_event(
                    self.stage.name(),
                    "retry_scheduled",
                    json!({"item_id": id, "retry_count": retry_count, "error": error.to_string()}),
                );
            }
            RetryDecision::Fail { retry_count, reason } => {
                self.queue.mark_failed(id, &reason)?;
                self.lock_cooldowns().remove(id);
                warn!(
                    agent = %self.stage.name(),
                    item_id = %id,
                    retry_count,
                    reason = %reason,
                    "Item failed permanently"
                );
                self.state.push_action(format!("Failed: {}", label));
                self.session.log_event(
                    self.stage.name(),
                    "failed",
                    json!({"item_id": id, "retry_count": retry_count, "reason": reason}),
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Stage> Agent for ConsumerAgent<S> {
    type Item = S::Input;

    fn name(&self) -> &str {
        self.stage.name()
    }

    fn state(&self) -> &AgentStateHandle {
        &self.state
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn check_dependencies(&self) -> Result<(), String> {
        if self.queue.counts().total == 0 {
            return Err(format!(
                "{} needs at least one item in the '{}' queue",
                self.stage.name(),
                self.queue.name()
            ));
        }
        Ok(())
    }

    async fn check_for_work(&self) -> AgentResult<Option<S::Input>> {
        let pending = self.queue.pending_tasks()?;
        if pending.is_empty() {
            return Ok(None);
        }

        let now = Instant::now();
        let mut cooldowns = self.lock_cooldowns();
        cooldowns.retain(|_, until| *until > now);
        let mut round = match self.round.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let picked = self.selector.next_in_round(&mut *round, pending, |item| {
            !cooldowns.contains_key(item.id()) && self.queue.try_claim(item.id())
        });
        drop(round);
        drop(cooldowns);

        if let Some(ref item) = picked {
            debug!(agent = %self.stage.name(), item_id = %item.id(), "Claimed item");
        }
        Ok(picked)
    }

    async fn process(&self, item: &S::Input) -> AgentResult<()> {
        let attempt = self.queue.retry_count(item.id())?;
        let ctx = StageContext {
            session: &self.session,
            state: &self.state,
            attempt,
        };
        self.stage.process(item, &ctx).await
    }

    async fn on_success(&self, item: &S::Input) -> Result<(), StoreError> {
        let result = self.queue.mark_done(item.id());
        self.queue.release(item.id());
        result?;
        info!(agent = %self.stage.name(), item_id = %item.id(), "Item done");
        self.session.log_event(
            self.stage.name(),
            "completed",
            json!({"item_id": item.id()}),
        );
        Ok(())
    }

    async fn on_error(&self, item: &S::Input, error: AgentError) -> Result<(), StoreError> {
        let result = match error {
            AgentError::DeadlineExceeded => {
                debug!(agent = %self.stage.name(), item_id = %item.id(), "Left pending at deadline");
                Ok(())
            }
            error => self.settle_failure(item, error),
        };
        self.queue.release(item.id());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::Side;
    use crate::error::ExternalError;
    use crate::runner::Deadline;
    use crate::scheduler::{Task, TaskClass, TaskKind, TaskState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Stage that fails every attempt with the configured error.
    struct FailingStage {
        calls: AtomicUsize,
        permanent: bool,
    }

    #[async_trait]
    impl Stage for FailingStage {
        type Input = Task;

        fn name(&self) -> &str {
            "search"
        }

        fn input_queue(&self, session: &PrepSession) -> Arc<TaskQueue<Task>> {
            session.tasks().clone()
        }

        async fn process(&self, _item: &Task, _ctx: &StageContext<'_>) -> AgentResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                Err(AgentError::Permanent("never works".into()))
            } else {
                Err(AgentError::External(ExternalError::RateLimited("429".into())))
            }
        }
    }

    fn session(dir: &TempDir) -> Arc<PrepSession> {
        Arc::new(PrepSession::create(dir.path(), "Resolved: tariffs", Side::Pro).unwrap())
    }

    fn agent(session: &Arc<PrepSession>, permanent: bool) -> ConsumerAgent<FailingStage> {
        ConsumerAgent::new(
            FailingStage {
                calls: AtomicUsize::new(0),
                permanent,
            },
            session.clone(),
        )
        .with_retry(RetryConfig {
            max_retries: 3,
            retry_delay: Duration::ZERO,
        })
        .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_third_failure_marks_failed() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        let task = Task::new("Prices rise", TaskKind::Support, TaskClass::Stock);
        session.tasks().enqueue(&task).unwrap();
        let agent = agent(&session, false);

        for expected in 1..=3u32 {
            let item = agent.check_for_work().await.unwrap().unwrap();
            let err = agent.process(&item).await.unwrap_err();
            agent.on_error(&item, err).await.unwrap();
            assert_eq!(session.tasks().retry_count(&task.id).unwrap(), expected);
        }

        let status = session.tasks().status(&task.id).unwrap();
        assert_eq!(status.state, TaskState::Failed);
        assert_eq!(status.retry_count, 3);
        assert!(agent.check_for_work().await.unwrap().is_none());
        assert_eq!(session.tasks().failure(&task.id).unwrap().unwrap().retry_count, 3);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_immediately() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        let task = Task::new("Prices rise", TaskKind::Support, TaskClass::Stock);
        session.tasks().enqueue(&task).unwrap();
        let agent = agent(&session, true);

        let item = agent.check_for_work().await.unwrap().unwrap();
        let err = agent.process(&item).await.unwrap_err();
        agent.on_error(&item, err).await.unwrap();

        assert!(session.tasks().is_failed(&task.id));
        assert_eq!(session.tasks().retry_count(&task.id).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_holds_item_out() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        let task = Task::new("Prices rise", TaskKind::Support, TaskClass::Stock);
        session.tasks().enqueue(&task).unwrap();
        let agent = agent(&session, false).with_retry(RetryConfig {
            max_retries: 3,
            retry_delay: Duration::from_secs(60),
        });

        let item = agent.check_for_work().await.unwrap().unwrap();
        agent
            .on_error(&item, AgentError::External(ExternalError::Timeout("slow".into())))
            .await
            .unwrap();

        assert!(agent.check_for_work().await.unwrap().is_none());
        let status = session.tasks().status(&task.id).unwrap();
        assert_eq!(status.state, TaskState::Pending);
        assert_eq!(status.retry_count, 1);
    }

    #[tokio::test]
    async fn test_deadline_leaves_item_pending() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        let task = Task::new("Prices rise", TaskKind::Support, TaskClass::Stock);
        session.tasks().enqueue(&task).unwrap();
        let agent = agent(&session, false);

        let item = agent.check_for_work().await.unwrap().unwrap();
        assert_eq!(session.tasks().counts().in_progress, 1);
        agent.on_error(&item, AgentError::DeadlineExceeded).await.unwrap();

        let status = session.tasks().status(&task.id).unwrap();
        assert_eq!(status.state, TaskState::Pending);
        assert_eq!(status.retry_count, 0);
        assert_eq!(session.tasks().counts().in_progress, 0);
    }

    /// Stage that accepts every item.
    struct PassingStage;

    #[async_trait]
    impl Stage for PassingStage {
        type Input = Task;

        fn name(&self) -> &str {
            "search"
        }

        fn input_queue(&self, session: &PrepSession) -> Arc<TaskQueue<Task>> {
            session.tasks().clone()
        }

        async fn process(&self, _item: &Task, _ctx: &StageContext<'_>) -> AgentResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_selection_keeps_interleave_across_completions() {
        use chrono::TimeZone;

        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        let base = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let mut offset = 0;
        let mut enqueue = |id: &str, class: TaskClass| {
            offset += 1;
            let task = Task::new(format!("argument {}", id), TaskKind::Support, class)
                .with_id(id)
                .with_created_at(base + chrono::Duration::seconds(offset));
            session.tasks().enqueue(&task).unwrap();
        };
        for i in 1..=8 {
            enqueue(&format!("s{}", i), TaskClass::Stock);
        }
        enqueue("o1", TaskClass::Creative);
        enqueue("o2", TaskClass::Creative);

        let agent = ConsumerAgent::new(PassingStage, session.clone());
        let mut selected = Vec::new();
        while let Some(item) = agent.check_for_work().await.unwrap() {
            agent.process(&item).await.unwrap();
            agent.on_success(&item).await.unwrap();
            selected.push(item.id);
        }

        assert_eq!(
            selected,
            vec!["s1", "s2", "s3", "s4", "o1", "s5", "s6", "s7", "s8", "o2"]
        );
    }

    #[tokio::test]
    async fn test_claimed_item_not_selected_twice() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        session
            .tasks()
            .enqueue(&Task::new("Only one", TaskKind::Support, TaskClass::Stock))
            .unwrap();
        let first = agent(&session, false);
        let second = agent(&session, false);

        assert!(first.check_for_work().await.unwrap().is_some());
        assert!(second.check_for_work().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dependencies_require_input() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        let agent = agent(&session, false);
        assert!(agent.check_dependencies().is_err());

        session
            .tasks()
            .enqueue(&Task::new("x", TaskKind::Support, TaskClass::Stock))
            .unwrap();
        assert!(agent.check_dependencies().is_ok());
    }

    #[tokio::test]
    async fn test_run_agent_exhausts_retries() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        let task = Task::new("Prices rise", TaskKind::Support, TaskClass::Stock);
        session.tasks().enqueue(&task).unwrap();
        let agent = agent(&session, false);

        let deadline = Deadline::after(Duration::from_millis(300));
        let report = crate::agents::runtime::run_agent(&agent, &deadline).await.unwrap();

        assert_eq!(report.errors, 3);
        assert!(session.tasks().is_failed(&task.id));
        assert_eq!(agent.stage().calls.load(Ordering::SeqCst), 3);
    }
}

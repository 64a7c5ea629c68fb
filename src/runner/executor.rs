//! Session executor: wires the agents to a session and runs them to the deadline.
//!
//! ```text
//!   spawn display ── first frame ── startup_delay ──► spawn agents ──► join ──► summary
//! ```
//!
//! With a display attached, no agent starts until its first frame is drawn
//! (or the deadline passes). Each agent runs on its own task; a storage fault in any of them
//! cancels the session for the rest.

use std::path::Path;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::config::{ConfigError, PrepConfig};
use super::deadline::Deadline;
use super::summary::{SessionStats, SessionSummary};
use crate::agents::{
    run_agent, Agent, AgentKind, AgentReport, AgentStateHandle, ConsumerAgent, CutterStage,
    OrganizerStage, SearchStage, Side, StrategyAgent,
};
use crate::display::{SessionView, StatusView};
use crate::error::StoreError;
use crate::external::{EvidenceWriter, FetchService, SearchService, TextGenerator};
use crate::store::PrepSession;

/// Errors that end a session run.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot start {agent}: {reason}")]
    Dependency { agent: AgentKind, reason: String },

    #[error("No agents enabled")]
    NoAgents,

    #[error("Agent task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The external services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn TextGenerator>,
    pub search: Arc<dyn SearchService>,
    pub fetcher: Arc<dyn FetchService>,
    pub evidence: Arc<dyn EvidenceWriter>,
}

struct LiveSession {
    session: Arc<PrepSession>,
    states: Vec<AgentStateHandle>,
}

/// Runs prep sessions.
pub struct PrepRunner {
    config: PrepConfig,
    collaborators: Collaborators,
    live: Mutex<Option<LiveSession>>,
}

impl PrepRunner {
    /// Creates a runner after validating `config`.
    pub fn new(config: PrepConfig, collaborators: Collaborators) -> Result<Self, RunnerError> {
        config.validate()?;
        Ok(Self {
            config,
            collaborators,
            live: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PrepConfig {
        &self.config
    }

    /// Creates a new session under the staging root.
    pub fn create_session(&self, resolution: &str, side: Side) -> Result<Arc<PrepSession>, RunnerError> {
        Ok(Arc::new(PrepSession::create(&self.config.staging_root, resolution, side)?))
    }

    /// Reopens an existing session; its queues pick up where they left off.
    pub fn resume_session(&self, id: &str) -> Result<Arc<PrepSession>, RunnerError> {
        Ok(Arc::new(PrepSession::load(&self.config.staging_root, id)?))
    }

    pub fn staging_root(&self) -> &Path {
        &self.config.staging_root
    }

    /// Creates a session and runs `agents` on it until the deadline.
    ///
    /// # Errors
    ///
    /// Only storage and configuration faults are errors; failed research
    /// work is reported in the summary.
    pub async fn run(
        &self,
        resolution: &str,
        side: Side,
        deadline: &Deadline,
        agents: &[AgentKind],
    ) -> Result<SessionSummary, RunnerError> {
        let session = self.create_session(resolution, side)?;
        self.run_session(session, deadline, agents, None).await
    }

    /// Runs `agents` on an open session, optionally with a live display.
    pub async fn run_session(
        &self,
        session: Arc<PrepSession>,
        deadline: &Deadline,
        agents: &[AgentKind],
        display: Option<Box<dyn StatusView>>,
    ) -> Result<SessionSummary, RunnerError> {
        let mut kinds: Vec<AgentKind> = agents.to_vec();
        kinds.sort();
        kinds.dedup();
        if kinds.is_empty() {
            return Err(RunnerError::NoAgents);
        }

        let started = Instant::now();
        let spawners: Vec<AgentSpawner> = kinds
            .iter()
            .map(|kind| self.build_agent(*kind, &session))
            .collect();

        if spawners.len() == 1 {
            let spawner = &spawners[0];
            if let Err(reason) = spawner.check_dependencies() {
                return Err(RunnerError::Dependency {
                    agent: spawner.kind,
                    reason,
                });
            }
        }

        let states: Vec<AgentStateHandle> = spawners.iter().map(|s| s.state.clone()).collect();
        self.set_live(Some(LiveSession {
            session: session.clone(),
            states: states.clone(),
        }));

        info!(
            session = %session.id(),
            agents = ?kinds,
            remaining_secs = deadline.remaining().as_secs(),
            "Starting prep session"
        );
        session.log_event(
            "runner",
            "session_started",
            serde_json::json!({"agents": kinds, "remaining_secs": deadline.remaining().as_secs()}),
        );

        let mut display_handle = None;
        if let Some(display) = display {
            let (first_frame_tx, first_frame_rx) = oneshot::channel();
            let view = SessionView::new(session.clone(), &states);
            display_handle = Some(display.spawn(view, deadline.clone(), first_frame_tx));
            // A display that fails before drawing drops the sender, which also ends the wait.
            if deadline.run(first_frame_rx).await.is_none() {
                debug!("Deadline reached before the first frame");
            }
        }
        deadline.sleep(self.config.display.startup_delay).await;

        let mut tasks = JoinSet::new();
        for spawner in spawners {
            let deadline = deadline.clone();
            tasks.spawn(spawner.run(deadline));
        }

        let mut reports = Vec::new();
        let mut first_error: Option<RunnerError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(report))) => reports.push(report),
                Ok((kind, Err(e))) => {
                    error!(agent = %kind, error = %e, "Agent stopped on storage error, ending session");
                    deadline.cancel();
                    first_error.get_or_insert(RunnerError::Store(e));
                }
                Err(e) => {
                    error!(error = %e, "Agent task failed");
                    deadline.cancel();
                    first_error.get_or_insert(RunnerError::Join(e));
                }
            }
        }
        reports.sort_by_key(|r| r.agent.parse::<AgentKind>().ok());

        let mut display_report = None;
        if let Some(handle) = display_handle {
            match handle.await {
                Ok(Ok(report)) => {
                    info!(frames = report.frames, "Display stopped");
                    display_report = Some(report);
                }
                Ok(Err(e)) => warn!(error = %e, "Display failed"),
                Err(e) => warn!(error = %e, "Display task failed"),
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let snapshots: Vec<_> = states.iter().map(AgentStateHandle::snapshot).collect();
        let stats = SessionStats::collect(&session, &snapshots);
        let mut summary = SessionSummary::new(&session, started.elapsed(), stats, reports);
        summary.display = display_report;
        session.log_event(
            "runner",
            "session_finished",
            serde_json::json!({
                "completed": summary.completed,
                "failed": summary.failed,
                "pending": summary.pending,
            }),
        );
        info!(
            session = %session.id(),
            completed = summary.completed,
            failed = summary.failed,
            pending = summary.pending,
            "Prep session finished"
        );
        Ok(summary)
    }

    /// Stats of the current or most recent session run by this runner.
    pub fn stats(&self) -> Option<SessionStats> {
        let live = self.lock_live();
        live.as_ref().map(|l| {
            let snapshots: Vec<_> = l.states.iter().map(AgentStateHandle::snapshot).collect();
            SessionStats::collect(&l.session, &snapshots)
        })
    }

    fn lock_live(&self) -> std::sync::MutexGuard<'_, Option<LiveSession>> {
        match self.live.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_live(&self, live: Option<LiveSession>) {
        *self.lock_live() = live;
    }

    fn build_agent(&self, kind: AgentKind, session: &Arc<PrepSession>) -> AgentSpawner {
        let c = &self.collaborators;
        let cfg = &self.config;
        match kind {
            AgentKind::Strategy => AgentSpawner::new(
                kind,
                StrategyAgent::new(session.clone(), c.generator.clone())
                    .with_poll_interval(cfg.poll.producer)
                    .with_similarity_threshold(cfg.similarity_threshold),
            ),
            AgentKind::Search => AgentSpawner::new(
                kind,
                self.consumer(
                    SearchStage::new(c.generator.clone(), c.search.clone(), c.fetcher.clone())
                        .with_config(cfg.search),
                    session,
                ),
            ),
            AgentKind::Cutter => AgentSpawner::new(kind, self.consumer(CutterStage::new(c.generator.clone()), session)),
            AgentKind::Organizer => AgentSpawner::new(
                kind,
                self.consumer(
                    OrganizerStage::new(c.generator.clone(), c.evidence.clone())
                        .with_analysis_interval(cfg.analysis_interval),
                    session,
                ),
            ),
        }
    }

    fn consumer<S: crate::agents::Stage>(&self, stage: S, session: &Arc<PrepSession>) -> ConsumerAgent<S> {
        ConsumerAgent::new(stage, session.clone())
            .with_scheduler(self.config.scheduler)
            .with_retry(self.config.retry)
            .with_poll_interval(self.config.poll.consumer)
    }
}

type AgentFuture = std::pin::Pin<
    Box<dyn std::future::Future<Output = (AgentKind, Result<AgentReport, StoreError>)> + Send>,
>;

/// A built agent, erased so agents of different types share one join set.
struct AgentSpawner {
    kind: AgentKind,
    state: AgentStateHandle,
    check: Box<dyn Fn() -> Result<(), String> + Send + Sync>,
    run: Box<dyn FnOnce(Deadline) -> AgentFuture + Send>,
}

impl AgentSpawner {
    fn new<A>(kind: AgentKind, agent: A) -> Self
    where
        A: Agent + 'static,
    {
        let agent = Arc::new(agent);
        let state = agent.state().clone();
        let checker = agent.clone();
        Self {
            kind,
            state,
            check: Box::new(move || checker.check_dependencies()),
            run: Box::new(move |deadline| {
                Box::pin(async move {
                    let result = run_agent(agent.as_ref(), &deadline).await;
                    (kind, result)
                })
            }),
        }
    }

    fn check_dependencies(&self) -> Result<(), String> {
        (self.check)()
    }

    fn run(self, deadline: Deadline) -> AgentFuture {
        (self.run)(deadline)
    }
}

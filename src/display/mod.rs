//! Live status display.
//!
//! The display runs as its own task on the same runtime as the agents. It
//! reads agent state through `watch` receivers and queue counts through
//! in-memory counters, so drawing a frame never waits on agent I/O. Agents
//! offload every blocking call, which keeps the runtime free to redraw.

pub mod render;
pub mod terminal;

use std::sync::Arc;
use std::time::Duration;

use ratatui::{backend::Backend, Terminal};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::agents::{AgentState, AgentStateHandle};
use crate::runner::{Deadline, DisplayConfig, SessionStats};
use crate::store::PrepSession;

pub use render::{format_time_remaining, status_color, DisplaySnapshot};
pub use terminal::{CrosstermTerminal, ScreenGuard};

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("Terminal error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read-only view of a running session.
#[derive(Debug, Clone)]
pub struct SessionView {
    session: Arc<PrepSession>,
    agents: Vec<watch::Receiver<AgentState>>,
}

impl SessionView {
    pub fn new(session: Arc<PrepSession>, agents: &[AgentStateHandle]) -> Self {
        Self {
            session,
            agents: agents.iter().map(AgentStateHandle::subscribe).collect(),
        }
    }

    pub fn session(&self) -> &PrepSession {
        &self.session
    }

    pub fn agent_states(&self) -> Vec<AgentState> {
        self.agents.iter().map(|rx| rx.borrow().clone()).collect()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats::collect(&self.session, &self.agent_states())
    }

    pub fn snapshot(&self, remaining: Duration) -> DisplaySnapshot {
        DisplaySnapshot {
            resolution: self.session.resolution().to_string(),
            side: self.session.side(),
            remaining,
            agents: self.agent_states(),
            stats: self.session.stats(),
        }
    }
}

/// What the display did over a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DisplayReport {
    pub frames: u64,
    /// Time from display start to the first drawn frame.
    pub first_frame_after: Option<Duration>,
}

/// Redraws the session view until the deadline.
pub struct StatusDisplay<B: Backend> {
    terminal: Terminal<B>,
    config: DisplayConfig,
}

impl<B: Backend> StatusDisplay<B> {
    pub fn new(terminal: Terminal<B>, config: DisplayConfig) -> Self {
        Self { terminal, config }
    }

    pub fn terminal(&self) -> &Terminal<B> {
        &self.terminal
    }

    pub fn draw(&mut self, view: &SessionView, remaining: Duration) -> Result<(), DisplayError> {
        let snapshot = view.snapshot(remaining);
        self.terminal.draw(|f| render::draw(f, &snapshot))?;
        Ok(())
    }

    /// Draws the first frame after a short settle pause, then refreshes
    /// every `refresh_interval` until the session ends. A last frame is
    /// drawn at the end so final states are visible.
    ///
    /// `first_frame` fires once the first frame is on screen.
    pub async fn run(
        &mut self,
        view: &SessionView,
        deadline: &Deadline,
        mut first_frame: Option<oneshot::Sender<()>>,
    ) -> Result<DisplayReport, DisplayError> {
        let started = Instant::now();
        let mut report = DisplayReport::default();

        deadline.sleep(self.config.first_frame_pause).await;
        loop {
            self.draw(view, deadline.remaining())?;
            report.frames += 1;
            if report.first_frame_after.is_none() {
                report.first_frame_after = Some(started.elapsed());
                debug!(after_ms = started.elapsed().as_millis() as u64, "First frame drawn");
            }
            if let Some(tx) = first_frame.take() {
                let _ = tx.send(());
            }
            if deadline.is_expired() {
                break;
            }
            if !deadline.sleep(self.config.refresh_interval).await {
                self.draw(view, Duration::ZERO)?;
                report.frames += 1;
                break;
            }
        }
        Ok(report)
    }
}

pub type DisplayHandle = JoinHandle<Result<DisplayReport, DisplayError>>;

/// A display the runner can start without knowing its backend.
pub trait StatusView: Send {
    /// Starts the display task. `first_frame` must be sent (or dropped) once
    /// the first frame is drawn; the runner holds agents back until then.
    fn spawn(self: Box<Self>, view: SessionView, deadline: Deadline, first_frame: oneshot::Sender<()>) -> DisplayHandle;
}

impl<B> StatusView for StatusDisplay<B>
where
    B: Backend + Send + 'static,
{
    fn spawn(mut self: Box<Self>, view: SessionView, deadline: Deadline, first_frame: oneshot::Sender<()>) -> DisplayHandle {
        tokio::spawn(async move { self.run(&view, &deadline, Some(first_frame)).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentStatus, Side};
    use ratatui::backend::TestBackend;
    use tempfile::TempDir;

    fn display() -> StatusDisplay<TestBackend> {
        let terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        StatusDisplay::new(terminal, DisplayConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_frame_then_refresh() {
        let dir = TempDir::new().unwrap();
        let session = Arc::new(PrepSession::create(dir.path(), "Resolved: tariffs", Side::Pro).unwrap());
        let state = AgentStateHandle::new("strategy");
        let view = SessionView::new(session, &[state.clone()]);

        let deadline = Deadline::after(Duration::from_secs(2));
        let mut display = display();
        let (tx, mut rx) = oneshot::channel();
        let report = display.run(&view, &deadline, Some(tx)).await.unwrap();

        assert!(rx.try_recv().is_ok());
        assert_eq!(report.first_frame_after, Some(Duration::from_millis(50)));
        // 50ms, 550ms, 1050ms, 1550ms, then the closing frame at 2s.
        assert_eq!(report.frames, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_reflects_latest_state() {
        let dir = TempDir::new().unwrap();
        let session = Arc::new(PrepSession::create(dir.path(), "Resolved: tariffs", Side::Con).unwrap());
        let state = AgentStateHandle::new("search");
        let view = SessionView::new(session, &[state.clone()]);

        state.set_status(AgentStatus::Working);
        state.record_urls(7);
        let agents = view.agent_states();
        assert_eq!(agents[0].status, AgentStatus::Working);
        assert_eq!(view.stats().agent("search").unwrap().sources.urls_collected, 7);

        let mut display = display();
        display.draw(&view, Duration::from_secs(90)).unwrap();
        let buffer = display.terminal().backend().buffer();
        let text: String = buffer.content.iter().map(|c| c.symbol()).collect();
        assert!(text.contains("1:30 remaining"));
        assert!(text.contains("7 urls"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_display_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        let session = Arc::new(PrepSession::create(dir.path(), "Resolved: tariffs", Side::Pro).unwrap());
        let view = SessionView::new(session, &[]);
        let deadline = Deadline::after(Duration::from_secs(600));

        let (tx, rx) = oneshot::channel();
        let handle = StatusView::spawn(Box::new(display()), view, deadline.clone(), tx);
        rx.await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        deadline.cancel();
        let report = handle.await.unwrap().unwrap();
        assert!(report.frames >= 2);
    }
}

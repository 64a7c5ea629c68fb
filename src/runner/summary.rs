//! Session statistics and the end-of-run summary.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::agents::{AgentReport, AgentState, AgentStatus, Side, SourceCounters};
use crate::display::DisplayReport;
use crate::store::{PrepSession, StoreStats};

/// Live counters for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentCounters {
    pub name: String,
    pub status: AgentStatus,
    pub items_processed: u64,
    pub items_created: u64,
    pub sources: SourceCounters,
}

impl From<&AgentState> for AgentCounters {
    fn from(state: &AgentState) -> Self {
        Self {
            name: state.name.clone(),
            status: state.status,
            items_processed: state.items_processed,
            items_created: state.items_created,
            sources: state.counters,
        }
    }
}

/// Queue counts plus per-agent counters for a running or finished session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub store: StoreStats,
    pub agents: Vec<AgentCounters>,
}

impl SessionStats {
    pub fn collect(session: &PrepSession, agents: &[AgentState]) -> Self {
        Self {
            store: session.stats(),
            agents: agents.iter().map(AgentCounters::from).collect(),
        }
    }

    pub fn agent(&self, name: &str) -> Option<&AgentCounters> {
        self.agents.iter().find(|a| a.name == name)
    }
}

/// What a finished session produced.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub resolution: String,
    pub side: Side,
    pub staging_dir: PathBuf,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    /// Tasks in the completion log.
    pub completed: usize,
    /// Tasks in the failure registry.
    pub failed: usize,
    /// Tasks neither done nor failed.
    pub pending: usize,
    pub stats: SessionStats,
    pub agents: Vec<AgentReport>,
    /// Present when the session ran with a live display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayReport>,
}

impl SessionSummary {
    pub fn new(session: &PrepSession, duration: Duration, stats: SessionStats, agents: Vec<AgentReport>) -> Self {
        let tasks = stats.store.tasks;
        Self {
            session_id: session.id().to_string(),
            resolution: session.resolution().to_string(),
            side: session.side(),
            staging_dir: session.dir().to_path_buf(),
            duration,
            completed: tasks.done,
            failed: tasks.failed,
            pending: tasks.pending(),
            stats,
            agents,
            display: None,
        }
    }

    pub fn tasks_generated(&self) -> usize {
        self.stats.store.tasks.total
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// Prints the end-of-run summary to stdout.
pub fn print_summary(summary: &SessionSummary) {
    let store = &summary.stats.store;

    println!("\n=== Prep Session Summary ===");
    println!("Session:        {}", summary.session_id);
    println!("Resolution:     {}", summary.resolution);
    println!("Side:           {}", summary.side);
    println!("Duration:       {:.1}s", summary.duration.as_secs_f64());
    println!();
    println!("Tasks generated: {}", summary.tasks_generated());
    println!("  Completed:     {}", summary.completed);
    println!("  Failed:        {}", summary.failed);
    println!("  Pending:       {}", summary.pending);
    println!(
        "Search results:  {} ({} done, {} failed)",
        store.results.total, store.results.done, store.results.failed
    );
    println!(
        "Cards cut:       {} ({} filed, {} failed)",
        store.cards.total, store.cards.done, store.cards.failed
    );
    println!(
        "Feedback:        {} ({} handled)",
        store.feedback.total, store.feedback.done
    );

    if !summary.agents.is_empty() {
        println!();
        println!("Agents:");
        for report in &summary.agents {
            let created = summary
                .stats
                .agent(&report.agent)
                .map(|a| a.items_created)
                .unwrap_or_default();
            println!(
                "  {:<10} processed {:>4}  ok {:>4}  errors {:>4}  created {:>4}",
                report.agent, report.processed, report.succeeded, report.errors, created
            );
        }
    }

    println!();
    println!("Staging dir: {}", summary.staging_dir.display());
}

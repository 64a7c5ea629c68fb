//! Prep sessions: one staging directory holding every queue of a run.
//!
//! A session id is the local timestamp at creation (`%Y-%m-%d_%H-%M-%S`).
//! `<root>/MANIFEST.json` indexes sessions so the most recent one can be
//! resumed without scanning the staging tree.
//!
//! # Layout
//!
//! ```text
//! <root>/MANIFEST.json
//! <root>/<id>/session.json
//! <root>/<id>/strategy/tasks/       research tasks
//! <root>/<id>/search/results/       staged search results
//! <root>/<id>/search/queries/       query cache for resume
//! <root>/<id>/cutter/cards/         cut cards
//! <root>/<id>/organizer/feedback/   feedback for strategy
//! <root>/<id>/organizer/brief.json  organized brief
//! <root>/<id>/_event_log.jsonl      event stream
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::atomic::{read_json, write_json_atomic};
use super::brief::BriefStore;
use super::events::{EventLog, SessionEvent};
use super::queue::{QueueCounts, TaskQueue};
use crate::agents::types::{Card, Feedback, SearchResult, Side};
use crate::error::StoreError;
use crate::scheduler::Task;

const MANIFEST_FILE: &str = "MANIFEST.json";
const SESSION_FILE: &str = "session.json";
const EVENT_LOG_FILE: &str = "_event_log.jsonl";
const SESSION_ID_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Metadata persisted for each session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub id: String,
    pub resolution: String,
    pub side: Side,
    pub created_at: DateTime<Utc>,
}

/// Counts across every queue of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub tasks: QueueCounts,
    pub results: QueueCounts,
    pub cards: QueueCounts,
    pub feedback: QueueCounts,
}

impl StoreStats {
    pub fn tasks_generated(&self) -> usize {
        self.tasks.total
    }

    pub fn tasks_done(&self) -> usize {
        self.tasks.done
    }

    pub fn tasks_failed(&self) -> usize {
        self.tasks.failed
    }

    pub fn tasks_pending(&self) -> usize {
        self.tasks.pending()
    }
}

/// A prep session and the durable queues it owns.
#[derive(Debug)]
pub struct PrepSession {
    info: SessionInfo,
    dir: PathBuf,
    tasks: Arc<TaskQueue<Task>>,
    results: Arc<TaskQueue<SearchResult>>,
    cards: Arc<TaskQueue<Card>>,
    feedback: Arc<TaskQueue<Feedback>>,
    brief: BriefStore,
    events: EventLog,
}

impl PrepSession {
    /// Creates a new session under `root`, named after the current local time.
    ///
    /// If a session with the same second already exists, a numeric suffix is
    /// appended.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the staging directories cannot be created.
    pub fn create(root: &Path, resolution: &str, side: Side) -> Result<Self, StoreError> {
        let base = Local::now().format(SESSION_ID_FORMAT).to_string();
        let mut id = base.clone();
        let mut suffix = 2;
        while root.join(&id).exists() {
            id = format!("{}-{}", base, suffix);
            suffix += 1;
        }
        Self::create_with_id(root, &id, resolution, side)
    }

    /// Creates a session with an explicit id.
    pub fn create_with_id(
        root: &Path,
        id: &str,
        resolution: &str,
        side: Side,
    ) -> Result<Self, StoreError> {
        let dir = root.join(id);
        fs::create_dir_all(&dir)?;

        let info = SessionInfo {
            id: id.to_string(),
            resolution: resolution.to_string(),
            side,
            created_at: Utc::now(),
        };
        write_json_atomic(&dir.join(SESSION_FILE), &info)?;
        update_manifest(root, &info)?;

        info!(session = %id, dir = %dir.display(), "Created prep session");
        Self::open_dir(dir, info)
    }

    /// Loads an existing session.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::SessionNotFound` if there is no such directory and
    /// `StoreError::InvalidSession` if its metadata is missing or unreadable.
    pub fn load(root: &Path, id: &str) -> Result<Self, StoreError> {
        let dir = root.join(id);
        if !dir.is_dir() {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        let info: SessionInfo = match read_json(&dir.join(SESSION_FILE)) {
            Ok(Some(info)) => info,
            Ok(None) => {
                return Err(StoreError::InvalidSession {
                    id: id.to_string(),
                    message: format!("missing {}", SESSION_FILE),
                })
            }
            Err(e) => {
                return Err(StoreError::InvalidSession {
                    id: id.to_string(),
                    message: e.to_string(),
                })
            }
        };
        info!(session = %id, "Resumed prep session");
        Self::open_dir(dir, info)
    }

    fn open_dir(dir: PathBuf, info: SessionInfo) -> Result<Self, StoreError> {
        let tasks = TaskQueue::open(dir.join("strategy").join("tasks"), "tasks")?;
        let results = TaskQueue::open(dir.join("search").join("results"), "results")?;
        let cards = TaskQueue::open(dir.join("cutter").join("cards"), "cards")?;
        let feedback = TaskQueue::open(dir.join("organizer").join("feedback"), "feedback")?;
        fs::create_dir_all(dir.join("search").join("queries"))?;

        let brief = BriefStore::new(
            dir.join("organizer").join("brief.json"),
            &info.resolution,
            info.side,
        );
        let events = EventLog::new(dir.join(EVENT_LOG_FILE));

        Ok(Self {
            info,
            dir,
            tasks: Arc::new(tasks),
            results: Arc::new(results),
            cards: Arc::new(cards),
            feedback: Arc::new(feedback),
            brief,
            events,
        })
    }

    /// Most recently created session id under `root`, if any.
    ///
    /// Uses the manifest when present and falls back to scanning for
    /// directories containing session metadata.
    pub fn most_recent(root: &Path) -> Result<Option<String>, StoreError> {
        let sessions = Self::list(root)?;
        Ok(sessions.into_iter().next().map(|info| info.id))
    }

    /// All known sessions under `root`, newest first.
    pub fn list(root: &Path) -> Result<Vec<SessionInfo>, StoreError> {
        let mut sessions: Vec<SessionInfo> = match read_json::<Manifest>(&root.join(MANIFEST_FILE))? {
            Some(manifest) => manifest.into_values().collect(),
            None => scan_sessions(root)?,
        };
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(sessions)
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn resolution(&self) -> &str {
        &self.info.resolution
    }

    pub fn side(&self) -> Side {
        self.info.side
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn queries_dir(&self) -> PathBuf {
        self.dir.join("search").join("queries")
    }

    pub fn tasks(&self) -> &Arc<TaskQueue<Task>> {
        &self.tasks
    }

    pub fn results(&self) -> &Arc<TaskQueue<SearchResult>> {
        &self.results
    }

    pub fn cards(&self) -> &Arc<TaskQueue<Card>> {
        &self.cards
    }

    pub fn feedback(&self) -> &Arc<TaskQueue<Feedback>> {
        &self.feedback
    }

    pub fn brief(&self) -> &BriefStore {
        &self.brief
    }

    /// Appends to the session event stream.
    pub fn log_event(&self, agent: &str, action: &str, details: Value) {
        self.events.append(agent, action, details);
    }

    /// The last `limit` events of the session.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<SessionEvent>, StoreError> {
        Ok(self.events.recent(limit)?)
    }

    /// Snapshot of queue counts. Reads in-memory counters only.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            tasks: self.tasks.counts(),
            results: self.results.counts(),
            cards: self.cards.counts(),
            feedback: self.feedback.counts(),
        }
    }
}

type Manifest = BTreeMap<String, SessionInfo>;

fn update_manifest(root: &Path, info: &SessionInfo) -> Result<(), StoreError> {
    fs::create_dir_all(root)?;
    let path = root.join(MANIFEST_FILE);
    let mut manifest: Manifest = read_json(&path)?.unwrap_or_default();
    manifest.insert(info.id.clone(), info.clone());
    write_json_atomic(&path, &manifest)
}

fn scan_sessions(root: &Path) -> Result<Vec<SessionInfo>, StoreError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut sessions = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Ok(Some(info)) = read_json::<SessionInfo>(&path.join(SESSION_FILE)) {
            sessions.push(info);
        }
    }
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{TaskClass, TaskKind};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_load() {
        let root = TempDir::new().unwrap();
        let session = PrepSession::create(root.path(), "Resolved: tariffs", Side::Pro).unwrap();
        let id = session.id().to_string();
        session
            .tasks()
            .enqueue(&Task::new("Prices rise", TaskKind::Support, TaskClass::Stock))
            .unwrap();

        let loaded = PrepSession::load(root.path(), &id).unwrap();
        assert_eq!(loaded.resolution(), "Resolved: tariffs");
        assert_eq!(loaded.side(), Side::Pro);
        assert_eq!(loaded.stats().tasks_generated(), 1);
        assert_eq!(loaded.stats().tasks_pending(), 1);
    }

    #[test]
    fn test_same_second_sessions_get_suffix() {
        let root = TempDir::new().unwrap();
        let a = PrepSession::create(root.path(), "R", Side::Pro).unwrap();
        let b = PrepSession::create(root.path(), "R", Side::Con).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_load_missing_session() {
        let root = TempDir::new().unwrap();
        let err = PrepSession::load(root.path(), "2020-01-01_00-00-00").unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(_)));

        fs::create_dir_all(root.path().join("broken")).unwrap();
        let err = PrepSession::load(root.path(), "broken").unwrap_err();
        assert!(matches!(err, StoreError::InvalidSession { .. }));
    }

    #[test]
    fn test_most_recent_from_manifest() {
        let root = TempDir::new().unwrap();
        PrepSession::create_with_id(root.path(), "2026-01-01_00-00-00", "R", Side::Pro).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        PrepSession::create_with_id(root.path(), "2026-01-02_00-00-00", "R", Side::Con).unwrap();

        let recent = PrepSession::most_recent(root.path()).unwrap();
        assert_eq!(recent.as_deref(), Some("2026-01-02_00-00-00"));
        assert_eq!(PrepSession::list(root.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_most_recent_scans_without_manifest() {
        let root = TempDir::new().unwrap();
        PrepSession::create_with_id(root.path(), "only", "R", Side::Pro).unwrap();
        fs::remove_file(root.path().join(MANIFEST_FILE)).unwrap();
        assert_eq!(PrepSession::most_recent(root.path()).unwrap().as_deref(), Some("only"));
    }

    #[test]
    fn test_most_recent_empty_root() {
        let root = TempDir::new().unwrap();
        assert_eq!(PrepSession::most_recent(&root.path().join("nothing")).unwrap(), None);
    }

    #[test]
    fn test_event_stream() {
        let root = TempDir::new().unwrap();
        let session = PrepSession::create(root.path(), "R", Side::Pro).unwrap();
        session.log_event("strategy", "generating_initial_arguments", json!({"phase": 0}));
        let events = session.recent_events(5).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "generating_initial_arguments");
    }
}

//! Append-only JSONL event stream for a session.
//!
//! Every agent action is appended as one line, `{ts, agent, action, ...details}`.
//! The stream is a record of what happened, not a source of truth for task
//! state; a failed append is logged and otherwise ignored.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// One entry of the event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEvent {
    pub ts: DateTime<Utc>,
    pub agent: String,
    pub action: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends an event. `details` should be a JSON object; other values are
    /// stored under a `detail` key.
    pub fn append(&self, agent: &str, action: &str, details: Value) {
        let details = match details {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("detail".to_string(), other);
                map
            }
        };
        let event = SessionEvent {
            ts: Utc::now(),
            agent: agent.to_string(),
            action: action.to_string(),
            details,
        };
        if let Err(e) = self.write_line(&event) {
            warn!(path = %self.path.display(), error = %e, "Failed to append session event");
        }
    }

    fn write_line(&self, event: &SessionEvent) -> io::Result<()> {
        let mut line = serde_json::to_string(event).map_err(io::Error::other)?;
        line.push('\n');
        let _guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())
    }

    /// Returns the last `limit` events. Unparseable lines are skipped.
    pub fn recent(&self, limit: usize) -> io::Result<Vec<SessionEvent>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(event) = serde_json::from_str::<SessionEvent>(&line) {
                events.push(event);
            }
        }
        let skip = events.len().saturating_sub(limit);
        Ok(events.split_off(skip))
    }
}

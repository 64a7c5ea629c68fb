//! File-backed durable queue with a completion log and failure registry.
//!
//! Each queue lives in its own directory:
//!
//! - `items/<id>.json`: every item ever enqueued (write-once)
//! - `done/<id>`: completion log, one empty marker per id (write-once)
//! - `failed/<id>.json`: permanent failure registry (write-once)
//! - `retries/<id>.json`: durable retry counter (atomic replace)
//!
//! Every mutation is either a write-once create or an atomic replace of a
//! single record, so agents can share a queue without cross-record locks.
//! `pending_tasks` always reloads from disk, which means failures recorded
//! by an earlier process are honoured after a restart.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::atomic::{create_atomic, create_json_atomic, is_temporary, read_json, write_json_atomic};
use crate::error::StoreError;
use crate::scheduler::{QueueItem, TaskState, TaskStatus};

const ITEMS_DIR: &str = "items";
const DONE_DIR: &str = "done";
const FAILED_DIR: &str = "failed";
const RETRIES_DIR: &str = "retries";

/// Entry in the permanent failure registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureRecord {
    pub id: String,
    pub reason: String,
    pub retry_count: u32,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RetryRecord {
    id: String,
    retry_count: u32,
    updated_at: DateTime<Utc>,
}

/// Point-in-time counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub in_progress: usize,
}

impl QueueCounts {
    /// Items neither done nor failed (including those in progress).
    pub fn pending(&self) -> usize {
        self.total.saturating_sub(self.done + self.failed)
    }
}

/// Shared atomic counters, seeded from disk when the queue is opened.
///
/// Readers such as the status display take a snapshot without touching
/// the filesystem.
#[derive(Debug, Clone, Default)]
pub struct QueueCounters {
    total: Arc<AtomicUsize>,
    done: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    in_progress: Arc<AtomicUsize>,
}

impl QueueCounters {
    pub fn snapshot(&self) -> QueueCounts {
        QueueCounts {
            total: self.total.load(Ordering::Relaxed),
            done: self.done.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_progress: self.in_progress.load(Ordering::Relaxed),
        }
    }
}

/// Durable queue of `T` records.
pub struct TaskQueue<T: QueueItem> {
    name: String,
    root: PathBuf,
    claims: Mutex<HashSet<String>>,
    counters: QueueCounters,
    _marker: PhantomData<fn() -> T>,
}

impl<T: QueueItem> std::fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("counts", &self.counters.snapshot())
            .finish()
    }
}

/// Rejects ids that cannot safely be used as file names.
fn validate_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

/// Lists record ids in `dir`, stripping `ext` when given.
fn list_ids(dir: &Path, ext: Option<&str>) -> Result<HashSet<String>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(e.into()),
    };

    let mut ids = HashSet::new();
    for entry in entries {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if is_temporary(&name) {
            continue;
        }
        let id = match ext {
            Some(ext) => match name.strip_suffix(ext) {
                Some(stem) => stem.to_string(),
                None => continue,
            },
            None => name,
        };
        ids.insert(id);
    }
    Ok(ids)
}

impl<T: QueueItem> TaskQueue<T> {
    /// Opens (creating if needed) the queue rooted at `root`.
    ///
    /// # Arguments
    ///
    /// * `root` - Directory owning this queue's records
    /// * `name` - Queue name, used in logs
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the directories cannot be created or read.
    pub fn open(root: impl Into<PathBuf>, name: impl Into<String>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [ITEMS_DIR, DONE_DIR, FAILED_DIR, RETRIES_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }

        let queue = Self {
            name: name.into(),
            root,
            claims: Mutex::new(HashSet::new()),
            counters: QueueCounters::default(),
            _marker: PhantomData,
        };

        let total = list_ids(&queue.root.join(ITEMS_DIR), Some(".json"))?.len();
        let done = list_ids(&queue.root.join(DONE_DIR), None)?.len();
        let failed = list_ids(&queue.root.join(FAILED_DIR), Some(".json"))?.len();
        queue.counters.total.store(total, Ordering::Relaxed);
        queue.counters.done.store(done, Ordering::Relaxed);
        queue.counters.failed.store(failed, Ordering::Relaxed);

        debug!(queue = %queue.name, total, done, failed, "Opened queue");
        Ok(queue)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn item_path(&self, id: &str) -> PathBuf {
        self.root.join(ITEMS_DIR).join(format!("{}.json", id))
    }

    fn done_path(&self, id: &str) -> PathBuf {
        self.root.join(DONE_DIR).join(id)
    }

    fn failed_path(&self, id: &str) -> PathBuf {
        self.root.join(FAILED_DIR).join(format!("{}.json", id))
    }

    fn retry_path(&self, id: &str) -> PathBuf {
        self.root.join(RETRIES_DIR).join(format!("{}.json", id))
    }

    /// Persists a new item.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateId` if an item with the same id exists.
    pub fn enqueue(&self, item: &T) -> Result<(), StoreError> {
        if self.enqueue_if_absent(item)? {
            Ok(())
        } else {
            Err(StoreError::DuplicateId(item.id().to_string()))
        }
    }

    /// Persists `item` unless its id already exists. Returns whether it was written.
    ///
    /// Consumers derive output ids from their input, so a retried attempt
    /// that already wrote its output is a no-op here.
    pub fn enqueue_if_absent(&self, item: &T) -> Result<bool, StoreError> {
        validate_id(item.id())?;
        let created = create_json_atomic(&self.item_path(item.id()), item)?;
        if created {
            self.counters.total.fetch_add(1, Ordering::Relaxed);
            debug!(queue = %self.name, id = %item.id(), "Enqueued");
        }
        Ok(created)
    }

    /// Reads one item by id.
    pub fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        validate_id(id)?;
        read_json(&self.item_path(id))
    }

    /// Returns true if an item with this id was ever enqueued.
    pub fn contains(&self, id: &str) -> bool {
        validate_id(id).is_ok() && self.item_path(id).exists()
    }

    /// Loads every item ever enqueued, resolved or not, oldest first.
    pub fn all_items(&self) -> Result<Vec<T>, StoreError> {
        let ids = list_ids(&self.root.join(ITEMS_DIR), Some(".json"))?;
        self.load_sorted(ids.into_iter())
    }

    /// Returns every item not in the completion log or failure registry.
    ///
    /// Always reloads from disk. Items currently claimed by an agent are
    /// still returned; callers use [`TaskQueue::try_claim`] to pick one.
    pub fn pending_tasks(&self) -> Result<Vec<T>, StoreError> {
        let items = list_ids(&self.root.join(ITEMS_DIR), Some(".json"))?;
        let done = list_ids(&self.root.join(DONE_DIR), None)?;
        let failed = list_ids(&self.root.join(FAILED_DIR), Some(".json"))?;

        let pending = items
            .into_iter()
            .filter(|id| !done.contains(id) && !failed.contains(id));
        self.load_sorted(pending)
    }

    fn load_sorted(&self, ids: impl Iterator<Item = String>) -> Result<Vec<T>, StoreError> {
        let mut items = Vec::new();
        for id in ids {
            if let Some(item) = read_json::<T>(&self.item_path(&id))? {
                items.push(item);
            }
        }
        items.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(items)
    }

    /// Appends `id` to the completion log. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConflictingResolution` if the id is already failed,
    /// or `StoreError::NotFound` if it was never enqueued.
    pub fn mark_done(&self, id: &str) -> Result<(), StoreError> {
        validate_id(id)?;
        if !self.item_path(id).exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        if self.failed_path(id).exists() {
            return Err(StoreError::ConflictingResolution {
                id: id.to_string(),
                existing: "failed",
            });
        }
        if create_atomic(&self.done_path(id), b"")? {
            self.counters.done.fetch_add(1, Ordering::Relaxed);
            debug!(queue = %self.name, id, "Marked done");
        }
        Ok(())
    }

    /// Adds `id` to the permanent failure registry. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConflictingResolution` if the id is already done,
    /// or `StoreError::NotFound` if it was never enqueued.
    pub fn mark_failed(&self, id: &str, reason: &str) -> Result<(), StoreError> {
        validate_id(id)?;
        if !self.item_path(id).exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        if self.done_path(id).exists() {
            return Err(StoreError::ConflictingResolution {
                id: id.to_string(),
                existing: "done",
            });
        }
        let record = FailureRecord {
            id: id.to_string(),
            reason: reason.to_string(),
            retry_count: self.retry_count(id)?,
            failed_at: Utc::now(),
        };
        if create_json_atomic(&self.failed_path(id), &record)? {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            debug!(queue = %self.name, id, reason, "Marked failed");
        }
        Ok(())
    }

    pub fn is_done(&self, id: &str) -> bool {
        validate_id(id).is_ok() && self.done_path(id).exists()
    }

    pub fn is_failed(&self, id: &str) -> bool {
        validate_id(id).is_ok() && self.failed_path(id).exists()
    }

    /// Reads the failure record for `id`, if it failed.
    pub fn failure(&self, id: &str) -> Result<Option<FailureRecord>, StoreError> {
        validate_id(id)?;
        read_json(&self.failed_path(id))
    }

    /// Current durable retry count for `id` (0 if it never failed).
    pub fn retry_count(&self, id: &str) -> Result<u32, StoreError> {
        validate_id(id)?;
        Ok(read_json::<RetryRecord>(&self.retry_path(id))?
            .map(|r| r.retry_count)
            .unwrap_or(0))
    }

    /// Increments and persists the retry count for `id`, returning the new value.
    ///
    /// Only the agent holding the claim on `id` calls this, so the
    /// read-modify-write has a single writer.
    pub fn record_retry(&self, id: &str) -> Result<u32, StoreError> {
        let retry_count = self.retry_count(id)?.saturating_add(1);
        let record = RetryRecord {
            id: id.to_string(),
            retry_count,
            updated_at: Utc::now(),
        };
        write_json_atomic(&self.retry_path(id), &record)?;
        Ok(retry_count)
    }

    /// Full status of `id`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the id was never enqueued.
    pub fn status(&self, id: &str) -> Result<TaskStatus, StoreError> {
        validate_id(id)?;
        if !self.item_path(id).exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let state = if self.done_path(id).exists() {
            TaskState::Done
        } else if self.failed_path(id).exists() {
            TaskState::Failed
        } else if self.is_claimed(id) {
            TaskState::InProgress
        } else {
            TaskState::Pending
        };
        Ok(TaskStatus {
            state,
            retry_count: self.retry_count(id)?,
        })
    }

    /// Claims `id` for processing in this process. Returns false if already claimed.
    pub fn try_claim(&self, id: &str) -> bool {
        let mut claims = match self.claims.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let claimed = claims.insert(id.to_string());
        if claimed {
            self.counters.in_progress.fetch_add(1, Ordering::Relaxed);
        }
        claimed
    }

    /// Releases a claim taken with [`TaskQueue::try_claim`].
    pub fn release(&self, id: &str) {
        let mut claims = match self.claims.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if claims.remove(id) {
            self.counters.in_progress.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn is_claimed(&self, id: &str) -> bool {
        match self.claims.lock() {
            Ok(guard) => guard.contains(id),
            Err(poisoned) => poisoned.into_inner().contains(id),
        }
    }

    /// Snapshot of counts from in-memory counters.
    pub fn counts(&self) -> QueueCounts {
        self.counters.snapshot()
    }

    /// Shared handle to this queue's counters.
    pub fn counters(&self) -> QueueCounters {
        self.counters.clone()
    }
}

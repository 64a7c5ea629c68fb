//! Durability of queue bookkeeping across process restarts.
//!
//! Each test writes through one `TaskQueue`, drops it, and reopens the same
//! directory, as a resumed session does.

use chrono::{Duration, TimeZone, Utc};
use prep_forge::error::StoreError;
use prep_forge::scheduler::{PrioritySelector, SchedulerConfig, Task, TaskClass, TaskKind, TaskState};
use prep_forge::store::{PrepSession, TaskQueue};
use prep_forge::agents::Side;
use tempfile::TempDir;

fn task(id: &str, class: TaskClass, offset_secs: i64) -> Task {
    let base = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
    Task::new(format!("argument {}", id), TaskKind::Support, class)
        .with_id(id)
        .with_created_at(base + Duration::seconds(offset_secs))
}

fn pending_ids(queue: &TaskQueue<Task>) -> Vec<String> {
    queue
        .pending_tasks()
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect()
}

#[test]
fn test_failed_id_never_pending_after_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let queue: TaskQueue<Task> = TaskQueue::open(dir.path(), "tasks").unwrap();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            queue.enqueue(&task(id, TaskClass::Stock, i as i64)).unwrap();
        }
        queue.record_retry("b").unwrap();
        queue.record_retry("b").unwrap();
        queue.record_retry("b").unwrap();
        queue.mark_failed("b", "retries exhausted").unwrap();
        queue.mark_done("c").unwrap();
    }

    let queue: TaskQueue<Task> = TaskQueue::open(dir.path(), "tasks").unwrap();
    assert_eq!(pending_ids(&queue), vec!["a".to_string()]);
    assert!(queue.is_failed("b"));
    assert!(!queue.is_done("b"));
    assert_eq!(queue.status("b").unwrap().state, TaskState::Failed);

    let failure = queue.failure("b").unwrap().unwrap();
    assert_eq!(failure.retry_count, 3);
    assert_eq!(failure.reason, "retries exhausted");

    let counts = queue.counts();
    assert_eq!((counts.total, counts.done, counts.failed), (3, 1, 1));
    assert_eq!(counts.pending(), 1);

    // A failed id cannot be resolved the other way.
    assert!(matches!(
        queue.mark_done("b"),
        Err(StoreError::ConflictingResolution { existing: "failed", .. })
    ));
}

#[test]
fn test_retry_count_survives_reopen_and_never_decreases() {
    let dir = TempDir::new().unwrap();
    {
        let queue: TaskQueue<Task> = TaskQueue::open(dir.path(), "tasks").unwrap();
        queue.enqueue(&task("a", TaskClass::Stock, 0)).unwrap();
        assert_eq!(queue.record_retry("a").unwrap(), 1);
    }

    let queue: TaskQueue<Task> = TaskQueue::open(dir.path(), "tasks").unwrap();
    assert_eq!(queue.retry_count("a").unwrap(), 1);
    assert_eq!(queue.record_retry("a").unwrap(), 2);
    assert_eq!(queue.status("a").unwrap().state, TaskState::Pending);
    assert_eq!(queue.status("a").unwrap().retry_count, 2);
}

#[test]
fn test_resolution_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let queue: TaskQueue<Task> = TaskQueue::open(dir.path(), "tasks").unwrap();
    queue.enqueue(&task("a", TaskClass::Stock, 0)).unwrap();
    queue.enqueue(&task("b", TaskClass::Stock, 1)).unwrap();

    queue.mark_done("a").unwrap();
    queue.mark_done("a").unwrap();
    queue.mark_failed("b", "first").unwrap();
    queue.mark_failed("b", "second").unwrap();

    assert_eq!(queue.counts().done, 1);
    assert_eq!(queue.counts().failed, 1);
    assert_eq!(queue.failure("b").unwrap().unwrap().reason, "first");

    drop(queue);
    let queue: TaskQueue<Task> = TaskQueue::open(dir.path(), "tasks").unwrap();
    queue.mark_done("a").unwrap();
    assert_eq!(queue.counts().done, 1);
    assert!(pending_ids(&queue).is_empty());
}

#[test]
fn test_schedule_order_after_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let queue: TaskQueue<Task> = TaskQueue::open(dir.path(), "tasks").unwrap();
        // Enqueued out of creation order.
        queue.enqueue(&task("o2", TaskClass::Creative, 10)).unwrap();
        for i in (1..=8).rev() {
            queue.enqueue(&task(&format!("s{}", i), TaskClass::Stock, i)).unwrap();
        }
        queue.enqueue(&task("o1", TaskClass::Niche, 9)).unwrap();
    }

    let queue: TaskQueue<Task> = TaskQueue::open(dir.path(), "tasks").unwrap();
    let selector = PrioritySelector::new(SchedulerConfig::new(4, 1));
    let ordered: Vec<String> = selector
        .order(queue.pending_tasks().unwrap())
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(
        ordered,
        vec!["s1", "s2", "s3", "s4", "o1", "s5", "s6", "s7", "s8", "o2"]
    );
}

#[test]
fn test_session_resume_keeps_queues() {
    let dir = TempDir::new().unwrap();
    let id = {
        let session = PrepSession::create(dir.path(), "Resolved: tariffs", Side::Con).unwrap();
        session.tasks().enqueue(&task("a", TaskClass::Stock, 0)).unwrap();
        session.tasks().enqueue(&task("b", TaskClass::Stock, 1)).unwrap();
        session.tasks().mark_failed("a", "exhausted").unwrap();
        session.id().to_string()
    };

    assert_eq!(PrepSession::most_recent(dir.path()).unwrap(), Some(id.clone()));
    let session = PrepSession::load(dir.path(), &id).unwrap();
    assert_eq!(session.side(), Side::Con);
    let stats = session.stats();
    assert_eq!(stats.tasks_generated(), 2);
    assert_eq!(stats.tasks_failed(), 1);
    assert_eq!(stats.tasks_pending(), 1);
    assert_eq!(pending_ids(session.tasks()), vec!["b".to_string()]);
}

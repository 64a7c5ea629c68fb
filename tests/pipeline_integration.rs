//! End-to-end runs of the full agent pipeline against mock services.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use prep_forge::agents::{AgentKind, Card, RetryConfig, SearchResult, Side, SourceRecord};
use prep_forge::display::StatusDisplay;
use prep_forge::error::ExternalError;
use prep_forge::external::{
    EvidenceWriter, FetchService, FetchedPage, PlacedCard, SearchHit, SearchService, TextGenerator,
};
use prep_forge::runner::{Collaborators, Deadline, DisplayConfig, PollConfig, PrepConfig, PrepRunner};
use prep_forge::scheduler::{QueueItem, Task, TaskClass, TaskKind, TaskStatus};
use prep_forge::store::PrepSession;
use ratatui::{backend::TestBackend, Terminal};
use tempfile::TempDir;

const STOCK_ARGUMENTS: &str = r#"[
  {"argument": "Tariffs raise consumer prices for households", "search_intent": "CPI pass-through studies", "kind": "support", "class": "stock"},
  {"argument": "Retaliatory duties devastate farm exports", "search_intent": "USDA export losses", "kind": "support", "class": "stock"},
  {"argument": "Protectionism shields infant domestic industries", "search_intent": "infant industry evidence", "kind": "support", "class": "stock"},
  {"argument": "Trade barriers provoke diplomatic conflict with allies", "search_intent": "alliance friction", "kind": "support", "class": "stock"},
  {"argument": "Import levies generate federal revenue", "search_intent": "customs receipts", "kind": "support", "class": "stock"}
]"#;

/// Answers every prompt with the same five stock arguments.
struct ScriptedGenerator;

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, _prompt: &str) -> Result<String, ExternalError> {
        Ok(STOCK_ARGUMENTS.to_string())
    }
}

/// Every call fails transiently.
#[derive(Default)]
struct ThrottledServices {
    searches: AtomicUsize,
}

impl SearchService for ThrottledServices {
    fn search(&self, _query: &str) -> Result<Vec<SearchHit>, ExternalError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Err(ExternalError::RateLimited("429 Too Many Requests".into()))
    }
}

impl FetchService for ThrottledServices {
    fn fetch(&self, url: &str) -> Result<FetchedPage, ExternalError> {
        Err(ExternalError::Timeout(url.to_string()))
    }
}

impl EvidenceWriter for ThrottledServices {
    fn store(&self, _placed: &PlacedCard) -> Result<(), ExternalError> {
        Err(ExternalError::RateLimited("429".into()))
    }
}

/// Every call blocks its thread for a long time before answering.
struct SlowServices {
    delay: Duration,
}

impl TextGenerator for SlowServices {
    fn generate(&self, _prompt: &str) -> Result<String, ExternalError> {
        std::thread::sleep(self.delay);
        Ok("[]".to_string())
    }
}

impl SearchService for SlowServices {
    fn search(&self, _query: &str) -> Result<Vec<SearchHit>, ExternalError> {
        std::thread::sleep(self.delay);
        Ok(Vec::new())
    }
}

impl FetchService for SlowServices {
    fn fetch(&self, url: &str) -> Result<FetchedPage, ExternalError> {
        std::thread::sleep(self.delay);
        Err(ExternalError::Timeout(url.to_string()))
    }
}

impl EvidenceWriter for SlowServices {
    fn store(&self, _placed: &PlacedCard) -> Result<(), ExternalError> {
        std::thread::sleep(self.delay);
        Ok(())
    }
}

fn fast_config(root: &std::path::Path) -> PrepConfig {
    PrepConfig::default()
        .with_staging_root(root)
        .with_poll(PollConfig {
            producer: Duration::from_millis(30),
            consumer: Duration::from_millis(20),
        })
        .with_retry(RetryConfig {
            max_retries: 3,
            retry_delay: Duration::from_secs(10),
        })
        .with_display(DisplayConfig {
            startup_delay: Duration::ZERO,
            ..DisplayConfig::default()
        })
        .with_search(prep_forge::agents::SearchConfig {
            search_delay: Duration::ZERO,
            ..Default::default()
        })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transient_failures_leave_tasks_pending_with_one_retry() {
    let dir = TempDir::new().unwrap();
    let services = Arc::new(ThrottledServices::default());
    let collaborators = Collaborators {
        generator: Arc::new(ScriptedGenerator),
        search: services.clone(),
        fetcher: services.clone(),
        evidence: services.clone(),
    };
    let runner = PrepRunner::new(fast_config(dir.path()), collaborators).unwrap();
    let deadline = Deadline::after(Duration::from_millis(400));

    let summary = runner
        .run("Resolved: tariffs do more harm than good", Side::Pro, &deadline, &AgentKind::ALL)
        .await
        .unwrap();

    assert_eq!(summary.tasks_generated(), 5);
    assert_eq!(summary.pending, 5);
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(services.searches.load(Ordering::SeqCst), 5);

    let session = PrepSession::load(dir.path(), &summary.session_id).unwrap();
    let tasks = session.tasks().all_items().unwrap();
    assert_eq!(tasks.len(), 5);
    for task in &tasks {
        assert_eq!(task.class, TaskClass::Stock);
        assert_eq!(session.tasks().retry_count(task.id()).unwrap(), 1);
        assert_eq!(session.tasks().status(task.id()).unwrap().state, prep_forge::scheduler::TaskState::Pending);
    }
    assert_eq!(session.results().counts().total, 0);

    let strategy = summary.stats.agent("strategy").unwrap();
    assert_eq!(strategy.items_created, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_first_frame_not_delayed_by_blocking_services() {
    let dir = TempDir::new().unwrap();
    let config = fast_config(dir.path());
    let services = Arc::new(SlowServices {
        delay: Duration::from_secs(2),
    });
    let collaborators = Collaborators {
        generator: services.clone(),
        search: services.clone(),
        fetcher: services.clone(),
        evidence: services,
    };
    let runner = PrepRunner::new(config.clone(), collaborators).unwrap();

    // Give every consumer something to block on.
    let session = runner.create_session("Resolved: tariffs", Side::Pro).unwrap();
    let task = Task::new("Tariffs raise consumer prices", TaskKind::Support, TaskClass::Stock).with_id("t1");
    session.tasks().enqueue(&task).unwrap();
    let result = SearchResult {
        id: SearchResult::id_for_task("t0"),
        task_id: "t0".to_string(),
        argument: "Tariffs cost jobs".to_string(),
        search_intent: String::new(),
        kind: TaskKind::Support,
        class: TaskClass::Stock,
        query: "tariff job losses".to_string(),
        sources: vec![SourceRecord::fetched(
            "https://example.org/jobs",
            "Jobs report",
            "Steel tariffs cost roughly 75,000 manufacturing jobs in downstream industries.",
        )],
        created_at: Utc::now(),
    };
    session.results().enqueue(&result).unwrap();
    let card = Card {
        id: "res-tx-c1".to_string(),
        result_id: "res-tx".to_string(),
        task_id: "tx".to_string(),
        argument: "Tariffs hurt farmers".to_string(),
        kind: TaskKind::Support,
        class: TaskClass::Stock,
        tag: "Retaliation hit soybean exports".to_string(),
        author: "USDA".to_string(),
        year: "2019".to_string(),
        source_title: "Farm report".to_string(),
        url: "https://example.org/farm".to_string(),
        text: "Soybean exports to China fell by three quarters after retaliatory tariffs.".to_string(),
        semantic_hint: "exports".to_string(),
        created_at: Utc::now(),
    };
    session.cards().enqueue(&card).unwrap();

    let display = StatusDisplay::new(Terminal::new(TestBackend::new(120, 32)).unwrap(), config.display);
    let deadline = Deadline::after(Duration::from_millis(500));
    let started = std::time::Instant::now();
    let summary = runner
        .run_session(session, &deadline, &AgentKind::ALL, Some(Box::new(display)))
        .await
        .unwrap();

    // The session ends at its deadline even though every call is still blocked.
    assert!(started.elapsed() < Duration::from_millis(1500));

    let report = summary.display.unwrap();
    let first = report.first_frame_after.unwrap();
    assert!(first <= Duration::from_millis(100), "first frame after {:?}", first);
    assert!(report.frames >= 2);

    // Interrupted work is neither done nor failed.
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.pending, 1);
    let interrupted: u64 = summary.agents.iter().map(|a| a.interrupted).sum();
    assert!(interrupted >= 3);
    assert!(summary.stats.store.results.pending() == 1);
    let status: TaskStatus = PrepSession::load(dir.path(), &summary.session_id)
        .unwrap()
        .tasks()
        .status("t1")
        .unwrap();
    assert_eq!(status.retry_count, 0);
}

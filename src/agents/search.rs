//! Search stage: turns a research task into a staged search result.
//!
//! For each task the stage asks the LLM for a query, runs the search,
//! picks one URL per host, and fetches the candidates in parallel. The
//! query and every URL attempted are cached per task under
//! `search/queries/`, so a resumed session reuses the query and a retry
//! never refetches a URL that already failed.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::consumer::{Stage, StageContext};
use super::error::AgentResult;
use super::types::{SearchResult, SourceRecord};
use crate::error::{ExternalError, StoreError};
use crate::external::{offload, FetchService, SearchHit, SearchService, TextGenerator};
use crate::prompts::build_query_prompt;
use crate::scheduler::Task;
use crate::store::atomic::{read_json, write_json_atomic};
use crate::store::{PrepSession, TaskQueue};

/// Default minimum spacing between search calls.
pub const DEFAULT_SEARCH_DELAY: Duration = Duration::from_secs(1);
/// Default number of pages fetched in parallel per task.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 3;
/// Default number of hits requested per search.
pub const DEFAULT_RESULTS_PER_SEARCH: usize = 20;

const MAX_QUERY_CHARS: usize = 200;

/// Search stage settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub search_delay: Duration,
    pub fetch_concurrency: usize,
    pub results_per_search: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_delay: DEFAULT_SEARCH_DELAY,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            results_per_search: DEFAULT_RESULTS_PER_SEARCH,
        }
    }
}

/// Per-task search state kept on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryRecord {
    pub task_id: String,
    pub argument: String,
    pub query: String,
    /// Every URL fetched for this task across attempts.
    #[serde(default)]
    pub urls_tried: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Reduces a model response to a single search query.
pub fn clean_query(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("```"))
        .unwrap_or_default();
    let line = line
        .strip_prefix("Query:")
        .or_else(|| line.strip_prefix("query:"))
        .unwrap_or(line);
    let unquoted: String = line.chars().filter(|c| !matches!(c, '"' | '\'' | '`')).collect();
    unquoted
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_QUERY_CHARS)
        .collect()
}

/// Keeps the first hit per host, skipping URLs in `tried` and unparseable URLs.
pub fn select_candidates(hits: Vec<SearchHit>, tried: &HashSet<String>) -> Vec<SearchHit> {
    let mut hosts = HashSet::new();
    hits.into_iter()
        .filter(|hit| !tried.contains(&hit.url))
        .filter(|hit| {
            let host = Url::parse(&hit.url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_ascii_lowercase()));
            match host {
                Some(host) => hosts.insert(host),
                None => false,
            }
        })
        .collect()
}

/// The search stage.
pub struct SearchStage {
    generator: Arc<dyn TextGenerator>,
    search: Arc<dyn SearchService>,
    fetcher: Arc<dyn FetchService>,
    config: SearchConfig,
    last_search: Mutex<Option<Instant>>,
}

impl SearchStage {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        search: Arc<dyn SearchService>,
        fetcher: Arc<dyn FetchService>,
    ) -> Self {
        Self {
            generator,
            search,
            fetcher,
            config: SearchConfig::default(),
            last_search: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> SearchConfig {
        self.config
    }

    fn record_path(session: &PrepSession, task_id: &str) -> PathBuf {
        session.queries_dir().join(format!("{}.json", task_id))
    }

    fn load_record(session: &PrepSession, task_id: &str) -> Result<Option<QueryRecord>, StoreError> {
        read_json(&Self::record_path(session, task_id))
    }

    fn save_record(session: &PrepSession, record: &QueryRecord) -> Result<(), StoreError> {
        write_json_atomic(&Self::record_path(session, &record.task_id), record)
    }

    /// Returns the query for this attempt and the per-task record it lives in.
    ///
    /// The first attempt reuses a cached query; retries always ask for a new
    /// one with escalating guidance.
    async fn query_for(&self, task: &Task, ctx: &StageContext<'_>) -> AgentResult<QueryRecord> {
        let cached = Self::load_record(ctx.session, &task.id)?;
        if ctx.attempt == 0 {
            if let Some(record) = cached.as_ref().filter(|r| !r.query.is_empty()) {
                debug!(task_id = %task.id, query = %record.query, "Query from cache");
                ctx.session.log_event("search", "query_from_cache", json!({"task_id": task.id, "query": record.query}));
                return Ok(record.clone());
            }
        }

        let prompt = build_query_prompt(&task.argument, &task.search_intent, task.kind, ctx.attempt);
        let generator = self.generator.clone();
        let raw = offload(move || generator.generate(&prompt)).await??;
        let query = clean_query(&raw);
        if query.is_empty() {
            return Err(ExternalError::EmptyResult("model returned no query".into()).into());
        }

        let record = QueryRecord {
            task_id: task.id.clone(),
            argument: task.argument.clone(),
            query,
            urls_tried: cached.map(|r| r.urls_tried).unwrap_or_default(),
            updated_at: Utc::now(),
        };
        Self::save_record(ctx.session, &record)?;
        Ok(record)
    }

    /// Runs one search, keeping at least `search_delay` since the previous one.
    async fn paced_search(&self, query: &str) -> AgentResult<Vec<SearchHit>> {
        let mut last = self.last_search.lock().await;
        if let Some(at) = *last {
            let ready = at + self.config.search_delay;
            if ready > Instant::now() {
                tokio::time::sleep_until(ready).await;
            }
        }

        let search = self.search.clone();
        let query = query.to_string();
        let result = offload(move || search.search(&query)).await;
        *last = Some(Instant::now());
        Ok(result??)
    }

    async fn fetch_source(&self, url: &str) -> SourceRecord {
        let fetcher = self.fetcher.clone();
        let target = url.to_string();
        match offload(move || fetcher.fetch(&target)).await {
            Ok(Ok(page)) => SourceRecord::fetched(url, page.title, page.text),
            Ok(Err(e)) => SourceRecord::failed(url, e.to_string()),
            Err(e) => SourceRecord::failed(url, e.to_string()),
        }
    }

    /// Fetches `primary`, falling back once to `alternate` if it fails.
    async fn fetch_with_fallback(
        &self,
        semaphore: &Semaphore,
        primary: SearchHit,
        alternate: Option<SearchHit>,
    ) -> Vec<SourceRecord> {
        let _permit = semaphore.acquire().await.ok();
        let mut records = Vec::with_capacity(2);

        let first = self.fetch_source(&primary.url).await;
        let fetched = first.is_fetched();
        records.push(with_hit_title(first, &primary));
        if fetched {
            return records;
        }

        if let Some(alternate) = alternate {
            debug!(failed = %primary.url, alternate = %alternate.url, "Trying alternate source");
            let second = self.fetch_source(&alternate.url).await;
            records.push(with_hit_title(second, &alternate));
        }
        records
    }
}

fn with_hit_title(mut record: SourceRecord, hit: &SearchHit) -> SourceRecord {
    if record.title.is_empty() {
        record.title = hit.title.clone();
    }
    record
}

#[async_trait]
impl Stage for SearchStage {
    type Input = Task;

    fn name(&self) -> &str {
        "search"
    }

    fn input_queue(&self, session: &PrepSession) -> Arc<TaskQueue<Task>> {
        session.tasks().clone()
    }

    fn describe(&self, task: &Task) -> String {
        task.argument.clone()
    }

    async fn process(&self, task: &Task, ctx: &StageContext<'_>) -> AgentResult<()> {
        ctx.state.set_direction(format!("Researching: {}", task.argument));
        let mut record = self.query_for(task, ctx).await?;
        ctx.state.push_query(record.query.clone());
        ctx.state.push_action(format!("Searching: {}", record.query));

        let hits = self.paced_search(&record.query).await?;
        if hits.is_empty() {
            return Err(ExternalError::EmptyResult(format!("no hits for '{}'", record.query)).into());
        }

        let tried: HashSet<String> = record.urls_tried.iter().cloned().collect();
        let mut candidates: VecDeque<SearchHit> = select_candidates(hits, &tried).into();
        if candidates.is_empty() {
            return Err(ExternalError::EmptyResult("all URLs already tried".into()).into());
        }
        ctx.state.record_urls(candidates.len() as u64);

        let primary_count = self.config.fetch_concurrency.max(1).min(candidates.len());
        let primaries: Vec<SearchHit> = candidates.drain(..primary_count).collect();
        let semaphore = Semaphore::new(self.config.fetch_concurrency.max(1));
        let fetches = primaries
            .into_iter()
            .map(|primary| {
                let alternate = candidates.pop_front();
                self.fetch_with_fallback(&semaphore, primary, alternate)
            })
            .collect::<Vec<_>>();
        let sources: Vec<SourceRecord> = join_all(fetches).await.into_iter().flatten().collect();

        record.urls_tried.extend(sources.iter().map(|s| s.url.clone()));
        record.updated_at = Utc::now();
        Self::save_record(ctx.session, &record)?;

        let fetched = sources.iter().filter(|s| s.is_fetched()).count();
        let failed = sources.len() - fetched;
        ctx.state.record_sources(fetched as u64, failed as u64);

        if fetched == 0 {
            return Err(ExternalError::RequestFailed(format!(
                "all {} fetches failed for '{}'",
                sources.len(),
                record.query
            ))
            .into());
        }
        if failed > 0 {
            warn!(task_id = %task.id, fetched, failed, "Some sources could not be fetched");
        }

        let result = SearchResult {
            id: SearchResult::id_for_task(&task.id),
            task_id: task.id.clone(),
            argument: task.argument.clone(),
            search_intent: task.search_intent.clone(),
            kind: task.kind,
            class: task.class,
            query: record.query.clone(),
            sources,
            created_at: Utc::now(),
        };
        if ctx.session.results().enqueue_if_absent(&result)? {
            ctx.state.record_created(1);
        }

        info!(task_id = %task.id, result_id = %result.id, fetched, failed, "Search result staged");
        ctx.state.push_action(format!("Found {} sources: {}", fetched, task.argument));
        ctx.session.log_event(
            "search",
            "result_staged",
            json!({"task_id": task.id, "result_id": result.id, "query": record.query, "fetched": fetched, "failed": failed}),
        );
        Ok(())
    }
}

//! Brave web search client.

use std::env;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio::runtime::Handle;
use tracing::debug;

use super::{classify_reqwest_error, classify_status, SearchHit, SearchService};
use crate::error::ExternalError;

/// Brave web search endpoint.
pub const BRAVE_API_URL: &str = "https://api.search.brave.com/res/v1/web/search";

const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Brave rejects counts above this.
const MAX_COUNT: usize = 20;

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

/// Search client backed by the Brave Search API.
#[derive(Debug, Clone)]
pub struct BraveSearch {
    api_key: String,
    api_url: String,
    count: usize,
    http_client: Client,
    handle: Handle,
}

impl BraveSearch {
    /// Creates a client returning up to `count` results per query.
    ///
    /// # Errors
    ///
    /// Returns `ExternalError::Unavailable` if the key is empty or the HTTP
    /// client cannot be built.
    pub fn new(api_key: impl Into<String>, count: usize, handle: Handle) -> Result<Self, ExternalError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ExternalError::Unavailable("BRAVE_API_KEY is empty".to_string()));
        }
        let http_client = Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .map_err(|e| ExternalError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_key,
            api_url: BRAVE_API_URL.to_string(),
            count: count.clamp(1, MAX_COUNT),
            http_client,
            handle,
        })
    }

    /// Creates a client from `BRAVE_API_KEY`.
    pub fn from_env(count: usize, handle: Handle) -> Result<Self, ExternalError> {
        let api_key = env::var("BRAVE_API_KEY")
            .map_err(|_| ExternalError::Unavailable("BRAVE_API_KEY not set".to_string()))?;
        Self::new(api_key, count, handle)
    }

    /// Overrides the endpoint, for proxies and local mirrors.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    async fn search_async(&self, query: &str) -> Result<Vec<SearchHit>, ExternalError> {
        let url = format!(
            "{}?q={}&count={}",
            self.api_url,
            urlencoding::encode(query),
            self.count
        );

        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "search brave"));
        }

        let body = response.text().await.map_err(|e| classify_reqwest_error(&e))?;
        let hits = parse_response(&body)?;
        debug!(query, hits = hits.len(), "Search completed");
        Ok(hits)
    }
}

impl SearchService for BraveSearch {
    fn search(&self, query: &str) -> Result<Vec<SearchHit>, ExternalError> {
        self.handle.block_on(self.search_async(query))
    }
}

/// Parses a Brave response body into hits, dropping entries without a URL.
fn parse_response(body: &str) -> Result<Vec<SearchHit>, ExternalError> {
    let parsed: BraveResponse = serde_json::from_str(body)
        .map_err(|e| ExternalError::InvalidResponse(format!("brave response: {}", e)))?;
    Ok(parsed
        .web
        .map(|web| web.results)
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.starts_with("http"))
        .map(|r| SearchHit {
            url: r.url,
            title: strip_highlight(&r.title),
            description: strip_highlight(&r.description),
        })
        .collect())
}

/// Brave wraps matched terms in `<strong>` tags.
fn strip_highlight(s: &str) -> String {
    s.replace("<strong>", "").replace("</strong>", "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "web": {"results": [
                {"url": "https://a.org/x", "title": "<strong>Tariffs</strong> study", "description": "d"},
                {"url": "ftp://b.org/y", "title": "skip"},
                {"url": "https://c.org/z"}
            ]}
        }"#;
        let hits = parse_response(body).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Tariffs study");
        assert_eq!(hits[1].url, "https://c.org/z");
    }

    #[test]
    fn test_parse_response_without_web_section() {
        assert!(parse_response(r#"{"type": "search"}"#).unwrap().is_empty());
        assert!(matches!(
            parse_response("not json"),
            Err(ExternalError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_key_is_unavailable() {
        let err = BraveSearch::new("  ", 10, Handle::current()).unwrap_err();
        assert!(!err.is_transient());
    }
}

//! Page fetching over HTTP with a regex-based HTML to text reduction.

use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use tokio::runtime::Handle;
use tracing::debug;

use super::{classify_reqwest_error, classify_status, FetchService, FetchedPage};
use crate::error::ExternalError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
const USER_AGENT: &str = "Mozilla/5.0 (compatible; prep-forge/0.1; +research)";

/// Pages shorter than this after cleaning are treated as unreadable.
pub const MIN_TEXT_CHARS: usize = 200;
/// Extracted text is cut to this many characters.
pub const MAX_TEXT_CHARS: usize = 60_000;

const PAYWALL_MARKERS: &[&str] = &[
    "subscribe to continue",
    "subscribe to read",
    "subscribers only",
    "already a subscriber",
    "sign in to continue reading",
    "to continue reading",
    "create a free account to continue",
    "this content is for subscribers",
];

/// Compiled patterns for reducing HTML to readable text.
#[derive(Debug, Clone)]
pub struct HtmlCleaner {
    title: Regex,
    boilerplate: Regex,
    breaks: Regex,
    tags: Regex,
    spaces: Regex,
}

impl HtmlCleaner {
    /// # Errors
    ///
    /// Returns the regex error if a pattern fails to compile.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            title: Regex::new(r"(?is)<title[^>]*>(.*?)</title>")?,
            boilerplate: Regex::new(
                r"(?is)<!--.*?-->|<script\b.*?</script>|<style\b.*?</style>|<noscript\b.*?</noscript>|<nav\b.*?</nav>|<header\b.*?</header>|<footer\b.*?</footer>|<aside\b.*?</aside>|<svg\b.*?</svg>|<form\b.*?</form>",
            )?,
            breaks: Regex::new(r"(?i)<br\s*/?>|</p>|</div>|</h[1-6]>|</li>|</tr>|</blockquote>")?,
            tags: Regex::new(r"(?s)<[^>]+>")?,
            spaces: Regex::new(r"[ \t\u{a0}]+")?,
        })
    }

    /// Extracts the page title and body text.
    pub fn clean(&self, html: &str) -> (String, String) {
        let title = self
            .title
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| decode_entities(m.as_str()).trim().to_string())
            .unwrap_or_default();

        let body = self.boilerplate.replace_all(html, " ");
        let body = self.breaks.replace_all(&body, "\n");
        let body = self.tags.replace_all(&body, " ");
        let body = decode_entities(&body);

        let text = body
            .lines()
            .map(|line| self.spaces.replace_all(line, " ").trim().to_string())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        (title, text)
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&rsquo;", "'")
        .replace("&lsquo;", "'")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&mdash;", "-")
        .replace("&ndash;", "-")
        .replace("&amp;", "&")
}

/// Heuristic: is this text a paywall or login wall rather than an article?
pub fn looks_paywalled(text: &str) -> bool {
    if text.chars().count() < MIN_TEXT_CHARS {
        return true;
    }
    let lower = text.to_lowercase();
    let marker_hit = PAYWALL_MARKERS.iter().any(|m| lower.contains(m));
    marker_hit && text.len() < 3_000
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text,
    }
}

/// Fetches pages with reqwest and reduces them to text.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http_client: Client,
    handle: Handle,
    cleaner: HtmlCleaner,
}

impl HttpFetcher {
    /// Creates a fetcher that drives its requests on `handle`.
    ///
    /// # Errors
    ///
    /// Returns `ExternalError::Unavailable` if the HTTP client cannot be built.
    pub fn new(handle: Handle) -> Result<Self, ExternalError> {
        let http_client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ExternalError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        let cleaner = HtmlCleaner::new()
            .map_err(|e| ExternalError::Unavailable(format!("invalid HTML pattern: {}", e)))?;
        Ok(Self {
            http_client,
            handle,
            cleaner,
        })
    }

    async fn fetch_async(&self, url: &str) -> Result<FetchedPage, ExternalError> {
        let response = self
            .http_client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml,text/plain;q=0.9")
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &format!("fetch {}", url)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.is_empty() && !content_type.contains("html") && !content_type.contains("text") {
            return Err(ExternalError::InvalidResponse(format!(
                "unsupported content type '{}' at {}",
                content_type, url
            )));
        }

        let body = response.text().await.map_err(|e| classify_reqwest_error(&e))?;
        let (title, text) = if content_type.contains("html") || body.trim_start().starts_with('<') {
            self.cleaner.clean(&body)
        } else {
            (String::new(), body)
        };

        if looks_paywalled(&text) {
            return Err(ExternalError::Paywall(url.to_string()));
        }

        debug!(url, chars = text.len(), "Fetched page");
        Ok(FetchedPage {
            url: url.to_string(),
            title,
            text: truncate_chars(text, MAX_TEXT_CHARS),
        })
    }
}

impl FetchService for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedPage, ExternalError> {
        self.handle.block_on(self.fetch_async(url))
    }
}

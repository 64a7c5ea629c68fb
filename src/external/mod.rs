//! Boundaries to the outside world: text generation, web search, page fetch,
//! and evidence output.
//!
//! Every collaborator is a blocking, `Send + Sync` trait. Agents never call
//! them directly on the async runtime; they go through [`offload`], which runs
//! the call on tokio's blocking pool so the status display keeps refreshing
//! while a request is in flight.
//!
//! The HTTP implementations hold an async `reqwest::Client` plus a runtime
//! `Handle` and drive each request with `Handle::block_on`. That is only
//! valid on a blocking-pool thread, which `offload` guarantees.

pub mod evidence;
pub mod fetch;
pub mod offload;
pub mod search;

use serde::{Deserialize, Serialize};

use crate::agents::types::Card;
use crate::error::ExternalError;
use crate::store::Placement;

pub use evidence::JsonEvidenceWriter;
pub use fetch::HttpFetcher;
pub use offload::offload;
pub use search::BraveSearch;

/// One hit returned by a search service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl SearchHit {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            description: String::new(),
        }
    }
}

/// A fetched page reduced to readable text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchedPage {
    pub url: String,
    pub title: String,
    pub text: String,
}

/// A card together with where the organizer placed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlacedCard {
    pub card: Card,
    pub placement: Placement,
}

/// Produces text from a prompt.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, ExternalError>;
}

/// Runs a web search.
pub trait SearchService: Send + Sync {
    fn search(&self, query: &str) -> Result<Vec<SearchHit>, ExternalError>;
}

/// Fetches one page and extracts its text.
pub trait FetchService: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchedPage, ExternalError>;
}

/// Persists a placed card outside the session queues.
pub trait EvidenceWriter: Send + Sync {
    fn store(&self, placed: &PlacedCard) -> Result<(), ExternalError>;
}

/// Maps a reqwest failure onto the collaborator error taxonomy.
pub(crate) fn classify_reqwest_error(err: &reqwest::Error) -> ExternalError {
    if err.is_timeout() {
        ExternalError::Timeout(err.to_string())
    } else {
        ExternalError::RequestFailed(err.to_string())
    }
}

/// Maps a non-success HTTP status onto the collaborator error taxonomy.
pub(crate) fn classify_status(status: reqwest::StatusCode, context: &str) -> ExternalError {
    match status.as_u16() {
        429 => ExternalError::RateLimited(format!("{} returned 429", context)),
        401 | 403 if context.starts_with("search") => {
            ExternalError::Unavailable(format!("{} rejected credentials ({})", context, status))
        }
        402 | 401 | 403 | 451 => ExternalError::Paywall(format!("{} ({})", context, status)),
        408 | 504 => ExternalError::Timeout(format!("{} ({})", context, status)),
        _ => ExternalError::RequestFailed(format!("{} returned {}", context, status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "fetch https://a.org"),
            ExternalError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::FORBIDDEN, "fetch https://a.org"),
            ExternalError::Paywall(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::UNAUTHORIZED, "search brave"),
            ExternalError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::BAD_GATEWAY, "fetch https://a.org"),
            ExternalError::RequestFailed(_)
        ));
    }
}

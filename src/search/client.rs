//! Search API client with best-effort paging.
//!
//! Pages through the upstream query endpoint in fixed-size steps and
//! accumulates all result pages. A failed request terminates paging and the
//! accumulated pages are kept; discovery is best effort, not transactional.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::store::RawSource;

/// Default upstream API base URL.
const DEFAULT_BASE_URL: &str = "https://mediathekviewweb.de";

/// Fixed page size; offsets step by this amount.
const PAGE_SIZE: usize = 50;

/// One full-text query term.
#[derive(Debug, Serialize)]
struct QueryTerm {
    fields: Vec<&'static str>,
    query: String,
}

/// Request body of the query endpoint.
#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    queries: &'a [QueryTerm],
    #[serde(rename = "sortBy")]
    sort_by: &'static str,
    #[serde(rename = "sortOrder")]
    sort_order: &'static str,
    future: bool,
    offset: usize,
    size: usize,
    duration_min: u64,
    duration_max: u64,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    results: Vec<RawSource>,
}

/// Client for the upstream media search API.
#[derive(Debug, Clone)]
pub struct SearchClient {
    client: Client,
    base_url: String,
    duration_min: u64,
    duration_max: u64,
}

impl Default for SearchClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchClient {
    /// Creates a client against the public API.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Creates a client with a custom base URL (for testing with wiremock).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            duration_min: crate::config::QUERY_DURATION_MIN_SECS,
            duration_max: crate::config::QUERY_DURATION_MAX_SECS,
        }
    }

    /// Overrides the query-side duration window in seconds.
    #[must_use]
    pub fn with_duration_window(mut self, min_secs: u64, max_secs: u64) -> Self {
        self.duration_min = min_secs;
        self.duration_max = max_secs;
        self
    }

    /// Fetches all pages matching the given search and channel terms.
    ///
    /// Title/topic terms and channel terms are combined into one query. Pages
    /// are requested until an empty page is returned; a request or decode
    /// failure stops paging and whatever was accumulated is returned.
    #[instrument(skip(self), fields(terms = search_terms.len(), channels = channel_terms.len()))]
    pub async fn fetch_all(
        &self,
        search_terms: &[String],
        channel_terms: &[String],
    ) -> Vec<RawSource> {
        let mut queries: Vec<QueryTerm> = search_terms
            .iter()
            .map(|term| QueryTerm {
                fields: vec!["title", "topic"],
                query: term.clone(),
            })
            .collect();
        queries.extend(channel_terms.iter().map(|term| QueryTerm {
            fields: vec!["channel"],
            query: term.clone(),
        }));

        let url = format!("{}/api/query", self.base_url);
        let mut accumulated = Vec::new();
        let mut offset = 0;

        loop {
            let body = QueryBody {
                queries: &queries,
                sort_by: "timestamp",
                sort_order: "desc",
                future: true,
                offset,
                size: PAGE_SIZE,
                duration_min: self.duration_min,
                duration_max: self.duration_max,
            };

            let response = match self.client.post(&url).json(&body).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(error = %e, offset, "search request failed, stopping paging");
                    break;
                }
            };
            let page = match response.json::<QueryResponse>().await {
                Ok(decoded) => decoded.result.results,
                Err(e) => {
                    warn!(error = %e, offset, "search response decode failed, stopping paging");
                    break;
                }
            };

            if page.is_empty() {
                break;
            }
            debug!(offset, page_len = page.len(), "accumulated search page");
            accumulated.extend(page);
            offset += PAGE_SIZE;
        }

        accumulated
    }
}

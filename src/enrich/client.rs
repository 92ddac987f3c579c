//! Rating lookup API client.
//!
//! Resolves external rating/classification data either by known identifier
//! or by title and optional production year. The payload mirrors the
//! upstream JSON-LD-ish shape: `url`, `type`, `name`, `rating.ratingValue`,
//! `rating.ratingCount`, `datePublished`, `genre`, and a `status` code where
//! 404 means the record is gone upstream and should be purged locally.

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::store::RatingUpsert;

/// Default lookup endpoint.
const DEFAULT_BASE_URL: &str = "https://imdb-lookup.mdl.workers.dev";

/// Errors from rating lookups.
///
/// Lookup failures are terminal per item (the caller marks the source as
/// resolved either way), so this error is logged and swallowed at the
/// enrichment layer, never propagated across a batch.
#[derive(Debug, Error)]
pub enum LookupError {
    /// Request failed or the response could not be decoded.
    #[error("rating lookup failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Outcome of a single lookup.
#[derive(Debug)]
pub enum Lookup {
    /// Usable rating data.
    Found(RatingUpsert),
    /// Upstream reports the record gone (payload or HTTP 404).
    Gone,
    /// No match for the query.
    NoMatch,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
struct RatingBlock {
    #[serde(default, rename = "ratingValue")]
    value: Option<f64>,
    #[serde(default, rename = "ratingCount")]
    count: Option<i64>,
}

/// Raw lookup payload.
#[derive(Debug, Deserialize)]
struct RatingPayload {
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    rating: Option<RatingBlock>,
    #[serde(default, rename = "datePublished")]
    date_published: Option<String>,
    #[serde(default)]
    genre: Option<OneOrMany>,
    #[serde(default)]
    status: Option<u16>,
}

impl RatingPayload {
    fn into_lookup(self) -> Lookup {
        if self.status == Some(404) {
            return Lookup::Gone;
        }
        let Some(url) = self.url else {
            return Lookup::NoMatch;
        };
        let rating = self.rating.unwrap_or_default();
        let genres = match self.genre {
            Some(OneOrMany::One(g)) => vec![g],
            Some(OneOrMany::Many(gs)) => gs,
            None => Vec::new(),
        };
        Lookup::Found(RatingUpsert {
            url,
            kind: self.kind,
            name: self.name,
            rating_value: rating.value,
            rating_count: rating.count,
            published_at: self.date_published,
            genres,
        })
    }
}

/// Client for the rating lookup API.
#[derive(Debug, Clone)]
pub struct RatingClient {
    client: Client,
    base_url: String,
}

impl Default for RatingClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RatingClient {
    /// Creates a client against the default lookup endpoint.
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
        }
    }

    /// Looks up rating data by known external identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Http`] on network or decode failure.
    #[instrument(skip(self))]
    pub async fn lookup_by_id(&self, rating_id: &str) -> Result<Lookup, LookupError> {
        let url = format!("{}/title/{rating_id}", self.base_url);
        self.fetch(&url, &[]).await
    }

    /// Looks up rating data by title and optional production year.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Http`] on network or decode failure.
    #[instrument(skip(self))]
    pub async fn lookup_by_title(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<Lookup, LookupError> {
        let url = format!("{}/find", self.base_url);
        let mut params = vec![("title".to_string(), title.to_string())];
        if let Some(year) = year {
            params.push(("year".to_string(), year.to_string()));
        }
        self.fetch(&url, &params).await
    }

    async fn fetch(&self, url: &str, params: &[(String, String)]) -> Result<Lookup, LookupError> {
        let response = self.client.get(url).query(params).send().await?;
        if response.status().as_u16() == 404 {
            debug!(url, "lookup returned HTTP 404");
            return Ok(Lookup::Gone);
        }
        let payload = response.error_for_status()?.json::<RatingPayload>().await?;
        Ok(payload.into_lookup())
    }
}

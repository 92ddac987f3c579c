//! Series catalog seam.
//!
//! Series mode needs two things from the broadcaster's website: the catalog
//! of series titles grouped by section, and a season/episode match for a
//! single program page. Both stay behind [`SeriesCatalog`] so the pipeline
//! and the download engine never touch page markup; the shipped
//! implementation applies plain regexes over the fetched page text.

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Default catalog page listing all series grouped by section.
const DEFAULT_CATALOG_URL: &str = "https://www.zdf.de/serien";

/// Program pages under this prefix carry season/episode markers.
const DEFAULT_SERIES_PREFIX: &str = "https://www.zdf.de/serien";

/// Errors from catalog fetches.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Request failed or the page body could not be read.
    #[error("catalog fetch failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Provides series titles and per-page episode markers.
#[async_trait]
pub trait SeriesCatalog: Send + Sync {
    /// Returns section-name to series-title groupings.
    async fn sections(&self) -> Result<HashMap<String, Vec<String>>, CatalogError>;

    /// Returns the `(season, episode)` marker of a program page, when the
    /// page carries one.
    async fn episode_for(&self, website_url: &str) -> Result<Option<(i64, i64)>, CatalogError>;
}

/// Catalog backed by the broadcaster's public series pages.
#[derive(Debug, Clone)]
pub struct HttpSeriesCatalog {
    client: Client,
    catalog_url: String,
    series_prefix: String,
}

impl Default for HttpSeriesCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpSeriesCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::with_urls(DEFAULT_CATALOG_URL, DEFAULT_SERIES_PREFIX)
    }

    /// Creates a catalog against custom URLs (for testing with wiremock).
    #[must_use]
    pub fn with_urls(catalog_url: impl Into<String>, series_prefix: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            catalog_url: catalog_url.into(),
            series_prefix: series_prefix.into(),
        }
    }
}

#[async_trait]
impl SeriesCatalog for HttpSeriesCatalog {
    #[instrument(skip(self))]
    async fn sections(&self) -> Result<HashMap<String, Vec<String>>, CatalogError> {
        let body = self
            .client
            .get(&self.catalog_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let sections = parse_sections(&body);
        debug!(sections = sections.len(), "catalog sections parsed");
        Ok(sections)
    }

    #[instrument(skip(self))]
    async fn episode_for(&self, website_url: &str) -> Result<Option<(i64, i64)>, CatalogError> {
        if !website_url.starts_with(&self.series_prefix) {
            return Ok(None);
        }
        let body = self
            .client
            .get(website_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_episode_marker(&body))
    }
}

/// Extracts section-name to series-title groupings from catalog page text.
///
/// Titles appearing before the first section header are dropped; they are
/// teasers outside any named grouping.
fn parse_sections(body: &str) -> HashMap<String, Vec<String>> {
    let Ok(section_re) = Regex::new(r#"cluster-title">([^<]+)<"#) else {
        return HashMap::new();
    };
    let Ok(title_re) = Regex::new(r#"teaser-title-link[^>]*\btitle="([^"]+)""#) else {
        return HashMap::new();
    };

    // Pair every title with the closest preceding section header.
    let mut markers: Vec<(usize, Marker)> = Vec::new();
    for caps in section_re.captures_iter(body) {
        if let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) {
            markers.push((whole.start(), Marker::Section(name.as_str().trim().to_string())));
        }
    }
    for caps in title_re.captures_iter(body) {
        if let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) {
            markers.push((whole.start(), Marker::Title(name.as_str().trim().to_string())));
        }
    }
    markers.sort_by_key(|(pos, _)| *pos);

    let mut sections: HashMap<String, Vec<String>> = HashMap::new();
    let mut current: Option<String> = None;
    for (_, marker) in markers {
        match marker {
            Marker::Section(name) => current = Some(name),
            Marker::Title(name) => {
                if let Some(section) = &current {
                    sections.entry(section.clone()).or_default().push(name);
                } else {
                    warn!(title = name, "series title outside any section, dropped");
                }
            }
        }
    }
    sections
}

enum Marker {
    Section(String),
    Title(String),
}

/// Finds a `Staffel X, Folge Y` marker in program page text.
fn parse_episode_marker(body: &str) -> Option<(i64, i64)> {
    let re = Regex::new(r"Staffel (\d+),\s*Folge (\d+)").ok()?;
    let caps = re.captures(body)?;
    let season = caps.get(1)?.as_str().parse().ok()?;
    let episode = caps.get(2)?.as_str().parse().ok()?;
    Some((season, episode))
}

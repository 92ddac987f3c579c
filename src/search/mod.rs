//! Query/reconciliation engine.
//!
//! Pulls raw results from the search API, upserts them into the store
//! unconditionally (every discovery grows the durable catalog, even items
//! that are filtered out afterwards), then re-reads filtered, deduplicated
//! candidates and applies the presentation pipeline: exclusion stoplist,
//! title normalization, minimum duration, chronological sort and optional
//! row selection.

mod client;

pub use client::SearchClient;

use tracing::{debug, info, instrument};

use crate::store::{Candidate, Quality, Result, Store};

/// Built-in title stoplist: audio-description tracks, dubbed or
/// foreign-language variants and original-version tags. Matched as exact
/// case-sensitive substrings, always in addition to caller excludes.
const BUILTIN_STOPLIST: [&str; 5] = [
    "Audiodeskription",
    "(ita)",
    "(Englisch)",
    "(Französisch)",
    "(dan)",
];

/// Characters stripped from titles because they are unsafe in file paths.
const PATH_UNSAFE: [char; 8] = ['/', '\\', ':', '*', '?', '"', '<', '>'];

/// Options for one candidate fetch.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub search_terms: Vec<String>,
    pub channel_terms: Vec<String>,
    pub exclude_terms: Vec<String>,
    pub quality: Quality,
    pub min_duration_minutes: u64,
    /// Skip items already recorded in the download ledger.
    pub only_not_downloaded: bool,
    /// Cut episode/subtitle suffixes at the `" - "` separator.
    pub truncate_titles: bool,
    /// Keep only these positions of the sorted list (0-based), applied last.
    pub select_rows: Option<Vec<usize>>,
    pub file_format: String,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            search_terms: Vec::new(),
            channel_terms: Vec::new(),
            exclude_terms: Vec::new(),
            quality: Quality::Medium,
            min_duration_minutes: 0,
            only_not_downloaded: true,
            truncate_titles: false,
            select_rows: None,
            file_format: "mp4".to_string(),
        }
    }
}

impl QueryOptions {
    /// Builds query options from a run configuration.
    #[must_use]
    pub fn from_config(config: &crate::RunConfig) -> Self {
        Self {
            search_terms: config.search_terms.clone(),
            channel_terms: config.channel_terms.clone(),
            exclude_terms: config.exclude_terms.clone(),
            quality: config.quality,
            min_duration_minutes: config.min_duration_minutes,
            only_not_downloaded: config.mode.records_downloads(),
            truncate_titles: config.truncate_titles,
            select_rows: config.select_rows.clone(),
            ..Self::default()
        }
    }
}

/// Fetches, reconciles and filters download candidates.
///
/// The full raw batch is persisted before any filtering so the catalog keeps
/// growing across runs. The returned list is sorted oldest-first by publish
/// timestamp for a deterministic download order independent of API ordering.
///
/// # Errors
///
/// Returns [`crate::StoreError`] if persistence fails; search API failures
/// are not errors (paging is best effort).
#[instrument(skip(store, client, options), fields(terms = options.search_terms.len()))]
pub async fn fetch_candidates(
    store: &Store,
    client: &SearchClient,
    options: &QueryOptions,
) -> Result<Vec<Candidate>> {
    let raw = client
        .fetch_all(&options.search_terms, &options.channel_terms)
        .await;
    if raw.is_empty() {
        info!("search returned no results");
        return Ok(Vec::new());
    }

    store.upsert_sources(&raw).await?;
    debug!(count = raw.len(), "raw batch persisted");

    let ids: Vec<String> = raw.into_iter().map(|r| r.id).collect();
    let candidates = store
        .get_candidates(
            &ids,
            options.quality,
            options.only_not_downloaded,
            &options.file_format,
        )
        .await?;

    let mut filtered = apply_filters(candidates, options);
    filtered.sort_by_key(|c| c.published_at);

    if options.truncate_titles {
        for c in &mut filtered {
            c.title = truncate_title(&c.title);
        }
    }

    if let Some(rows) = &options.select_rows {
        filtered = filtered
            .into_iter()
            .enumerate()
            .filter(|(i, _)| rows.contains(i))
            .map(|(_, c)| c)
            .collect();
    }

    info!(candidates = filtered.len(), "candidate list ready");
    Ok(filtered)
}

/// Applies exclusion, title normalization and duration filters.
fn apply_filters(candidates: Vec<Candidate>, options: &QueryOptions) -> Vec<Candidate> {
    let min_duration_secs = options.min_duration_minutes * 60;
    candidates
        .into_iter()
        .filter(|c| !is_excluded(&c.title, &options.exclude_terms))
        .filter(|c| c.duration.as_secs() >= min_duration_secs)
        .map(|mut c| {
            c.title = normalize_title(&c.title);
            c
        })
        .collect()
}

/// Whether the title hits the caller excludes or the built-in stoplist.
fn is_excluded(title: &str, exclude_terms: &[String]) -> bool {
    exclude_terms.iter().any(|term| !term.is_empty() && title.contains(term.as_str()))
        || BUILTIN_STOPLIST.iter().any(|term| title.contains(term))
}

/// Replaces path-unsafe characters with spaces.
fn normalize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| if PATH_UNSAFE.contains(&c) { ' ' } else { c })
        .collect()
}

/// Cuts the title at the first `" - "` separator.
fn truncate_title(title: &str) -> String {
    title
        .split_once(" - ")
        .map_or(title, |(head, _)| head)
        .trim()
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn candidate(title: &str, minutes: u64) -> Candidate {
        Candidate {
            id: title.to_string(),
            title: title.to_string(),
            link: "https://cdn.example.org/x.mp4".to_string(),
            duration: Duration::from_secs(minutes * 60),
            published_at: None,
            size_mb: 100.0,
            channel: "ZDF".to_string(),
            format: "mp4".to_string(),
            rating_ref: None,
            rating_resolved: false,
            website: None,
        }
    }

    #[test]
    fn test_builtin_stoplist_applies_with_empty_excludes() {
        assert!(is_excluded("Film (Audiodeskription)", &[]));
        assert!(is_excluded("Film (ita)", &[]));
        assert!(!is_excluded("Film", &[]));
    }

    #[test]
    fn test_caller_excludes_union_stoplist() {
        let excludes = vec!["(swe)".to_string()];
        assert!(is_excluded("Film (swe)", &excludes));
        assert!(is_excluded("Film (dan)", &excludes));
    }

    #[test]
    fn test_exclusion_is_case_sensitive_substring() {
        assert!(!is_excluded("Film (AUDIODESKRIPTION)", &[]));
    }

    #[test]
    fn test_min_duration_filter() {
        let options = QueryOptions {
            min_duration_minutes: 10,
            ..QueryOptions::default()
        };
        let input = vec![candidate("a", 5), candidate("b", 15), candidate("c", 25)];
        let out = apply_filters(input, &options);
        let titles: Vec<&str> = out.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "c"]);
    }

    #[test]
    fn test_normalize_title_strips_path_unsafe() {
        assert_eq!(normalize_title("Krimi: Tatort 1/2"), "Krimi  Tatort 1 2");
    }

    #[test]
    fn test_truncate_title_at_separator() {
        assert_eq!(truncate_title("Serie - Folge 3"), "Serie");
        assert_eq!(truncate_title("Ohne Trenner"), "Ohne Trenner");
    }

    #[test]
    fn test_select_rows_applies_after_sort() {
        // Exercised through fetch_candidates in the integration tests; the
        // helper path here just documents 0-based semantics.
        let rows = vec![0usize, 2];
        let out: Vec<&str> = ["a", "b", "c"]
            .iter()
            .enumerate()
            .filter(|(i, _)| rows.contains(i))
            .map(|(_, t)| *t)
            .collect();
        assert_eq!(out, vec!["a", "c"]);
    }
}

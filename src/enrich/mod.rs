//! Concurrent rating enrichment and rating-driven candidate filtering.
//!
//! Enrichment runs in two phases:
//! 1. **Reparse** - rating records with missing genre tags are re-fetched;
//!    records the upstream reports gone are purged.
//! 2. **Lookup** - still-unresolved sources are resolved either by known
//!    rating identifier or by parsed title and year, as two separate labeled
//!    batches so progress reporting stays meaningful.
//!
//! Every lookup marks the source as resolved whether or not it succeeded, so
//! a permanently unmatchable item is never retried. Failures are terminal
//! per item and never abort siblings in the batch.

mod client;
pub mod pool;

pub use client::{Lookup, LookupError, RatingClient};

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::store::{Candidate, RatingRecord, Result, Store};

/// Runs both enrichment phases over the candidate set.
///
/// # Errors
///
/// Returns [`crate::StoreError`] only if reading the reparse candidate list
/// fails; individual lookups and writes are logged and skipped.
#[instrument(skip_all, fields(candidates = candidates.len(), concurrency))]
pub async fn run_enrichment(
    store: &Store,
    client: &RatingClient,
    candidates: &[Candidate],
    concurrency: usize,
) -> Result<()> {
    reparse_stale_ratings(store, client, concurrency).await?;
    lookup_unresolved(store, client, candidates, concurrency).await;
    Ok(())
}

/// Phase 1: re-fetch rating records with missing genre tags.
async fn reparse_stale_ratings(
    store: &Store,
    client: &RatingClient,
    concurrency: usize,
) -> Result<()> {
    let stale = store.ids_needing_rating_reparse().await?;
    if stale.is_empty() {
        return Ok(());
    }
    info!(count = stale.len(), "reparsing incomplete rating records");

    let store = store.clone();
    let client = client.clone();
    pool::run(
        stale,
        move |rating_id: String| {
            let store = store.clone();
            let client = client.clone();
            async move {
                match client.lookup_by_id(&rating_id).await {
                    Ok(Lookup::Found(payload)) => {
                        if let Err(e) = store.upsert_rating(&payload, None).await {
                            warn!(rating_id, error = %e, "rating reparse write failed");
                        }
                    }
                    Ok(Lookup::Gone) => {
                        debug!(rating_id, "rating gone upstream, purging");
                        if let Err(e) = store.drop_rating(&rating_id).await {
                            warn!(rating_id, error = %e, "rating purge failed");
                        }
                    }
                    Ok(Lookup::NoMatch) => {}
                    Err(e) => warn!(rating_id, error = %e, "rating reparse lookup failed"),
                }
            }
        },
        concurrency,
        "reparse ratings",
    )
    .await;
    Ok(())
}

/// Phase 2: resolve sources that never had a lookup attempt.
///
/// Tagged sources (known rating reference) and untagged sources (title+year)
/// run as two separate batches.
async fn lookup_unresolved(
    store: &Store,
    client: &RatingClient,
    candidates: &[Candidate],
    concurrency: usize,
) {
    let mut tagged: Vec<(String, String)> = Vec::new();
    let mut untagged: Vec<(String, String)> = Vec::new();
    for c in candidates.iter().filter(|c| !c.rating_resolved) {
        match &c.rating_ref {
            Some(rating_ref) => tagged.push((c.id.clone(), rating_ref.clone())),
            None => untagged.push((c.id.clone(), c.title.clone())),
        }
    }
    info!(
        tagged = tagged.len(),
        untagged = untagged.len(),
        "resolving rating data"
    );

    {
        let store = store.clone();
        let client = client.clone();
        pool::run(
            tagged,
            move |(source_id, rating_ref): (String, String)| {
                let store = store.clone();
                let client = client.clone();
                async move {
                    let lookup = client.lookup_by_id(&rating_ref).await;
                    finish_lookup(&store, &source_id, lookup).await;
                }
            },
            concurrency,
            "lookup ratings (tagged)",
        )
        .await;
    }

    let store = store.clone();
    let client = client.clone();
    pool::run(
        untagged,
        move |(source_id, title): (String, String)| {
            let store = store.clone();
            let client = client.clone();
            async move {
                let (title, year) = split_title_year(&title);
                let lookup = client.lookup_by_title(&title, year).await;
                finish_lookup(&store, &source_id, lookup).await;
            }
        },
        concurrency,
        "lookup ratings (by title)",
    )
    .await;
}

/// Applies a lookup outcome and unconditionally marks the source resolved.
async fn finish_lookup(
    store: &Store,
    source_id: &str,
    lookup: std::result::Result<Lookup, LookupError>,
) {
    let linked = match lookup {
        Ok(Lookup::Found(payload)) => match store.upsert_rating(&payload, Some(source_id)).await {
            Ok(rating_id) => rating_id.is_some(),
            Err(e) => {
                warn!(source_id, error = %e, "rating write failed");
                false
            }
        },
        Ok(Lookup::Gone | Lookup::NoMatch) => false,
        Err(e) => {
            warn!(source_id, error = %e, "rating lookup failed");
            false
        }
    };

    // upsert_rating with a source id already sets the resolved flag.
    if !linked {
        if let Err(e) = store.set_rating_resolved(source_id).await {
            warn!(source_id, error = %e, "failed to mark lookup attempt");
        }
    }
}

/// Splits a trailing `(YYYY)` production year off a title.
#[must_use]
pub fn split_title_year(title: &str) -> (String, Option<i32>) {
    // Compiled per call; title parsing is far off any hot path.
    let Ok(re) = Regex::new(r"^(?s)(.*?)\s*\((\d{4})\)\s*$") else {
        return (title.to_string(), None);
    };
    if let Some(caps) = re.captures(title) {
        let year = caps.get(2).and_then(|m| m.as_str().parse().ok());
        if let (Some(head), Some(year)) = (caps.get(1), year) {
            return (head.as_str().to_string(), Some(year));
        }
    }
    (title.to_string(), None)
}

/// Reduces a candidate list by rating thresholds.
///
/// Keeps only candidates whose rating meets the value and vote-count
/// thresholds, sorts by (rating desc, year desc, title asc), and collapses
/// duplicates sharing a rating identifier down to one, preferring the larger
/// file through a size tie-break.
#[must_use]
pub fn filter_by_rating(
    candidates: Vec<Candidate>,
    ratings: &HashMap<String, RatingRecord>,
    min_rating: f64,
    min_votes: i64,
) -> Vec<Candidate> {
    let mut kept: Vec<(Candidate, f64, Option<i32>)> = candidates
        .into_iter()
        .filter_map(|c| {
            let rating = c.rating_ref.as_ref().and_then(|id| ratings.get(id))?;
            let value = rating.rating_value?;
            let votes = rating.rating_count.unwrap_or(0);
            (value >= min_rating && votes >= min_votes).then(|| {
                let year = rating.year();
                (c, value, year)
            })
        })
        .collect();

    kept.sort_by(|(a, va, ya), (b, vb, yb)| {
        vb.partial_cmp(va)
            .unwrap_or(Ordering::Equal)
            .then_with(|| yb.cmp(ya))
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| b.size_mb.partial_cmp(&a.size_mb).unwrap_or(Ordering::Equal))
    });

    let mut seen = HashSet::new();
    kept.retain(|(c, _, _)| seen.insert(c.rating_ref.clone()));
    kept.into_iter().map(|(c, _, _)| c).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn candidate(id: &str, title: &str, rating_ref: Option<&str>, size_mb: f64) -> Candidate {
        Candidate {
            id: id.to_string(),
            title: title.to_string(),
            link: "https://cdn.example.org/x.mp4".to_string(),
            duration: Duration::from_secs(3600),
            published_at: None,
            size_mb,
            channel: "ZDF".to_string(),
            format: "mp4".to_string(),
            rating_ref: rating_ref.map(ToString::to_string),
            rating_resolved: rating_ref.is_some(),
            website: None,
        }
    }

    fn rating(id: &str, value: f64, votes: i64, year: i32) -> RatingRecord {
        RatingRecord {
            rating_id: id.to_string(),
            kind: Some("Movie".to_string()),
            name: None,
            rating_value: Some(value),
            rating_count: Some(votes),
            published_at: NaiveDate::from_ymd_opt(year, 6, 1),
            genres: Some("Drama".to_string()),
        }
    }

    #[test]
    fn test_split_title_year() {
        assert_eq!(
            split_title_year("Der Film (2021)"),
            ("Der Film".to_string(), Some(2021))
        );
        assert_eq!(split_title_year("Der Film"), ("Der Film".to_string(), None));
        assert_eq!(
            split_title_year("Zahlen (123) im Titel"),
            ("Zahlen (123) im Titel".to_string(), None)
        );
    }

    #[test]
    fn test_filter_by_rating_thresholds() {
        let ratings: HashMap<String, RatingRecord> = [
            ("tt1".to_string(), rating("tt1", 8.0, 5000, 2020)),
            ("tt2".to_string(), rating("tt2", 5.0, 5000, 2020)),
            ("tt3".to_string(), rating("tt3", 8.0, 10, 2020)),
        ]
        .into();

        let input = vec![
            candidate("a", "High", Some("tt1"), 100.0),
            candidate("b", "LowRating", Some("tt2"), 100.0),
            candidate("c", "FewVotes", Some("tt3"), 100.0),
            candidate("d", "NoRating", None, 100.0),
        ];

        let out = filter_by_rating(input, &ratings, 7.0, 1000);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "a");
    }

    #[test]
    fn test_filter_by_rating_sort_order() {
        let ratings: HashMap<String, RatingRecord> = [
            ("tt1".to_string(), rating("tt1", 7.0, 5000, 2020)),
            ("tt2".to_string(), rating("tt2", 9.0, 5000, 2018)),
            ("tt3".to_string(), rating("tt3", 9.0, 5000, 2022)),
        ]
        .into();

        let input = vec![
            candidate("a", "A", Some("tt1"), 100.0),
            candidate("b", "B", Some("tt2"), 100.0),
            candidate("c", "C", Some("tt3"), 100.0),
        ];

        let out = filter_by_rating(input, &ratings, 0.0, 0);
        let ids: Vec<&str> = out.iter().map(|c| c.id.as_str()).collect();
        // Rating desc first, then year desc.
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_filter_by_rating_dedup_prefers_larger_file() {
        let ratings: HashMap<String, RatingRecord> =
            [("tt1".to_string(), rating("tt1", 8.0, 5000, 2020))].into();

        let input = vec![
            candidate("small", "Same Film", Some("tt1"), 900.0),
            candidate("large", "Same Film", Some("tt1"), 2100.0),
        ];

        let out = filter_by_rating(input, &ratings, 0.0, 0);
        assert_eq!(out.len(), 1, "duplicates by rating id collapse to one");
        assert_eq!(out[0].id, "large");
    }
}

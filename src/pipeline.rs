//! End-to-end run orchestration.
//!
//! A run fetches candidates, optionally enriches and filters them by
//! rating, then hands the survivors to the download engine. Series mode
//! wraps the same flow: one derived configuration and one full run per
//! series title from the catalog.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::config::RunConfig;
use crate::download::{DownloadEngine, DownloadStats, SeriesCatalog};
use crate::enrich::{self, RatingClient};
use crate::search::{QueryOptions, SearchClient, fetch_candidates};
use crate::store::{Candidate, RatingRecord, Result, Store};

/// Channel pinned for derived series runs; the series catalog only covers
/// this broadcaster's programs.
const SERIES_CHANNEL: &str = "ZDF";

/// Wires the components of one run together.
pub struct Pipeline {
    store: Store,
    search: SearchClient,
    rating: RatingClient,
    engine: DownloadEngine,
    catalog: Option<Arc<dyn SeriesCatalog>>,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        store: Store,
        search: SearchClient,
        rating: RatingClient,
        engine: DownloadEngine,
    ) -> Self {
        Self {
            store,
            search,
            rating,
            engine,
            catalog: None,
        }
    }

    /// Attaches the series catalog used by [`Pipeline::run_series`].
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn SeriesCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Fetches, reconciles and (optionally) rating-filters candidates.
    ///
    /// Returns the final candidate list plus the rating records backing it
    /// when enrichment ran.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError`] if catalog persistence fails.
    #[instrument(skip_all)]
    pub async fn collect(
        &self,
        config: &RunConfig,
    ) -> Result<(Vec<Candidate>, Option<HashMap<String, RatingRecord>>)> {
        let options = QueryOptions::from_config(config);
        let candidates = fetch_candidates(&self.store, &self.search, &options).await?;
        if !config.enrich || candidates.is_empty() {
            return Ok((candidates, None));
        }

        enrich::run_enrichment(&self.store, &self.rating, &candidates, config.concurrency)
            .await?;

        // Enrichment may have attached rating refs; re-read the projection.
        let candidates = fetch_candidates(&self.store, &self.search, &options).await?;
        let rating_ids: Vec<String> = candidates
            .iter()
            .filter_map(|c| c.rating_ref.clone())
            .collect();
        let ratings = self.store.ratings_for_ids(&rating_ids, config.min_year).await?;
        let filtered = enrich::filter_by_rating(
            candidates,
            &ratings,
            config.min_rating,
            config.min_votes,
        );
        info!(kept = filtered.len(), "rating filter applied");
        Ok((filtered, Some(ratings)))
    }

    /// Downloads the given candidates.
    pub async fn download(
        &self,
        config: &RunConfig,
        candidates: &[Candidate],
        ratings: Option<&HashMap<String, RatingRecord>>,
    ) -> DownloadStats {
        self.engine.process(config, candidates, ratings).await
    }

    /// Marks or unmarks the given candidates in the download ledger.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError`] if the ledger write fails.
    pub async fn mark(&self, candidates: &[Candidate], done: bool) -> Result<()> {
        let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
        if done {
            self.store.mark_downloaded(&ids).await
        } else {
            self.store.unmark_downloaded(&ids).await
        }
    }

    /// Resolves the series catalog and collects candidates per series.
    ///
    /// Sections are restricted to `config.series_sections` when non-empty.
    /// Nothing is downloaded here; the caller previews the batches and
    /// decides whether to hand them to [`Pipeline::download_series`]. A
    /// series whose collection fails is logged and skipped; the remaining
    /// series are still collected.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError`] only if a ledgerless store operation is
    /// impossible; per-series failures are contained.
    #[instrument(skip_all)]
    pub async fn collect_series(&self, config: &RunConfig) -> Result<Vec<SeriesBatch>> {
        let Some(catalog) = &self.catalog else {
            warn!("series mode requested without a catalog");
            return Ok(Vec::new());
        };
        let sections = match catalog.sections().await {
            Ok(sections) => sections,
            Err(e) => {
                warn!(error = %e, "series catalog fetch failed");
                return Ok(Vec::new());
            }
        };

        let mut titles: Vec<String> = sections
            .into_iter()
            .filter(|(section, _)| {
                config.series_sections.is_empty() || config.series_sections.contains(section)
            })
            .flat_map(|(_, titles)| titles)
            .collect();
        titles.sort();
        titles.dedup();
        info!(series = titles.len(), "series catalog resolved");

        let mut batches = Vec::with_capacity(titles.len());
        for title in titles {
            let derived = config.for_series(&title, SERIES_CHANNEL);
            match self.collect(&derived).await {
                Ok((candidates, ratings)) => batches.push(SeriesBatch {
                    series: title,
                    config: derived,
                    candidates,
                    ratings,
                }),
                Err(e) => warn!(series = title, error = %e, "series collection failed, skipping"),
            }
        }
        Ok(batches)
    }

    /// Downloads every collected series batch and sums the stats.
    pub async fn download_series(&self, batches: &[SeriesBatch]) -> DownloadStats {
        let mut total = DownloadStats::default();
        for batch in batches {
            let stats = self
                .download(&batch.config, &batch.candidates, batch.ratings.as_ref())
                .await;
            total.committed += stats.committed;
            total.discarded += stats.discarded;
            total.skipped += stats.skipped;
        }
        total
    }
}

/// Collected candidates of one series, ready to preview or download.
pub struct SeriesBatch {
    pub series: String,
    /// Derived per-series configuration the candidates were collected with.
    pub config: RunConfig,
    pub candidates: Vec<Candidate>,
    pub ratings: Option<HashMap<String, RatingRecord>>,
}

//! Sequential download engine.
//!
//! Drives each candidate through admission control, episode-metadata attach,
//! transfer with retries, and the commit rename. Items are processed one at
//! a time; media transfers saturate the line on their own, and sequential
//! order keeps partial-file bookkeeping trivial.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::catalog::SeriesCatalog;
use super::sidecar::{self, Sidecar};
use super::transfer::Transfer;
use super::filename;
use crate::config::RunConfig;
use crate::store::{Candidate, EpisodeMetadata, RatingRecord, Store};

/// Transfer attempts per item before giving up.
const MAX_ATTEMPTS: u32 = 3;

/// Terminal state of one download.
#[derive(Debug)]
pub enum DownloadOutcome {
    /// Transfer completed and the file was renamed into place.
    Committed(PathBuf),
    /// All attempts failed; the partial file was removed.
    Discarded,
    /// Never attempted, with the reason.
    Skipped(String),
}

/// Per-run download counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadStats {
    pub committed: usize,
    pub discarded: usize,
    pub skipped: usize,
}

/// Downloads candidates into the configured target directory.
pub struct DownloadEngine {
    store: Store,
    transfer: Arc<dyn Transfer>,
    catalog: Option<Arc<dyn SeriesCatalog>>,
}

impl DownloadEngine {
    #[must_use]
    pub fn new(store: Store, transfer: Arc<dyn Transfer>) -> Self {
        Self {
            store,
            transfer,
            catalog: None,
        }
    }

    /// Attaches a series catalog used to resolve episode markers before
    /// naming targets.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn SeriesCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Processes the candidate list sequentially.
    ///
    /// One item's failure never aborts its siblings; every outcome is
    /// tallied into the returned stats. Ledger writes happen per commit and
    /// only in a mode that records downloads.
    #[instrument(skip_all, fields(candidates = candidates.len()))]
    pub async fn process(
        &self,
        config: &RunConfig,
        candidates: &[Candidate],
        ratings: Option<&HashMap<String, RatingRecord>>,
    ) -> DownloadStats {
        let mut stats = DownloadStats::default();
        for candidate in candidates {
            match self.process_one(config, candidate).await {
                DownloadOutcome::Committed(path) => {
                    stats.committed += 1;
                    info!(id = candidate.id, path = %path.display(), "download committed");
                    if config.mode.records_downloads() {
                        if let Err(e) = self.store.mark_downloaded(&[candidate.id.clone()]).await {
                            warn!(id = candidate.id, error = %e, "ledger write failed");
                        }
                    }
                    if config.enrich {
                        self.write_sidecar(candidate, &path, ratings).await;
                    }
                }
                DownloadOutcome::Discarded => {
                    stats.discarded += 1;
                    warn!(id = candidate.id, "download discarded after all attempts");
                }
                DownloadOutcome::Skipped(reason) => {
                    stats.skipped += 1;
                    info!(id = candidate.id, reason, "download skipped");
                }
            }
        }
        stats
    }

    /// Runs one candidate through the download state machine.
    async fn process_one(&self, config: &RunConfig, candidate: &Candidate) -> DownloadOutcome {
        let root = &config.download_dir;
        if let Err(e) = tokio::fs::create_dir_all(root).await {
            return DownloadOutcome::Skipped(format!(
                "cannot create download root {}: {e}",
                root.display()
            ));
        }

        if let Some(reason) = self.admission_refusal(config, candidate) {
            return DownloadOutcome::Skipped(reason);
        }

        self.attach_episode_metadata(config, candidate).await;
        let episode = match self.store.episode_metadata(&candidate.id).await {
            Ok(meta) => meta.and_then(|m| Some((m.season?, m.episode?))),
            Err(e) => {
                warn!(id = candidate.id, error = %e, "episode metadata read failed");
                None
            }
        };

        let final_path = filename::target_path(
            root,
            &candidate.title,
            &candidate.format,
            &candidate.link,
            config.single_file,
            episode,
        );
        if let Some(parent) = final_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return DownloadOutcome::Skipped(format!(
                    "cannot create target directory {}: {e}",
                    parent.display()
                ));
            }
        }

        let partial = filename::partial_path(&final_path);
        for attempt in 1..=MAX_ATTEMPTS {
            match self.transfer.fetch(&candidate.link, &partial).await {
                Ok(()) => {
                    // The payload is complete; a failed rename burns an
                    // attempt but keeps the partial so the next try only has
                    // to redo the rename.
                    match tokio::fs::rename(&partial, &final_path).await {
                        Ok(()) => return DownloadOutcome::Committed(final_path),
                        Err(e) => {
                            warn!(id = candidate.id, attempt, error = %e, "commit rename failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(id = candidate.id, attempt, error = %e, "transfer attempt failed");
                }
            }
        }

        if partial.exists() {
            if let Err(e) = tokio::fs::remove_file(&partial).await {
                warn!(partial = %partial.display(), error = %e, "partial cleanup failed");
            }
        }
        DownloadOutcome::Discarded
    }

    /// Free-space admission check against the configured floor.
    fn admission_refusal(&self, config: &RunConfig, candidate: &Candidate) -> Option<String> {
        let free_bytes = match fs2::available_space(&config.download_dir) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "free-space probe failed, admitting anyway");
                return None;
            }
        };
        #[allow(clippy::cast_precision_loss)]
        let free_gb = free_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
        let remaining = free_gb - candidate.size_gb();
        if remaining < config.min_free_gb {
            return Some(format!(
                "insufficient disk space: {free_gb:.1} GB free, item needs {:.1} GB, floor {:.1} GB",
                candidate.size_gb(),
                config.min_free_gb
            ));
        }
        None
    }

    /// Best-effort episode marker lookup and persist; failures only log.
    async fn attach_episode_metadata(&self, config: &RunConfig, candidate: &Candidate) {
        let (Some(catalog), Some(website)) = (&self.catalog, &candidate.website) else {
            return;
        };
        match catalog.episode_for(website).await {
            Ok(Some((season, episode))) => {
                debug!(id = candidate.id, season, episode, "episode marker found");
                let entry = EpisodeMetadata {
                    source_id: candidate.id.clone(),
                    series: config.search_terms.first().cloned(),
                    season: Some(season),
                    episode: Some(episode),
                };
                if let Err(e) = self.store.upsert_episode_metadata(&[entry]).await {
                    warn!(id = candidate.id, error = %e, "episode metadata write failed");
                }
            }
            Ok(None) => {}
            Err(e) => debug!(id = candidate.id, error = %e, "episode marker lookup failed"),
        }
    }

    /// Writes the media-center sidecar next to a committed file.
    async fn write_sidecar(
        &self,
        candidate: &Candidate,
        media_path: &std::path::Path,
        ratings: Option<&HashMap<String, RatingRecord>>,
    ) {
        let rating = candidate
            .rating_ref
            .as_ref()
            .and_then(|id| ratings.and_then(|map| map.get(id)));
        let plot = match self.store.description(&candidate.id).await {
            Ok(plot) => plot,
            Err(e) => {
                warn!(id = candidate.id, error = %e, "description read failed");
                None
            }
        };
        let sidecar = Sidecar::for_candidate(candidate, rating, plot);
        if let Err(e) = sidecar::write_sidecar(media_path, &sidecar).await {
            warn!(id = candidate.id, error = %e, "sidecar write failed");
        }
    }
}

//! Immutable per-run configuration.
//!
//! A [`RunConfig`] is constructed once per run and passed by reference into
//! each component. Series runs derive fresh per-series configurations via
//! [`RunConfig::for_series`] instead of mutating shared state between
//! iterations.

use std::path::PathBuf;

use crate::store::Quality;

/// Default minimum free disk space in gigabytes.
pub const DEFAULT_MIN_FREE_GB: f64 = 20.0;

/// Default enrichment worker pool size.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Query-side duration window sent to the search API, in seconds.
pub const QUERY_DURATION_MIN_SECS: u64 = 20;
pub const QUERY_DURATION_MAX_SECS: u64 = 10_000;

/// Execution mode consumed at the ledger-write and target-directory
/// boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Normal operation: completed downloads are recorded in the ledger and
    /// files land in the configured download directory.
    Stateful,
    /// Quick mode: nothing is remembered and files land in the current
    /// working directory.
    Ephemeral,
}

impl RunMode {
    /// Whether completed downloads are recorded in the ledger.
    #[must_use]
    pub fn records_downloads(self) -> bool {
        matches!(self, Self::Stateful)
    }
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory holding the catalog database.
    pub config_dir: PathBuf,
    /// Root directory downloads are written to.
    pub download_dir: PathBuf,
    /// Full-text terms matched against title and topic.
    pub search_terms: Vec<String>,
    /// Optional channel terms.
    pub channel_terms: Vec<String>,
    /// Caller-supplied title exclusion terms (joined with the built-in
    /// stoplist).
    pub exclude_terms: Vec<String>,
    /// Requested video quality tier.
    pub quality: Quality,
    /// Candidates shorter than this are dropped.
    pub min_duration_minutes: u64,
    /// Free-space floor for download admission control.
    pub min_free_gb: f64,
    /// Stateful or ephemeral execution.
    pub mode: RunMode,
    /// Single-file mode: no per-title subdirectory.
    pub single_file: bool,
    /// Truncate titles at the `" - "` separator.
    pub truncate_titles: bool,
    /// Enable rating enrichment and sidecar generation.
    pub enrich: bool,
    /// Enrichment worker pool size.
    pub concurrency: usize,
    /// Minimum rating value for enriched filtering.
    pub min_rating: f64,
    /// Minimum rating count for enriched filtering.
    pub min_votes: i64,
    /// Ratings published before this year are ignored.
    pub min_year: i32,
    /// Restrict the run to these positions of the sorted candidate list.
    pub select_rows: Option<Vec<usize>>,
    /// Catalog section names considered in series mode.
    pub series_sections: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("."),
            download_dir: PathBuf::from("."),
            search_terms: Vec::new(),
            channel_terms: Vec::new(),
            exclude_terms: Vec::new(),
            quality: Quality::Medium,
            min_duration_minutes: 10,
            min_free_gb: DEFAULT_MIN_FREE_GB,
            mode: RunMode::Stateful,
            single_file: false,
            truncate_titles: false,
            enrich: false,
            concurrency: DEFAULT_CONCURRENCY,
            min_rating: 0.0,
            min_votes: 0,
            min_year: 0,
            select_rows: None,
            series_sections: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Derives a fresh configuration for one series of a series-mode run.
    ///
    /// The derived run searches for the series title on the pinned channel,
    /// truncates episode suffixes, writes single files into a per-series
    /// subdirectory, and inherits everything else from `self`. The base
    /// configuration is left untouched.
    #[must_use]
    pub fn for_series(&self, series_name: &str, channel: &str) -> Self {
        let dir_name = crate::download::filename::slug_with_separator(series_name, ' ');
        Self {
            download_dir: self.download_dir.join(dir_name),
            search_terms: vec![series_name.to_string()],
            channel_terms: vec![channel.to_string()],
            single_file: true,
            truncate_titles: true,
            ..self.clone()
        }
    }

    /// Path of the catalog database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.config_dir.join("data.db")
    }
}

//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use mediathek_dl::config::{DEFAULT_CONCURRENCY, DEFAULT_MIN_FREE_GB};
use mediathek_dl::{Quality, RunConfig, RunMode};

/// Search public mediathek libraries and download selected programs.
///
/// Without --run the tool only lists the candidates a run would download.
#[derive(Parser, Debug)]
#[command(name = "mdl")]
#[command(author, version, about)]
pub struct Args {
    /// Directory holding the catalog database (default: ~/.mdl)
    #[arg(long = "configdir")]
    pub config_dir: Option<PathBuf>,

    /// Root directory downloads are written to
    #[arg(long = "download", default_value = ".")]
    pub download_dir: PathBuf,

    /// Search terms matched against title and topic (repeatable)
    #[arg(short = 's', long = "search")]
    pub search: Vec<String>,

    /// Restrict results to these channels (repeatable)
    #[arg(long = "channel")]
    pub channel: Vec<String>,

    /// Exclude candidates whose title contains this term (repeatable)
    #[arg(short = 'x', long = "exclude")]
    pub exclude: Vec<String>,

    /// Video quality tier
    #[arg(long, default_value = "M", value_parser = ["H", "M", "L"])]
    pub quality: String,

    /// Drop candidates shorter than this many minutes
    #[arg(long = "min-duration", default_value_t = 10)]
    pub min_duration: u64,

    /// Minimum free disk space in GB kept after a download
    #[arg(long = "free", default_value_t = DEFAULT_MIN_FREE_GB)]
    pub min_free_gb: f64,

    /// Quick mode: download into the current directory, remember nothing
    #[arg(short = 'q', long = "quick")]
    pub quick: bool,

    /// Write a single file per candidate instead of a per-title directory
    #[arg(long = "file")]
    pub single_file: bool,

    /// Actually download; without this flag candidates are only listed
    #[arg(short = 'r', long = "run")]
    pub run: bool,

    /// Truncate titles at the " - " separator
    #[arg(long = "title")]
    pub truncate_titles: bool,

    /// Mark the listed candidates as downloaded, without downloading
    #[arg(long = "mark-done", conflicts_with = "mark_undone")]
    pub mark_done: bool,

    /// Remove the listed candidates from the download ledger
    #[arg(long = "mark-undone")]
    pub mark_undone: bool,

    /// Series mode: run once per series title from the catalog
    #[arg(long = "series")]
    pub series: bool,

    /// Restrict series mode to these catalog sections (repeatable)
    #[arg(long = "series-filter")]
    pub series_filter: Vec<String>,

    /// Enable rating enrichment, filtering and sidecar files
    #[arg(long = "imdb")]
    pub enrich: bool,

    /// Keep only candidates rated at least this value
    #[arg(long = "min-rating", default_value_t = 0.0)]
    pub min_rating: f64,

    /// Keep only candidates with at least this many rating votes
    #[arg(long = "min-votes", default_value_t = 0)]
    pub min_votes: i64,

    /// Ignore ratings published before this year
    #[arg(long = "min-year", default_value_t = 0)]
    pub min_year: i32,

    /// Enrichment worker pool size (1-100)
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Keep only these positions of the sorted candidate list (0-based,
    /// comma-separated)
    #[arg(long = "select", value_delimiter = ',')]
    pub select: Vec<usize>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long)]
    pub quiet: bool,
}

impl Args {
    /// Builds the immutable run configuration.
    ///
    /// Quick mode overrides both state directories: downloads land in the
    /// current directory and nothing is recorded.
    #[must_use]
    pub fn into_config(self) -> RunConfig {
        let config_dir = self.config_dir.unwrap_or_else(default_config_dir);
        let (mode, download_dir) = if self.quick {
            (RunMode::Ephemeral, PathBuf::from("."))
        } else {
            (RunMode::Stateful, self.download_dir)
        };
        RunConfig {
            config_dir,
            download_dir,
            search_terms: self.search,
            channel_terms: self.channel,
            exclude_terms: self.exclude,
            quality: Quality::from_flag(&self.quality),
            min_duration_minutes: self.min_duration,
            min_free_gb: self.min_free_gb,
            mode,
            single_file: self.single_file,
            truncate_titles: self.truncate_titles,
            enrich: self.enrich,
            concurrency: usize::from(self.concurrency),
            min_rating: self.min_rating,
            min_votes: self.min_votes,
            min_year: self.min_year,
            select_rows: (!self.select.is_empty()).then_some(self.select),
            series_sections: self.series_filter,
        }
    }
}

fn default_config_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
        .join(".mdl")
}

//! Mediathek downloader core library.
//!
//! Searches a public mediathek API for media items, reconciles the results
//! into a local SQLite catalog, optionally enriches candidates with external
//! rating metadata, and downloads selected items with resumable transfers
//! and an idempotent download ledger.
//!
//! # Architecture
//!
//! - [`db`] - Database connection and additive schema management
//! - [`store`] - Source catalog, download ledger and rating cache
//! - [`search`] - Search API paging and candidate reconciliation
//! - [`enrich`] - Concurrent rating enrichment and rating-driven filtering
//! - [`download`] - Sequential download engine with admission control
//! - [`pipeline`] - End-to-end run orchestration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod download;
pub mod enrich;
pub mod pipeline;
pub mod search;
pub mod store;

// Re-export commonly used types
pub use config::{RunConfig, RunMode};
pub use db::Database;
pub use download::{
    DownloadEngine, DownloadOutcome, DownloadStats, HttpTransfer, SeriesCatalog, Transfer,
    TransferError,
};
pub use enrich::{RatingClient, filter_by_rating};
pub use pipeline::{Pipeline, SeriesBatch};
pub use search::{QueryOptions, SearchClient, fetch_candidates};
pub use store::{Candidate, EpisodeMetadata, Quality, RatingRecord, Store, StoreError};

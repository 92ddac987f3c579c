//! Resumable download engine and its collaborator seams.

mod catalog;
mod engine;
pub mod filename;
mod sidecar;
mod transfer;

pub use catalog::{CatalogError, HttpSeriesCatalog, SeriesCatalog};
pub use engine::{DownloadEngine, DownloadOutcome, DownloadStats};
pub use sidecar::{Sidecar, sidecar_path, write_sidecar};
pub use transfer::{HttpTransfer, Transfer, TransferError};

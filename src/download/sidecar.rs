//! Media-center sidecar descriptors.
//!
//! Written next to a committed download so library scanners pick up title,
//! plot and rating linkage without re-deriving them from the filename.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, instrument};

use crate::store::{Candidate, RatingRecord};

/// Tag/value fields for one sidecar file.
#[derive(Debug, Clone, Default)]
pub struct Sidecar {
    pub title: String,
    pub plot: Option<String>,
    pub year: Option<i32>,
    pub rating_id: Option<String>,
    pub country: Option<String>,
}

impl Sidecar {
    /// Assembles sidecar fields from a candidate and its rating record.
    #[must_use]
    pub fn for_candidate(
        candidate: &Candidate,
        rating: Option<&RatingRecord>,
        plot: Option<String>,
    ) -> Self {
        Self {
            title: candidate.title.clone(),
            plot,
            year: rating.and_then(RatingRecord::year),
            rating_id: candidate.rating_ref.clone(),
            country: None,
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        push_tag(&mut out, "title", Some(&self.title));
        push_tag(&mut out, "plot", self.plot.as_deref());
        push_tag(&mut out, "year", self.year.map(|y| y.to_string()).as_deref());
        push_tag(&mut out, "id", self.rating_id.as_deref());
        push_tag(&mut out, "country", self.country.as_deref());
        push_tag(
            &mut out,
            "dateadded",
            Some(&Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        );
        out
    }
}

fn push_tag(out: &mut String, tag: &str, value: Option<&str>) {
    if let Some(value) = value {
        out.push_str(tag);
        out.push_str(": ");
        // Keep one line per tag so the file stays trivially parseable.
        out.push_str(&value.replace('\n', " "));
        out.push('\n');
    }
}

/// Sidecar path for a committed media file: same stem, `.nfo` extension.
#[must_use]
pub fn sidecar_path(media_path: &Path) -> PathBuf {
    media_path.with_extension("nfo")
}

/// Writes the sidecar next to the committed media file.
///
/// # Errors
///
/// Returns the underlying [`std::io::Error`] if the write fails.
#[instrument(skip(sidecar), fields(media = %media_path.display()))]
pub async fn write_sidecar(media_path: &Path, sidecar: &Sidecar) -> std::io::Result<()> {
    let path = sidecar_path(media_path);
    tokio::fs::write(&path, sidecar.render()).await?;
    debug!(path = %path.display(), "sidecar written");
    Ok(())
}

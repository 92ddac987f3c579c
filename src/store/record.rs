//! Record types for the source catalog, rating cache and projections.

use std::fmt;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

/// One raw media item as returned by the search API.
///
/// Field names follow the upstream wire format. Everything except `id` is
/// optional so a sparse result row never fails the whole page.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSource {
    /// Stable content fingerprint assigned by the upstream service.
    pub id: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Publish time as epoch seconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Duration in raw seconds.
    #[serde(default)]
    pub duration: Option<i64>,
    /// Size in bytes.
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub url_website: Option<String>,
    #[serde(default)]
    pub url_subtitle: Option<String>,
    /// Medium quality video URL.
    #[serde(default)]
    pub url_video: Option<String>,
    #[serde(default)]
    pub url_video_low: Option<String>,
    #[serde(default)]
    pub url_video_hd: Option<String>,
    /// List snapshot timestamp; the API serves this either as a number or a
    /// numeric string, so it is normalized at upsert time.
    #[serde(default, rename = "filmlisteTimestamp")]
    pub list_timestamp: Option<serde_json::Value>,
}

/// Video quality tier of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Low,
    Medium,
    High,
}

impl Quality {
    /// Parses a quality flag, falling back to [`Quality::Medium`] for
    /// anything unrecognized.
    #[must_use]
    pub fn from_flag(flag: &str) -> Self {
        match flag {
            "H" | "h" | "high" => Self::High,
            "L" | "l" | "low" => Self::Low,
            "M" | "m" | "medium" => Self::Medium,
            _ => Self::Medium,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

/// Flat candidate projection returned by `Store::get_candidates`.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: String,
    pub title: String,
    /// Concrete video URL for the requested quality tier.
    pub link: String,
    pub duration: Duration,
    pub published_at: Option<NaiveDateTime>,
    /// Size converted to megabytes.
    pub size_mb: f64,
    pub channel: String,
    pub format: String,
    pub rating_ref: Option<String>,
    pub rating_resolved: bool,
    pub website: Option<String>,
}

impl Candidate {
    /// Size in gigabytes, used by download admission control.
    #[must_use]
    pub fn size_gb(&self) -> f64 {
        self.size_mb / 1024.0
    }
}

/// Season/episode metadata optionally attached to a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeMetadata {
    pub source_id: String,
    pub series: Option<String>,
    /// Absent values stay `None`, never zero.
    pub season: Option<i64>,
    pub episode: Option<i64>,
}

/// Cached external rating record.
#[derive(Debug, Clone)]
pub struct RatingRecord {
    pub rating_id: String,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub rating_value: Option<f64>,
    pub rating_count: Option<i64>,
    pub published_at: Option<NaiveDate>,
    /// Comma-joined genre tags; `None` marks a reparse candidate.
    pub genres: Option<String>,
}

impl RatingRecord {
    /// Publication year, when known.
    #[must_use]
    pub fn year(&self) -> Option<i32> {
        use chrono::Datelike;
        self.published_at.map(|d| d.year())
    }
}

/// Normalized rating data handed to `Store::upsert_rating`.
///
/// Built by the enrichment client from a raw lookup payload; the canonical
/// rating id is parsed out of `url` by the store.
#[derive(Debug, Clone, Default)]
pub struct RatingUpsert {
    /// Reference URL with the rating id embedded in a path segment.
    pub url: String,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub rating_value: Option<f64>,
    pub rating_count: Option<i64>,
    /// `YYYY-MM-DD` when known.
    pub published_at: Option<String>,
    pub genres: Vec<String>,
}

/// Extracts the canonical rating identifier from a reference URL.
///
/// The identifier is the first path segment that contains a digit, e.g.
/// `https://example.org/title/tt0111161/` yields `tt0111161`.
#[must_use]
pub fn parse_rating_id(url: &str) -> Option<String> {
    let path = url::Url::parse(url).ok().map_or_else(
        || url.to_string(),
        |u| u.path().to_string(),
    );
    path.split('/')
        .map(str::trim)
        .find(|seg| !seg.is_empty() && seg.chars().any(|c| c.is_ascii_digit()))
        .map(ToString::to_string)
}

/// Derives the file format from a video URL extension, e.g. `mp4`.
#[must_use]
pub fn file_format_from_url(url: &str) -> Option<String> {
    let path = url::Url::parse(url).ok().map_or_else(
        || url.to_string(),
        |u| u.path().to_string(),
    );
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

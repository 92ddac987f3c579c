//! Source store: catalog, download ledger, episode metadata and rating cache.
//!
//! All durable state of the pipeline lives here. Every operation runs in a
//! short-lived transaction that either fully commits its batch or fully
//! rolls back; the enrichment worker pool issues many small concurrent
//! writes, so no operation holds a transaction across a whole batch of
//! network calls.
//!
//! # Example
//!
//! ```ignore
//! use mediathek_dl::{Database, Store};
//!
//! let db = Database::new(&config_dir.join("data.db")).await?;
//! let store = Store::new(db);
//! store.upsert_sources(&raw_batch).await?;
//! let candidates = store.get_candidates(&ids, Quality::High, true, "mp4").await?;
//! ```

mod error;
mod record;

pub use error::{Result, StoreError};
pub use record::{
    Candidate, EpisodeMetadata, Quality, RatingRecord, RatingUpsert, RawSource,
    file_format_from_url, parse_rating_id,
};

use std::collections::HashMap;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::{debug, instrument, warn};

use crate::db::Database;

/// Datetime storage format; lexicographic order matches chronological order.
const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Genre tags that disqualify a rating from candidate selection.
const EXCLUDED_GENRES: [&str; 2] = ["Documentary", "Biography"];

/// Store over the local catalog database.
///
/// Cloning is cheap; the underlying pool is shared.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upserts a batch of raw search results into the catalog.
    ///
    /// Timestamp fields are normalized first (epoch seconds to datetime, raw
    /// seconds kept as a duration column). Existing rows are merged field by
    /// field; a missing field in the incoming record never nulls out data
    /// already present. The file format is derived from the medium quality
    /// URL when the record does not carry one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] and rolls back the whole batch if any
    /// row fails.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn upsert_sources(&self, records: &[RawSource]) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        for r in records {
            let published_at = r.timestamp.and_then(epoch_to_datetime);
            let list_timestamp = r
                .list_timestamp
                .as_ref()
                .and_then(json_epoch)
                .and_then(epoch_to_datetime);
            let file_format = r.url_video.as_deref().and_then(file_format_from_url);

            sqlx::query(
                r"INSERT INTO source (
                    id, channel, topic, title, description, published_at,
                    duration_secs, size_bytes, url_website, url_subtitle,
                    url_video, url_video_low, url_video_hd, list_timestamp,
                    file_format
                  )
                  VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                  ON CONFLICT(id) DO UPDATE SET
                    channel = COALESCE(excluded.channel, source.channel),
                    topic = COALESCE(excluded.topic, source.topic),
                    title = COALESCE(excluded.title, source.title),
                    description = COALESCE(excluded.description, source.description),
                    published_at = COALESCE(excluded.published_at, source.published_at),
                    duration_secs = COALESCE(excluded.duration_secs, source.duration_secs),
                    size_bytes = COALESCE(excluded.size_bytes, source.size_bytes),
                    url_website = COALESCE(excluded.url_website, source.url_website),
                    url_subtitle = COALESCE(excluded.url_subtitle, source.url_subtitle),
                    url_video = COALESCE(excluded.url_video, source.url_video),
                    url_video_low = COALESCE(excluded.url_video_low, source.url_video_low),
                    url_video_hd = COALESCE(excluded.url_video_hd, source.url_video_hd),
                    list_timestamp = COALESCE(excluded.list_timestamp, source.list_timestamp),
                    file_format = COALESCE(excluded.file_format, source.file_format)",
            )
            .bind(&r.id)
            .bind(&r.channel)
            .bind(&r.topic)
            .bind(&r.title)
            .bind(&r.description)
            .bind(published_at)
            .bind(r.duration)
            .bind(r.size)
            .bind(&r.url_website)
            .bind(&r.url_subtitle)
            .bind(&r.url_video)
            .bind(&r.url_video_low)
            .bind(&r.url_video_hd)
            .bind(list_timestamp)
            .bind(file_format)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Upserts episode metadata rows keyed by source id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] and rolls back the batch on failure.
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    pub async fn upsert_episode_metadata(&self, entries: &[EpisodeMetadata]) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        for e in entries {
            sqlx::query(
                r"INSERT INTO episode_meta (source_id, series, season, episode)
                  VALUES (?, ?, ?, ?)
                  ON CONFLICT(source_id) DO UPDATE SET
                    series = COALESCE(excluded.series, episode_meta.series),
                    season = COALESCE(excluded.season, episode_meta.season),
                    episode = COALESCE(excluded.episode, episode_meta.episode)",
            )
            .bind(&e.source_id)
            .bind(&e.series)
            .bind(e.season)
            .bind(e.episode)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Returns episode metadata for a source, when attached.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn episode_metadata(&self, source_id: &str) -> Result<Option<EpisodeMetadata>> {
        let row = sqlx::query(
            "SELECT source_id, series, season, episode FROM episode_meta WHERE source_id = ?",
        )
        .bind(source_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|r| EpisodeMetadata {
            source_id: r.get("source_id"),
            series: r.get("series"),
            season: r.get("season"),
            episode: r.get("episode"),
        }))
    }

    /// Returns the stored description text for a source.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn description(&self, source_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT description FROM source WHERE id = ?")
            .bind(source_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.and_then(|r| r.get("description")))
    }

    /// Selects candidate projections for the given ids.
    ///
    /// Filters by file format, optionally excludes items already present in
    /// the download ledger, and resolves the requested quality tier to a
    /// concrete URL. A missing tier URL falls back to the medium tier, and an
    /// unrecognized tier flag resolves to medium via [`Quality::from_flag`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self, ids), fields(ids = ids.len(), %quality))]
    pub async fn get_candidates(
        &self,
        ids: &[String],
        quality: Quality,
        only_not_downloaded: bool,
        file_format: &str,
    ) -> Result<Vec<Candidate>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let link_expr = match quality {
            Quality::High => "COALESCE(NULLIF(url_video_hd, ''), url_video)",
            Quality::Low => "COALESCE(NULLIF(url_video_low, ''), url_video)",
            Quality::Medium => "url_video",
        };
        let ledger_filter = if only_not_downloaded {
            "AND NOT EXISTS (SELECT 1 FROM download_log d WHERE d.source_id = source.id)"
        } else {
            ""
        };
        let sql = format!(
            r"SELECT id, title, {link_expr} AS link, duration_secs, published_at,
                     size_bytes, channel, file_format, rating_ref, rating_resolved,
                     url_website
              FROM source
              WHERE id IN ({}) AND file_format = ? AND url_video IS NOT NULL
              {ledger_filter}",
            placeholders(ids.len()),
        );

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.bind(file_format).fetch_all(self.db.pool()).await?;

        Ok(rows.iter().map(candidate_from_row).collect())
    }

    /// Appends ledger rows marking each id as downloaded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] and rolls back the batch on failure.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn mark_downloaded(&self, ids: &[String]) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        for id in ids {
            sqlx::query("INSERT INTO download_log (source_id) VALUES (?)")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Deletes all ledger rows for each id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn unmark_downloaded(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "DELETE FROM download_log WHERE source_id IN ({})",
            placeholders(ids.len()),
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query.execute(self.db.pool()).await?;
        Ok(())
    }

    /// Whether at least one ledger row exists for the id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn is_downloaded(&self, id: &str) -> Result<bool> {
        let row: (i64,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM download_log WHERE source_id = ?)")
                .bind(id)
                .fetch_one(self.db.pool())
                .await?;
        Ok(row.0 != 0)
    }

    /// Upserts a rating record parsed from a lookup payload.
    ///
    /// The canonical rating id is extracted from the payload's reference URL;
    /// a payload without a parseable id is skipped with a warning and yields
    /// `Ok(None)`. When `source_id` is given, the source row is updated with
    /// the rating reference and marked as resolved in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] and rolls back on failure.
    #[instrument(skip(self, rating), fields(url = %rating.url))]
    pub async fn upsert_rating(
        &self,
        rating: &RatingUpsert,
        source_id: Option<&str>,
    ) -> Result<Option<String>> {
        let Some(rating_id) = parse_rating_id(&rating.url) else {
            warn!(url = %rating.url, "rating payload without parseable id, skipping");
            return Ok(None);
        };

        let genres = if rating.genres.is_empty() {
            None
        } else {
            Some(rating.genres.join(","))
        };

        let mut tx = self.db.pool().begin().await?;
        sqlx::query(
            r"INSERT INTO rating (
                rating_id, kind, name, rating_value, rating_count, published_at, genres
              )
              VALUES (?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT(rating_id) DO UPDATE SET
                kind = COALESCE(excluded.kind, rating.kind),
                name = COALESCE(excluded.name, rating.name),
                rating_value = COALESCE(excluded.rating_value, rating.rating_value),
                rating_count = COALESCE(excluded.rating_count, rating.rating_count),
                published_at = COALESCE(excluded.published_at, rating.published_at),
                genres = COALESCE(excluded.genres, rating.genres)",
        )
        .bind(&rating_id)
        .bind(&rating.kind)
        .bind(&rating.name)
        .bind(rating.rating_value)
        .bind(rating.rating_count)
        .bind(&rating.published_at)
        .bind(genres)
        .execute(&mut *tx)
        .await?;

        if let Some(source_id) = source_id {
            sqlx::query("UPDATE source SET rating_ref = ?, rating_resolved = 1 WHERE id = ?")
                .bind(&rating_id)
                .bind(source_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!(rating_id, "rating upserted");
        Ok(Some(rating_id))
    }

    /// Marks a source as having had a rating lookup attempt.
    ///
    /// Set unconditionally after a lookup, success or failure, so a
    /// permanently unmatchable item is never retried.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn set_rating_resolved(&self, source_id: &str) -> Result<()> {
        sqlx::query("UPDATE source SET rating_resolved = 1 WHERE id = ?")
            .bind(source_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Returns usable ratings for the given rating ids.
    ///
    /// Only ratings with a non-null value, a publish date at or after
    /// `min_year`-01-01 and no documentary/biography genre tag are returned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self, ids), fields(ids = ids.len(), min_year))]
    pub async fn ratings_for_ids(
        &self,
        ids: &[String],
        min_year: i32,
    ) -> Result<HashMap<String, RatingRecord>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            r"SELECT rating_id, kind, name, rating_value, rating_count, published_at, genres
              FROM rating
              WHERE rating_id IN ({})
                AND rating_value IS NOT NULL
                AND published_at IS NOT NULL
                AND published_at >= ?
                AND (genres IS NULL
                     OR (genres NOT LIKE '%' || ? || '%' AND genres NOT LIKE '%' || ? || '%'))",
            placeholders(ids.len()),
        );

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query
            .bind(format!("{min_year}-01-01"))
            .bind(EXCLUDED_GENRES[0])
            .bind(EXCLUDED_GENRES[1])
            .fetch_all(self.db.pool())
            .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let record = rating_from_row(r);
                (record.rating_id.clone(), record)
            })
            .collect())
    }

    /// Rating ids whose cached record is missing genre tags.
    ///
    /// These are stale or incomplete fetches that the enrichment reparse
    /// phase re-fetches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn ids_needing_rating_reparse(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT rating_id FROM rating WHERE genres IS NULL")
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows.iter().map(|r| r.get("rating_id")).collect())
    }

    /// Deletes a rating record, e.g. when upstream reports it gone.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn drop_rating(&self, rating_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM rating WHERE rating_id = ?")
            .bind(rating_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}

/// Builds a `?, ?, ...` placeholder list for dynamic IN clauses.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Converts epoch seconds to the stored datetime text format.
fn epoch_to_datetime(secs: i64) -> Option<String> {
    if secs <= 0 {
        return None;
    }
    chrono::DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc().format(DATETIME_FMT).to_string())
}

/// Reads an epoch value the API serves as either a number or numeric string.
fn json_epoch(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn candidate_from_row(r: &SqliteRow) -> Candidate {
    let duration_secs: Option<i64> = r.get("duration_secs");
    let published_at: Option<String> = r.get("published_at");
    let size_bytes: Option<i64> = r.get("size_bytes");
    let rating_resolved: i64 = r.get("rating_resolved");

    Candidate {
        id: r.get("id"),
        title: r.get::<Option<String>, _>("title").unwrap_or_default(),
        link: r.get::<Option<String>, _>("link").unwrap_or_default(),
        duration: Duration::from_secs(duration_secs.unwrap_or(0).max(0) as u64),
        published_at: published_at
            .as_deref()
            .and_then(|s| NaiveDateTime::parse_from_str(s, DATETIME_FMT).ok()),
        size_mb: size_bytes.unwrap_or(0) as f64 / 1024.0 / 1024.0,
        channel: r.get::<Option<String>, _>("channel").unwrap_or_default(),
        format: r.get::<Option<String>, _>("file_format").unwrap_or_default(),
        rating_ref: r.get("rating_ref"),
        rating_resolved: rating_resolved != 0,
        website: r.get("url_website"),
    }
}

fn rating_from_row(r: &SqliteRow) -> RatingRecord {
    let published_at: Option<String> = r.get("published_at");
    RatingRecord {
        rating_id: r.get("rating_id"),
        kind: r.get("kind"),
        name: r.get("name"),
        rating_value: r.get("rating_value"),
        rating_count: r.get("rating_count"),
        published_at: published_at
            .as_deref()
            .and_then(|s| NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d").ok()),
        genres: r.get("genres"),
    }
}

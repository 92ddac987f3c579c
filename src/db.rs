//! Database connection and schema management.
//!
//! This module provides SQLite database connectivity with:
//! - Connection pool management
//! - WAL mode for concurrent reads
//! - Additive schema migration on startup
//!
//! Schema evolution is strictly additive: missing tables and columns are
//! created on every startup, existing data is never dropped or rewritten.
//! This allows older catalog databases to keep working after upgrades.

use std::path::Path;

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// Default maximum number of connections in the pool.
/// Kept low for SQLite since it uses file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in milliseconds.
/// Connections will wait this long before returning SQLITE_BUSY. The
/// enrichment worker pool issues many small concurrent writes, so this must
/// be generous enough to ride out short write bursts.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),
}

/// Database connection wrapper with connection pool.
///
/// Handles SQLite connection pooling, WAL mode configuration,
/// and additive schema migration.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Creates a new database connection to the specified path.
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Enable WAL mode for concurrent reads
    /// 3. Create missing tables and columns (additive only)
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection or schema setup fails.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        // Enable WAL mode for concurrent reads
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;

        // Set busy timeout to avoid immediate lock errors
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        ensure_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// The database exists only for the lifetime of the connection
    /// and is useful for unit tests. Note: WAL mode is not enabled
    /// for in-memory databases as it provides no benefit.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection or schema setup fails.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        ensure_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    ///
    /// Use this for executing queries with sqlx.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Gracefully closes all connections in the pool.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Creates missing tables and adds missing columns.
///
/// The CREATE TABLE statements describe the original schema; columns added
/// in later releases are appended through [`ensure_columns`] so that
/// databases created by older versions pick them up without data loss.
async fn ensure_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"CREATE TABLE IF NOT EXISTS source (
            id TEXT PRIMARY KEY,
            channel TEXT,
            topic TEXT,
            title TEXT,
            description TEXT,
            published_at TEXT,
            duration_secs INTEGER,
            size_bytes INTEGER,
            url_website TEXT,
            url_subtitle TEXT,
            url_video TEXT,
            url_video_low TEXT,
            url_video_hd TEXT,
            list_timestamp TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"CREATE TABLE IF NOT EXISTS download_log (
            did INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id TEXT NOT NULL REFERENCES source(id),
            marked_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"CREATE TABLE IF NOT EXISTS episode_meta (
            source_id TEXT PRIMARY KEY REFERENCES source(id),
            series TEXT,
            season INTEGER,
            episode INTEGER
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"CREATE TABLE IF NOT EXISTS rating (
            rating_id TEXT PRIMARY KEY,
            kind TEXT,
            name TEXT,
            rating_value REAL,
            published_at TEXT,
            genres TEXT
        )",
    )
    .execute(pool)
    .await?;

    // Columns added after the initial release.
    ensure_columns(
        pool,
        "source",
        &[
            ("file_format", "TEXT"),
            ("rating_ref", "TEXT"),
            ("rating_resolved", "INTEGER NOT NULL DEFAULT 0"),
        ],
    )
    .await?;
    ensure_columns(pool, "rating", &[("rating_count", "INTEGER")]).await?;

    Ok(())
}

/// Adds each missing column to `table` via ALTER TABLE ADD COLUMN.
async fn ensure_columns(
    pool: &SqlitePool,
    table: &str,
    columns: &[(&str, &str)],
) -> Result<(), sqlx::Error> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await?;
    let existing: Vec<String> = rows.iter().map(|r| r.get::<String, _>("name")).collect();

    for (name, decl) in columns {
        if !existing.iter().any(|c| c == name) {
            debug!(table, column = name, "adding missing column");
            sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {name} {decl}"))
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}

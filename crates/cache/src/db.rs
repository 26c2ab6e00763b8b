//! Database connection and pool management.

use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
// Scans register up to 16 files at once, but most of that is waiting on
// stat() and SQLite only has one writer anyway.
const MAX_CONNECTIONS: u32 = 5;
const DATABASE_EXTENSION: &str = "sqlite";

/// Database connection pool for the cache of a single package repository.
///
/// This is the main entry point for interacting with the cache database.
/// It manages the SQLite connection pool and provides access to the
/// [`Repository`](crate::Repository).
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    async fn new(options: SqliteConnectOptions, max: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Runs per pooled connection; PRAGMAs set once would only
            // reach whichever connection happened to run them.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max.unwrap_or(MAX_CONNECTIONS))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Connect to the cache database at the given path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    /// Safe to call from many process starts against the same file.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let options = Self::base_options().filename(path).create_if_missing(true);
        Self::new(options, None).await
    }

    /// Connect to the cache database for repository `repo_id`, stored as
    /// `<cache_dir>/<repo_id>.sqlite`.
    ///
    /// The cache directory is created if it doesn't exist.
    pub async fn connect_for_repo(cache_dir: impl AsRef<Path>, repo_id: &str) -> Result<Self> {
        let cache_dir = cache_dir.as_ref();
        std::fs::create_dir_all(cache_dir).or_raise(|| ErrorKind::Database)?;
        Self::connect(Self::path_for_repo(cache_dir, repo_id)).await
    }

    /// Location of the cache database for repository `repo_id`.
    pub fn path_for_repo(cache_dir: impl AsRef<Path>, repo_id: &str) -> PathBuf {
        cache_dir.as_ref().join(format!("{repo_id}.{DATABASE_EXTENSION}"))
    }

    /// Connect to a throwaway in-memory cache.
    ///
    /// Not `#[cfg(test)]`: the library crate builds its test fixtures on it.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // Every in-memory connection is its own database, so the pool gets
        // exactly one.
        Self::new(options, Some(1)).await
    }

    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            // Index queries and summary reads keep going while a resync writes.
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            // Category memberships cascade on artifact deletion.
            .foreign_keys(true)
            // Every record can be rebuilt from the directory, so losing the
            // last few commits on power failure only means re-extraction.
            .synchronous(SqliteSynchronous::Normal)
            // An upload's registration can land in the middle of a scan's
            // burst of 16 concurrent upserts.
            .busy_timeout(std::time::Duration::from_millis(1500))
            // Pruning deletes rows but the file stays roughly the size of the
            // repository's index.
            .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::None)
    }

    /// PRAGMAs not exposed by [`SqliteConnectOptions`]. Sized for an index of
    /// tens of thousands of package records, each with a multi-kilobyte
    /// metadata block.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA wal_autocheckpoint = 1000;
                PRAGMA cache_size = -16384;
                PRAGMA temp_store = MEMORY;
                PRAGMA mmap_size = 67108864;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Run database migrations.
    ///
    /// Migrations only ever create tables and indexes that don't exist yet.
    #[instrument("performing database migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Waits for in-flight queries, then closes every connection.
    pub async fn close(&self) {
        // Refreshes planner statistics for the category and prune queries.
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

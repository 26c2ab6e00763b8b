//! Repository for artifact records and their category memberships.
//!
//! The two are managed as a unit: memberships only exist for artifacts whose
//! extraction has completed, are replaced wholesale when it completes again,
//! and are removed by cascade when the artifact is deleted.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{Artifact, ArtifactRow, PendingArtifact, PendingRow, StatsRow, StoreStats};
use exn::ResultExt;
use pkgrepo_extract::models::PackageInfo;
use sqlx::SqlitePool;
use time::UtcDateTime;
use tracing::instrument;

fn size_to_db(size: u64) -> Result<i64> {
    i64::try_from(size).or_raise(|| ErrorKind::InvalidData("file size"))
}

/// Repository for managing artifact records in the cache database.
///
/// Every write happens in a single transaction, so concurrent readers see
/// either the state before or after it, never a half-updated artifact.
///
/// # Last write wins
///
/// Records are keyed by filename alone. Registering a filename that is
/// already known under a different size replaces the record and discards
/// its metadata and categories; whichever registration commits last is the
/// one that sticks.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
    dry_run: bool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone(), dry_run: false }
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    ///
    /// In dry-run mode every read works as normal but writes are skipped
    /// and reported as successful.
    pub fn new(pool: SqlitePool, dry_run: bool) -> Self {
        Self { pool, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    async fn categories_for(&self, filename: &str) -> Result<Vec<String>> {
        let categories: Vec<String> = sqlx::query_scalar(include_str!("../queries/list_categories_for_filename.sql"))
            .bind(filename)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(categories)
    }

    // =========================================================================
    // Get/Fetch
    // =========================================================================

    /// Get the record for a filename, whatever its size.
    pub async fn get(&self, filename: impl AsRef<str>) -> Result<Option<Artifact>> {
        let filename = filename.as_ref();
        let row: Option<ArtifactRow> = sqlx::query_as(include_str!("../queries/get_by_filename.sql"))
            .bind(filename)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        match row {
            Some(row) => Ok(Some(row.into_artifact(self.categories_for(filename).await?)?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Insert/Update
    // =========================================================================

    /// Insert a pending record for `filename`, replacing any existing record
    /// (and its categories) for the same filename.
    #[instrument(level = "debug", skip(self))]
    pub async fn register_pending(&self, filename: &str, size: u64) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let size = size_to_db(size)?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/upsert_pending.sql"))
            .bind(filename)
            .bind(size)
            .bind(UtcDateTime::now().unix_timestamp())
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/delete_categories.sql"))
            .bind(filename)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Store extracted metadata for `filename` and replace its categories.
    ///
    /// The update only applies while the record still has the size the
    /// extractor was run against. Returns `false` (writing nothing) if the
    /// record was removed or re-registered under another size in the
    /// meantime.
    #[instrument(level = "debug", skip(self, info))]
    pub async fn complete(&self, filename: &str, size: u64, info: &PackageInfo, at: UtcDateTime) -> Result<bool> {
        if self.dry_run {
            return Ok(true);
        }
        let size = size_to_db(size)?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let result = sqlx::query(include_str!("../queries/complete_extraction.sql"))
            .bind(filename)
            .bind(size)
            .bind(info.name.as_ref().map(|n| n.full.as_str()))
            .bind(info.base_name())
            .bind(info.version())
            .bind(info.raw.as_str())
            .bind(at.unix_timestamp())
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            tx.rollback().await.or_raise(|| ErrorKind::Database)?;
            return Ok(false);
        }
        sqlx::query(include_str!("../queries/delete_categories.sql"))
            .bind(filename)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        for (position, category) in info.categories.iter().enumerate() {
            sqlx::query(include_str!("../queries/insert_category.sql"))
                .bind(filename)
                .bind(category.as_str())
                .bind(i64::try_from(position).or_raise(|| ErrorKind::InvalidData("category position"))?)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(true)
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// All pending records, by filename.
    pub async fn list_pending(&self) -> Result<Vec<PendingArtifact>> {
        let rows: Vec<PendingRow> = sqlx::query_as(include_str!("../queries/list_pending.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(PendingArtifact::try_from).collect()
    }

    /// Distinct categories of fresh records, sorted.
    pub async fn list_categories(&self) -> Result<Vec<String>> {
        let categories: Vec<String> = sqlx::query_scalar(include_str!("../queries/list_categories.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(categories)
    }

    /// Filenames of every fresh record, sorted.
    pub async fn list_filenames(&self) -> Result<Vec<String>> {
        let filenames: Vec<String> = sqlx::query_scalar(include_str!("../queries/list_filenames.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(filenames)
    }

    /// Filenames of fresh records in `category`, sorted.
    pub async fn list_filenames_for_category(&self, category: impl AsRef<str>) -> Result<Vec<String>> {
        let filenames: Vec<String> = sqlx::query_scalar(include_str!("../queries/list_filenames_for_category.sql"))
            .bind(category.as_ref())
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(filenames)
    }

    /// Number of distinct versions per package base name, across fresh
    /// records with a decomposable identifier.
    pub async fn count_by_package_base(&self) -> Result<Vec<(String, u64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(include_str!("../queries/count_by_package_base.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter()
            .map(|(base, count)| Ok((base, u64::try_from(count).or_raise(|| ErrorKind::InvalidData("version count"))?)))
            .collect()
    }

    /// Filenames that fall outside the newest `retention` records of a
    /// package base with more than `retention` distinct versions.
    ///
    /// Within a base, records rank by extraction time, newest first, with
    /// ties going to the lexically greater filename. At most `limit`
    /// filenames are returned.
    #[instrument(level = "debug", skip(self))]
    pub async fn list_prune_candidates(&self, retention: u32, limit: usize) -> Result<Vec<String>> {
        let limit = i64::try_from(limit).or_raise(|| ErrorKind::InvalidData("limit"))?;
        let filenames: Vec<String> = sqlx::query_scalar(include_str!("../queries/list_prune_candidates.sql"))
            .bind(i64::from(retention))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(filenames)
    }

    /// Raw metadata of every fresh record, in filename order.
    pub async fn list_raw_info(&self) -> Result<Vec<String>> {
        let blocks: Vec<String> = sqlx::query_scalar(include_str!("../queries/list_raw_info.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(blocks)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let row: StatsRow = sqlx::query_as(include_str!("../queries/count_artifacts.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.try_into()
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete the record for `filename` along with its categories.
    ///
    /// Returns `true` if a record was deleted, `false` if it was not found.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete(&self, filename: &str) -> Result<bool> {
        if self.dry_run {
            return Ok(true);
        }
        let result = sqlx::query(include_str!("../queries/delete_artifact.sql"))
            .bind(filename)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

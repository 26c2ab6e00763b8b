//! Package repository reconciliation and metadata cache.
//!
//! A [`PackageRepository`] ties a flat directory of package files to its
//! cache database and a metadata extractor. The directory decides which
//! files exist; the cache remembers what has already been learned about
//! them, so that only new or changed files are ever handed to the
//! extractor.
//!
//! - [`reconcile`] brings the cache in line with the directory: registering
//!   files, removing them, scanning and resyncing.
//! - [`index`] answers category queries.
//! - [`prune`] drops superseded package versions.
//! - [`summary`] assembles `pkg_summary` for clients.
//! - [`upload`] and [`mirror`] are the two ways files arrive from outside.

pub mod error;
pub mod index;
pub mod mirror;
pub mod prune;
pub mod reconcile;
pub mod summary;
pub mod upload;

pub use crate::index::ALL_CATEGORY;
pub use crate::mirror::{Mirror, MirrorStats};
pub use crate::prune::PruneStats;
pub use crate::reconcile::{
    ExtractStats, RegisterOutcome, Registration, ResyncStats, ScanEvent, ScanStats, scan,
};
pub use crate::summary::{CompressedSummary, SummaryFormat};
pub use crate::upload::UploadOutcome;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use pkgrepo_cache::{Repository, StoreStats};
use pkgrepo_extract::SourceHandle;
use pkgrepo_storage::RepoDir;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Registrations in flight at once during a scan. Each one is a stat and a
/// small transaction, so this mostly bounds open file handles.
pub const MAX_SCAN_CONCURRENCY: usize = 16;
/// Files handed to one extractor invocation.
pub const EXTRACT_BATCH_SIZE: usize = 100;
/// Prune candidates removed per pass.
pub const PRUNE_PAGE_SIZE: usize = 100;

/// One package repository: a directory of package files, the cache that
/// describes it, and the extractor used to fill that cache.
pub struct PackageRepository {
    id: String,
    dir: RepoDir,
    cache: Repository,
    source: SourceHandle,
    auth_token: Option<String>,
    retention: Option<u32>,
    /// Held for the whole of an extraction pass, so one repository never
    /// runs two extractor processes at once.
    extracting: Mutex<()>,
}

impl PackageRepository {
    pub fn new(id: impl Into<String>, dir: RepoDir, cache: Repository, source: SourceHandle) -> Self {
        Self {
            id: id.into(),
            dir,
            cache,
            source,
            auth_token: None,
            retention: None,
            extracting: Mutex::new(()),
        }
    }

    /// Secret that uploads must present. Without one, every upload is
    /// refused.
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Versions of each package kept after an upload. `None` disables
    /// automatic pruning.
    pub fn with_retention(mut self, retention: Option<u32>) -> Self {
        self.retention = retention;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &RepoDir {
        &self.dir
    }

    pub fn cache(&self) -> &Repository {
        &self.cache
    }

    pub fn retention(&self) -> Option<u32> {
        self.retention
    }

    /// Absolute location of a package file, for serving it.
    ///
    /// Rejects anything that is not a plain filename.
    pub fn path_for_filename(&self, filename: impl AsRef<Path>) -> Result<PathBuf> {
        self.dir.path_for_filename(filename).or_raise(|| ErrorKind::Path)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.cache.stats().await.or_raise(|| ErrorKind::Stats)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Fixture;
    use super::*;

    #[tokio::test]
    async fn test_path_for_filename_rejects_traversal() {
        let fixture = Fixture::new().await;
        let path = fixture.repo.path_for_filename("bash-5.2.21.tgz").unwrap();
        assert_eq!(path, fixture.path("bash-5.2.21.tgz"));
        let err = fixture.repo.path_for_filename("../etc/passwd").unwrap_err();
        assert_eq!(*err, ErrorKind::Path);
    }

    #[tokio::test]
    async fn test_empty_auth_token_is_no_token() {
        let fixture = Fixture::new().await;
        let repo = fixture.repo.with_auth_token(Some(String::new()));
        assert!(repo.auth_token.is_none());
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let fixture = Fixture::new().await;
        fixture.add("a-1.0.tgz", "a-1.0", "pkgtools", 10);
        fixture.add("b-2.0.tgz", "b-2.0", "pkgtools shells", 20);
        let stats = fixture.repo.resync().await.unwrap();
        assert_eq!(stats.scan.registered, 2);
        assert_eq!(stats.extract.extracted, 2);

        assert_eq!(fixture.repo.list_categories().await.unwrap(), vec!["pkgtools", "shells"]);
        assert_eq!(fixture.repo.list_artifacts(Some("shells")).await.unwrap(), vec!["b-2.0.tgz"]);
        assert_eq!(fixture.repo.list_artifacts(Some(ALL_CATEGORY)).await.unwrap(), vec![
            "a-1.0.tgz",
            "b-2.0.tgz"
        ]);
        let summary = fixture.repo.summary().await.unwrap();
        assert_eq!(summary.matches("PKGNAME=a-1.0\nCATEGORIES=pkgtools\n").count(), 1);
        assert_eq!(summary.matches("PKGNAME=b-2.0\nCATEGORIES=pkgtools shells\n").count(), 1);

        let totals = fixture.repo.stats().await.unwrap();
        assert_eq!(totals, StoreStats { total: 2, pending: 0, fresh: 2, categories: 2 });
    }
}

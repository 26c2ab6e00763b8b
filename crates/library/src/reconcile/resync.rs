use crate::error::{ErrorKind as LibraryErrorKind, Result as LibraryResult};
use crate::reconcile::ScanStats;
use crate::reconcile::error::{ErrorKind, Result};
use crate::{EXTRACT_BATCH_SIZE, PackageRepository};
use exn::ResultExt;
use pkgrepo_cache::PendingArtifact;
use std::path::PathBuf;
use time::UtcDateTime;
use tracing::instrument;

/// Totals from one [`extract_pending`](PackageRepository::extract_pending).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Pending records found when extraction started.
    pub pending: u64,
    /// Extractor invocations.
    pub batches: u64,
    pub extracted: u64,
    /// Pending files no longer on disk; left pending.
    pub skipped: u64,
    /// Records that changed size (or disappeared) while their batch ran.
    pub stale: u64,
    /// Batches the extractor failed on; their files stay pending.
    pub failed_batches: u64,
    /// Individual records whose cache update failed.
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncStats {
    pub scan: ScanStats,
    pub extract: ExtractStats,
}

#[derive(Debug, Default)]
struct BatchOutcome {
    extracted: u64,
    stale: u64,
    failed: u64,
}

impl PackageRepository {
    /// Scan the directory, then extract metadata for everything pending.
    #[instrument(skip(self), fields(repo = %self.id))]
    pub async fn resync(&self) -> LibraryResult<ResyncStats> {
        let scan = self.scan_directory().await.or_raise(|| LibraryErrorKind::Resync)?;
        let extract = self.extract_pending().await.or_raise(|| LibraryErrorKind::Resync)?;
        Ok(ResyncStats { scan, extract })
    }

    /// Extract metadata for every pending record.
    ///
    /// Pending records are read once, split into batches of
    /// [`EXTRACT_BATCH_SIZE`], and processed strictly one batch after
    /// another: a batch's cache updates are all written before the next
    /// extractor process starts. A failing batch is logged and its files
    /// stay pending for the next run; it never stops the batches after it.
    ///
    /// Overlapping calls on one repository (an upload landing during a
    /// mirror resync) run one after the other. The later call only sees
    /// what the earlier one left pending.
    #[instrument(skip(self), fields(repo = %self.id))]
    pub async fn extract_pending(&self) -> LibraryResult<ExtractStats> {
        let _extracting = match self.extracting.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!(repo = %self.id, "Waiting for running extraction to finish");
                self.extracting.lock().await
            },
        };
        let pending = self.cache.list_pending().await.or_raise(|| LibraryErrorKind::Resync)?;
        let mut stats = ExtractStats {
            pending: u64::try_from(pending.len()).unwrap_or(u64::MAX),
            ..ExtractStats::default()
        };
        for (index, batch) in pending.chunks(EXTRACT_BATCH_SIZE).enumerate() {
            let present = self.present(batch, &mut stats).await;
            if present.is_empty() {
                continue;
            }
            stats.batches += 1;
            match self.extract_batch(&present).await {
                Ok(outcome) => {
                    stats.extracted += outcome.extracted;
                    stats.stale += outcome.stale;
                    stats.failed += outcome.failed;
                    tracing::info!(
                        repo = %self.id,
                        source = self.source.name(),
                        batch = index,
                        extracted = outcome.extracted,
                        "Batch extracted"
                    );
                },
                Err(error) => {
                    stats.failed_batches += 1;
                    tracing::error!(
                        repo = %self.id,
                        batch = index,
                        size = present.len(),
                        retryable = error.is_retryable(),
                        error = ?error,
                        "Batch extraction failed"
                    );
                },
            }
        }
        Ok(stats)
    }

    /// The part of a batch still on disk. Vanished files are dropped here
    /// rather than left to fail the whole extractor invocation.
    async fn present<'a>(&self, batch: &'a [PendingArtifact], stats: &mut ExtractStats) -> Vec<&'a PendingArtifact> {
        let mut present = Vec::with_capacity(batch.len());
        for artifact in batch {
            match self.dir.exists(&artifact.filename).await {
                Ok(true) => present.push(artifact),
                Ok(false) => {
                    stats.skipped += 1;
                    tracing::warn!(repo = %self.id, filename = %artifact.filename, "Pending package file missing from disk");
                },
                Err(error) => {
                    stats.skipped += 1;
                    tracing::warn!(
                        repo = %self.id,
                        filename = %artifact.filename,
                        retryable = error.is_retryable(),
                        error = ?error,
                        "Could not check pending package file"
                    );
                },
            }
        }
        present
    }

    async fn extract_batch(&self, batch: &[&PendingArtifact]) -> Result<BatchOutcome> {
        let paths: Vec<PathBuf> = batch.iter().map(|artifact| self.dir.root().join(&artifact.filename)).collect();
        let infos = self
            .source
            .extract(&paths)
            .await
            .inspect_err(|error| {
                if !error.is_retryable() {
                    // Same files, same output: this batch keeps failing until
                    // one of them changes on disk.
                    tracing::warn!(
                        repo = %self.id,
                        source = self.source.name(),
                        error = ?error,
                        "Extractor output rejected"
                    );
                }
            })
            .or_raise(|| ErrorKind::Extract)?;
        let now = UtcDateTime::now();
        let mut outcome = BatchOutcome::default();
        for (artifact, info) in batch.iter().zip(&infos) {
            match self.cache.complete(&artifact.filename, artifact.size, info, now).await {
                Ok(true) => outcome.extracted += 1,
                Ok(false) => {
                    outcome.stale += 1;
                    tracing::debug!(repo = %self.id, filename = %artifact.filename, "Package file changed during extraction");
                },
                Err(error) => {
                    outcome.failed += 1;
                    tracing::warn!(
                        repo = %self.id,
                        filename = %artifact.filename,
                        retryable = error.is_retryable(),
                        error = ?error,
                        "Could not store extracted metadata"
                    );
                },
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use crate::PackageRepository;
    use crate::testing::Fixture;
    use async_trait::async_trait;
    use pkgrepo_cache::{Database, Repository};
    use pkgrepo_extract::models::PackageInfo;
    use pkgrepo_extract::source::{MetadataSource, MockSource};
    use pkgrepo_storage::RepoDir;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Takes its time, and remembers how many extractions ever overlapped.
    #[derive(Default)]
    struct SlowSource {
        inner: MockSource,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MetadataSource for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        async fn extract(&self, paths: &[PathBuf]) -> pkgrepo_extract::error::Result<Vec<PackageInfo>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            let result = self.inner.extract(paths).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[tokio::test]
    async fn test_overlapping_extractions_run_one_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_in_memory().await.unwrap();
        let source = Arc::new(SlowSource::default());
        let repo = PackageRepository::new(
            "test",
            RepoDir::new(dir.path()).unwrap(),
            Repository::from(&db),
            source.clone(),
        );
        for n in 0..5 {
            let filename = format!("pkg{n}-1.0.tgz");
            std::fs::write(dir.path().join(&filename), b"pkg").unwrap();
            source.inner.insert(&filename, format!("PKGNAME=pkg{n}-1.0\nCATEGORIES=misc\n"));
        }
        repo.scan_directory().await.unwrap();

        let (first, second) = tokio::join!(repo.extract_pending(), repo.extract_pending());
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(source.peak.load(Ordering::SeqCst), 1);
        assert_eq!(source.inner.invocations(), 1);
        assert_eq!(first.extracted + second.extracted, 5);
        assert_eq!(first.pending + second.pending, 5);
        assert!(repo.cache().list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resync_converges() {
        let fixture = Fixture::new().await;
        fixture.add("a-1.0.tgz", "a-1.0", "pkgtools", 10);
        fixture.add("b-2.0.tgz", "b-2.0", "pkgtools shells", 20);
        let first = fixture.repo.resync().await.unwrap();
        assert_eq!(first.extract.batches, 1);
        assert_eq!(fixture.source.invocations(), 1);

        let second = fixture.repo.resync().await.unwrap();
        assert_eq!(second.scan.unchanged, 2);
        assert_eq!(second.scan.registered + second.scan.invalidated, 0);
        assert_eq!(second.extract.pending, 0);
        assert_eq!(second.extract.batches, 0);
        assert_eq!(fixture.source.invocations(), 1);
    }

    #[tokio::test]
    async fn test_batches_are_bounded_and_ordered() {
        let fixture = Fixture::new().await;
        for n in 0..250 {
            fixture.add(&format!("pkg{n:03}-1.0.tgz"), &format!("pkg{n:03}-1.0"), "misc", 1);
        }
        let stats = fixture.repo.resync().await.unwrap();
        assert_eq!(stats.extract.batches, 3);
        assert_eq!(stats.extract.extracted, 250);
        let batches = fixture.source.batches();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(batches[0][0], "pkg000-1.0.tgz");
        assert_eq!(batches[2][49], "pkg249-1.0.tgz");
    }

    #[tokio::test]
    async fn test_failed_batch_is_isolated() {
        let fixture = Fixture::new().await;
        for n in 0..150 {
            fixture.add(&format!("pkg{n:03}-1.0.tgz"), &format!("pkg{n:03}-1.0"), "misc", 1);
        }
        // Lands in the first batch of 100.
        fixture.source.fail_on("pkg042-1.0.tgz");
        let stats = fixture.repo.resync().await.unwrap();
        assert_eq!(stats.extract.failed_batches, 1);
        assert_eq!(stats.extract.extracted, 50);
        assert_eq!(fixture.repo.cache().list_pending().await.unwrap().len(), 100);

        fixture.source.recover("pkg042-1.0.tgz");
        let stats = fixture.repo.resync().await.unwrap();
        assert_eq!(stats.extract.pending, 100);
        assert_eq!(stats.extract.extracted, 100);
        assert!(fixture.repo.cache().list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_block_count_mismatch_fails_batch() {
        let fixture = Fixture::new().await;
        fixture.add("a-1.0.tgz", "a-1.0", "pkgtools", 10);
        // A file the extractor has no answer for.
        std::fs::write(fixture.path("mystery-1.0.tgz"), b"??").unwrap();
        let stats = fixture.repo.resync().await.unwrap();
        assert_eq!(stats.extract.failed_batches, 1);
        assert_eq!(stats.extract.extracted, 0);
        assert_eq!(fixture.repo.cache().list_pending().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_vanished_files_are_skipped() {
        let fixture = Fixture::new().await;
        fixture.add("a-1.0.tgz", "a-1.0", "pkgtools", 10);
        fixture.add("b-2.0.tgz", "b-2.0", "shells", 10);
        fixture.repo.scan_directory().await.unwrap();
        std::fs::remove_file(fixture.path("a-1.0.tgz")).unwrap();
        let stats = fixture.repo.extract_pending().await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.extracted, 1);
        assert_eq!(fixture.source.batches(), vec![vec!["b-2.0.tgz".to_string()]]);
        let pending = fixture.repo.cache().list_pending().await.unwrap();
        assert_eq!(pending[0].filename, "a-1.0.tgz");
    }

    #[tokio::test]
    async fn test_unversioned_package_is_still_indexed() {
        let fixture = Fixture::new().await;
        fixture.add("oddball.tgz", "oddball", "misc", 10);
        fixture.repo.resync().await.unwrap();
        let artifact = fixture.repo.cache().get("oddball.tgz").await.unwrap().unwrap();
        assert!(!artifact.is_pending());
        assert_eq!(artifact.base_name(), None);
        assert_eq!(fixture.repo.list_artifacts(Some("misc")).await.unwrap(), vec!["oddball.tgz"]);
    }
}

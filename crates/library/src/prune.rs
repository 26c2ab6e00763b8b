//! Dropping superseded package versions.

use crate::error::{ErrorKind, Result};
use crate::{PRUNE_PAGE_SIZE, PackageRepository};
use exn::ResultExt;
use tracing::instrument;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub candidates: u64,
    pub removed: u64,
    pub failed: u64,
}

impl PackageRepository {
    /// Keep only the newest `retention` versions of each package.
    ///
    /// Packages are grouped by base name; in any group with more than
    /// `retention` distinct versions, records beyond the newest `retention`
    /// (by extraction time, ties broken by filename descending) are removed
    /// from the cache and from disk. At most [`PRUNE_PAGE_SIZE`] files are
    /// removed per call. A removal that fails is logged and counted, and
    /// does not stop the rest.
    #[instrument(skip(self), fields(repo = %self.id))]
    pub async fn prune(&self, retention: u32) -> Result<PruneStats> {
        if retention == 0 {
            exn::bail!(ErrorKind::Prune);
        }
        let candidates = self.cache.list_prune_candidates(retention, PRUNE_PAGE_SIZE).await.or_raise(|| ErrorKind::Prune)?;
        let mut stats = PruneStats {
            candidates: u64::try_from(candidates.len()).unwrap_or(u64::MAX),
            ..PruneStats::default()
        };
        for filename in &candidates {
            match self.remove_file_inner(filename).await {
                Ok(_) => {
                    stats.removed += 1;
                    tracing::info!(repo = %self.id, filename, "Pruned superseded package");
                },
                Err(error) => {
                    stats.failed += 1;
                    tracing::warn!(repo = %self.id, filename, error = ?error, "Could not prune package");
                },
            }
        }
        Ok(stats)
    }
}

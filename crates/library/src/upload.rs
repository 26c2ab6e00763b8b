//! Accepting package files pushed by a build host.

use crate::error::{ErrorKind, Result};
use crate::reconcile::error::ErrorKind as ReconcileErrorKind;
use crate::{ExtractStats, PackageRepository, PruneStats, RegisterOutcome, Registration};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub registration: Registration,
    pub extract: ExtractStats,
    /// Only when the repository has a retention count.
    pub prune: Option<PruneStats>,
}

impl PackageRepository {
    fn authorize(&self, token: Option<&str>) -> Result<()> {
        match (self.auth_token.as_deref(), token) {
            (Some(expected), Some(given)) if expected == given => Ok(()),
            _ => exn::bail!(ErrorKind::Unauthorized),
        }
    }

    /// Move an uploaded file into the repository and index it.
    ///
    /// `staged` is where the upload was written; `original_filename` is the
    /// name the client gave it, which must be a plain package filename. Any
    /// existing record under that name is dropped and the file replaced.
    /// The new file is then registered and extracted, and superseded
    /// versions pruned if a retention count is configured.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::Unauthorized`] if `token` does not match the configured
    /// secret, or no secret is configured. Nothing is touched in that case,
    /// not even the staged file.
    ///
    /// On a dry-run cache the upload is authorized and validated, then
    /// reported as if registered, while the staged file, the repository and
    /// the cache are left as they were.
    #[instrument(skip(self, token), fields(repo = %self.id, staged = %staged.display()))]
    pub async fn accept_upload(
        &self,
        token: Option<&str>,
        staged: &Path,
        original_filename: &str,
    ) -> Result<UploadOutcome> {
        if let Err(error) = self.authorize(token) {
            tracing::warn!(repo = %self.id, filename = original_filename, "Rejected unauthorized upload");
            return Err(error);
        }
        let filename = pkgrepo_storage::validate_filename(original_filename)
            .or_raise(|| ReconcileErrorKind::Storage)
            .or_raise(|| ErrorKind::Upload)?;
        if !self.dir.is_artifact(&filename) {
            let error = exn::Exn::from(pkgrepo_storage::error::ErrorKind::NotAnArtifact(PathBuf::from(&filename)));
            return Err(error.raise(ReconcileErrorKind::Storage).raise(ErrorKind::Upload));
        }

        if self.cache.is_dry_run() {
            let size = tokio::fs::metadata(staged).await.or_raise(|| ErrorKind::Upload)?.len();
            tracing::info!(repo = %self.id, filename, size, "Dry run; upload not installed");
            return Ok(UploadOutcome {
                registration: Registration { filename, size, outcome: RegisterOutcome::Registered },
                extract: ExtractStats::default(),
                prune: None,
            });
        }
        if self.cache.delete(&filename).await.or_raise(|| ErrorKind::Upload)? {
            tracing::info!(repo = %self.id, filename, "Replacing existing package file");
        }
        self.dir.install(staged, &filename).await.or_raise(|| ErrorKind::Upload)?;
        let registration = self.register_file_inner(&filename).await.or_raise(|| ErrorKind::Upload)?;
        let extract = self.extract_pending().await.or_raise(|| ErrorKind::Upload)?;
        let prune = match self.retention {
            Some(retention) => Some(self.prune(retention).await.or_raise(|| ErrorKind::Upload)?),
            None => None,
        };
        tracing::info!(repo = %self.id, filename, size = registration.size, "Accepted upload");
        Ok(UploadOutcome { registration, extract, prune })
    }
}

use crate::PackageRepository;
use crate::error::{ErrorKind as LibraryErrorKind, Result as LibraryResult};
use crate::reconcile::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::Path;
use tracing::instrument;

/// What registering a file did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Already known at this exact size; nothing was written.
    Unchanged,
    /// First time this filename was seen; a pending record was created.
    Registered,
    /// Known under a different size. The old metadata and categories were
    /// discarded and the record is pending again.
    Invalidated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub filename: String,
    pub size: u64,
    pub outcome: RegisterOutcome,
}

impl PackageRepository {
    /// Register a package file with the cache.
    ///
    /// Only the final path component is used: the file is looked up by name
    /// in the repository directory. Registering the same filename from
    /// several tasks at once is safe; each registration is one transaction
    /// and the last to commit wins.
    pub async fn register_file(&self, path: impl AsRef<Path>) -> LibraryResult<Registration> {
        let path = path.as_ref();
        let filename = pkgrepo_storage::validate_filename(path.file_name().unwrap_or(path.as_os_str()))
            .or_raise(|| ErrorKind::Storage)
            .or_raise(|| LibraryErrorKind::Register)?;
        self.register_file_inner(&filename).await.or_raise(|| LibraryErrorKind::Register)
    }

    #[instrument(level = "debug", skip(self), fields(repo = %self.id))]
    pub(crate) async fn register_file_inner(&self, filename: &str) -> Result<Registration> {
        let file = self.dir.stat(filename).await.or_raise(|| ErrorKind::Storage)?;
        let existing = self.cache.get(filename).await.or_raise(|| ErrorKind::Cache)?;
        let outcome = match existing {
            Some(artifact) if artifact.size == file.size => RegisterOutcome::Unchanged,
            Some(artifact) => {
                self.cache.register_pending(filename, file.size).await.or_raise(|| ErrorKind::Cache)?;
                tracing::info!(
                    repo = %self.id,
                    filename,
                    old_size = artifact.size,
                    new_size = file.size,
                    "Package file changed on disk; metadata invalidated"
                );
                RegisterOutcome::Invalidated
            },
            None => {
                self.cache.register_pending(filename, file.size).await.or_raise(|| ErrorKind::Cache)?;
                tracing::info!(repo = %self.id, filename, size = file.size, "Registered new package file");
                RegisterOutcome::Registered
            },
        };
        Ok(Registration {
            filename: file.filename,
            size: file.size,
            outcome,
        })
    }

    /// Forget a package file and delete it from disk.
    ///
    /// The cache record (and with it the file's categories) goes first, then
    /// the file itself. A file that is already gone is fine. Returns whether
    /// there was a record to remove.
    pub async fn remove_file(&self, filename: &str) -> LibraryResult<bool> {
        self.remove_file_inner(filename).await.or_raise(|| LibraryErrorKind::Remove)
    }

    #[instrument(level = "debug", skip(self), fields(repo = %self.id))]
    pub(crate) async fn remove_file_inner(&self, filename: &str) -> Result<bool> {
        pkgrepo_storage::validate_filename(filename).or_raise(|| ErrorKind::Storage)?;
        let removed = self.cache.delete(filename).await.or_raise(|| ErrorKind::Cache)?;
        if self.cache.is_dry_run() {
            return Ok(removed);
        }
        match self.dir.delete(filename).await {
            Ok(true) => tracing::info!(repo = %self.id, filename, "Removed package file"),
            Ok(false) => tracing::debug!(repo = %self.id, filename, "Package file already gone from disk"),
            Err(error) => tracing::warn!(repo = %self.id, filename, error = ?error, "Could not delete package file"),
        }
        Ok(removed)
    }
}

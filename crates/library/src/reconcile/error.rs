//! Error types for the [`reconcile`](super) module.

use derive_more::{Display, Error};

/// A reconcile error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for reconcile operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a reconcile failure.
///
/// Each variant identifies the subsystem that failed, allowing callers to
/// inspect the error tree without matching on opaque strings.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A cache lookup or update via [`pkgrepo_cache::Repository`] failed.
    Cache,
    /// A repository directory operation (list, stat, delete, install) failed.
    Storage,
    /// The metadata extractor failed for a whole batch.
    Extract,
    /// An external command (the mirroring collaborator) could not be run.
    Command,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cache | Self::Storage | Self::Extract)
    }
}

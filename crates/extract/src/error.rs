//! Extraction Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// An extraction error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Every variant fails the whole batch it occurred in; nothing is partially
/// attributed.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The extractor executable could not be located.
    #[display("metadata extractor not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The extractor process could not be started or its output collected.
    #[display("failed to run metadata extractor")]
    Spawn,
    /// The extractor exited unsuccessfully. `None` when killed by a signal.
    #[display("metadata extractor exited with code: {_0:?}")]
    ExtractorFailed(#[error(not(source))] Option<i32>),
    /// A line of output was not a `KEY=value` pair.
    #[display("malformed metadata line: {_0}")]
    MalformedOutput(#[error(not(source))] String),
    /// The number of metadata blocks did not match the number of paths
    /// passed in, so blocks cannot be attributed to files.
    #[display("expected {expected} metadata blocks, found {found}")]
    BlockCountMismatch { expected: usize, found: usize },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Spawn | Self::ExtractorFailed(_))
    }
}

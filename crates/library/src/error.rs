//! Library Error Types
//!
//! Each public operation raises its own kind; the error tree underneath says
//! which dependency (cache, directory, extractor) actually failed.

use derive_more::{Display, Error};

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("could not register package file")]
    Register,
    #[display("could not scan repository directory")]
    Scan,
    #[display("could not resync repository")]
    Resync,
    #[display("could not remove package file")]
    Remove,
    #[display("could not prune superseded versions")]
    Prune,
    #[display("could not query category index")]
    Index,
    #[display("could not build package summary")]
    Summary,
    #[display("could not accept upload")]
    Upload,
    /// The upload token was missing or wrong. Nothing was changed.
    #[display("not authorized")]
    Unauthorized,
    #[display("could not mirror upstream")]
    Mirror,
    #[display("invalid path")]
    Path,
    #[display("could not read repository statistics")]
    Stats,
}


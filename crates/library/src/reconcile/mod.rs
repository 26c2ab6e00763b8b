//! Keeping the cache in line with the repository directory.
//!
//! The directory is authoritative for which files exist and how big they
//! are; the cache is authoritative for what has been extracted from them.
//! Reconciling is two phases:
//!
//! 1. [`scan`] registers every package file in the directory. Files the
//!    cache already knows at the same size are left alone; anything new or
//!    resized becomes *pending*.
//! 2. [`PackageRepository::extract_pending`](crate::PackageRepository::extract_pending)
//!    runs the extractor over pending files in batches, one batch at a time.
//!
//! [`PackageRepository::resync`](crate::PackageRepository::resync) does both.
//! Running it twice without touching the directory does nothing the second
//! time: no extractor invocations, no cache writes.

pub mod error;
mod file;
mod resync;
mod stream;

pub use self::file::{RegisterOutcome, Registration};
pub use self::resync::{ExtractStats, ResyncStats};
pub use self::stream::{ScanEvent, ScanStats, scan};

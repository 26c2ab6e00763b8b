//! Where package metadata comes from.
//!
//! Extraction is delegated to an external capability; the default is the
//! pkgsrc `pkg_info -X` command. The [`MetadataSource`] trait is the seam
//! between the reconciler and that capability.

#[cfg(feature = "mock")]
mod mock;
mod pkg_info;

#[cfg(feature = "mock")]
pub use self::mock::MockSource;
pub use self::pkg_info::PkgInfo;
use crate::error::Result;
use crate::models::PackageInfo;
use async_trait::async_trait;
use std::path::PathBuf;

/// Batched metadata extraction.
///
/// Implementations must return exactly one [`PackageInfo`] per input path,
/// in input order, or fail the batch as a whole.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Extract metadata for every path in a single invocation.
    async fn extract(&self, paths: &[PathBuf]) -> Result<Vec<PackageInfo>>;
}

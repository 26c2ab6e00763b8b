//! Category queries over fresh records.
//!
//! Pending records have no categories yet, so they never show up here
//! until extraction completes.

use crate::PackageRepository;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;

/// Pseudo-category holding every package, matching the pkgsrc `All/`
/// directory.
pub const ALL_CATEGORY: &str = "All";

impl PackageRepository {
    /// Every category label in use, sorted.
    pub async fn list_categories(&self) -> Result<Vec<String>> {
        self.cache.list_categories().await.or_raise(|| ErrorKind::Index)
    }

    /// Filenames in `category`, sorted.
    ///
    /// [`ALL_CATEGORY`] or no category at all lists every fresh package. An
    /// unknown category is simply empty.
    pub async fn list_artifacts(&self, category: Option<&str>) -> Result<Vec<String>> {
        match category {
            None | Some(ALL_CATEGORY) => self.cache.list_filenames().await,
            Some(category) => self.cache.list_filenames_for_category(category).await,
        }
        .or_raise(|| ErrorKind::Index)
    }
}

use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use pkgrepo_extract::models::PackageName;
use time::UtcDateTime;

/// Everything the cache knows about one package file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Basename of the package file; unique within a repository.
    pub filename: String,
    /// Size in bytes as last observed on disk.
    pub size: u64,
    /// `None` while pending, or if the metadata had no `PKGNAME`.
    pub package: Option<PackageName>,
    pub categories: Vec<String>,
    /// Metadata block exactly as the extractor produced it. Empty while
    /// pending.
    pub raw_info: String,
    /// When extraction last completed.
    pub updated_at: Option<UtcDateTime>,
}
impl Artifact {
    pub fn is_pending(&self) -> bool {
        self.raw_info.is_empty()
    }

    pub fn base_name(&self) -> Option<&str> {
        self.package.as_ref().and_then(|p| p.base.as_deref())
    }

    pub fn version(&self) -> Option<&str> {
        self.package.as_ref().and_then(|p| p.version.as_deref())
    }
}

/// A filename/size pair still waiting on metadata extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingArtifact {
    pub filename: String,
    pub size: u64,
}

/// Record counts for a repository cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total: u64,
    pub pending: u64,
    pub fresh: u64,
    pub categories: u64,
}

#[derive(sqlx::FromRow)]
pub(crate) struct ArtifactRow {
    pub(crate) filename: String,
    pub(crate) file_size: i64,
    // Base and version are stored alongside for the prune query, but are
    // rebuilt from the full identifier when reading.
    pub(crate) pkg_name: Option<String>,
    pub(crate) raw_info: String,
    pub(crate) updated_at: Option<i64>,
}
impl ArtifactRow {
    /// Convert to the public model; categories are stored in their own table
    /// and fetched separately.
    pub(crate) fn into_artifact(self, categories: Vec<String>) -> Result<Artifact, Error> {
        Ok(Artifact {
            filename: self.filename,
            size: u64::try_from(self.file_size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            package: self.pkg_name.map(PackageName::new),
            categories,
            raw_info: self.raw_info,
            updated_at: self
                .updated_at
                .map(UtcDateTime::from_unix_timestamp)
                .transpose()
                .or_raise(|| ErrorKind::InvalidData("update timestamp"))?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct PendingRow {
    filename: String,
    file_size: i64,
}
impl TryFrom<PendingRow> for PendingArtifact {
    type Error = Error;
    fn try_from(row: PendingRow) -> Result<Self, Self::Error> {
        Ok(Self {
            filename: row.filename,
            size: u64::try_from(row.file_size).or_raise(|| ErrorKind::InvalidData("file size"))?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct StatsRow {
    total: i64,
    pending: i64,
    categories: i64,
}
impl TryFrom<StatsRow> for StoreStats {
    type Error = Error;
    fn try_from(row: StatsRow) -> Result<Self, Self::Error> {
        let total = u64::try_from(row.total).or_raise(|| ErrorKind::InvalidData("artifact count"))?;
        let pending = u64::try_from(row.pending).or_raise(|| ErrorKind::InvalidData("pending count"))?;
        Ok(Self {
            total,
            pending,
            fresh: total.saturating_sub(pending),
            categories: u64::try_from(row.categories).or_raise(|| ErrorKind::InvalidData("category count"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pkg_name: Option<&str>, raw_info: &str, updated_at: Option<i64>) -> ArtifactRow {
        ArtifactRow {
            filename: "bash-5.2.21.tgz".to_string(),
            file_size: 1024,
            pkg_name: pkg_name.map(str::to_string),
            raw_info: raw_info.to_string(),
            updated_at,
        }
    }

    #[test]
    fn test_pending_row_to_model() {
        let model = row(None, "", None).into_artifact(Vec::new()).unwrap();
        assert!(model.is_pending());
        assert_eq!(model.size, 1024);
        assert_eq!(model.base_name(), None);
        assert_eq!(model.updated_at, None);
    }

    #[test]
    fn test_fresh_row_to_model() {
        let now = UtcDateTime::now();
        let model = row(Some("bash-5.2.21"), "PKGNAME=bash-5.2.21\n", Some(now.unix_timestamp()))
            .into_artifact(vec!["shells".to_string()])
            .unwrap();
        assert!(!model.is_pending());
        assert_eq!(model.base_name(), Some("bash"));
        assert_eq!(model.version(), Some("5.2.21"));
        // Converting to a Unix timestamp (measured in seconds) inherently strips the nanoseconds component.
        assert_eq!(model.updated_at, Some(now.replace_nanosecond(0).unwrap()));
    }

    #[test]
    fn test_negative_size_is_invalid() {
        let mut bad = row(None, "", None);
        bad.file_size = -1;
        let err = bad.into_artifact(Vec::new()).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData("file size"));
    }

    #[test]
    fn test_stats_derive_fresh_count() {
        let stats = StoreStats::try_from(StatsRow { total: 5, pending: 2, categories: 3 }).unwrap();
        assert_eq!(stats, StoreStats { total: 5, pending: 2, fresh: 3, categories: 3 });
    }
}

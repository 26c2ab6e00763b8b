use super::PackageName;

/// Metadata extracted for a single artifact.
///
/// Only the fields the repository indexes on are parsed out; everything else
/// lives on, untouched, in [`raw`](Self::raw).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    /// From the `PKGNAME` field. `None` if the block had no such field.
    pub name: Option<PackageName>,
    /// From the `CATEGORIES` field, in reported order with duplicates dropped.
    pub categories: Vec<String>,
    /// The complete block, one `KEY=value` per line, each line terminated by
    /// a newline. Never empty for a parsed block.
    pub raw: String,
}
impl PackageInfo {
    pub fn base_name(&self) -> Option<&str> {
        self.name.as_ref().and_then(|n| n.base.as_deref())
    }

    pub fn version(&self) -> Option<&str> {
        self.name.as_ref().and_then(|n| n.version.as_deref())
    }
}

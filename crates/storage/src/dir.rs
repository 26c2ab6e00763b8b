//! The repository directory itself.
//!
//! Files are addressed by bare filename only; the repository is flat (the
//! pkgsrc `All/` layout), so there is nothing to walk below the root.

use crate::error::{ErrorKind, Result};
use crate::path::validate_filename;
use async_stream::stream;
use futures::{Stream, TryStreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs::{self, DirEntry};
use tracing::instrument;

/// Package suffixes recognised when no list is configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &["tgz", "tbz", "tlz", "txz"];
/// Generated summary files share the repository directory but are never
/// artifacts themselves.
const SUMMARY_STEM: &str = "pkg_summary.";

pub type ArtifactStream<'a> = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'a>>;

/// A package file as observed on disk right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    /// Basename; the cache key.
    pub filename: String,
    /// Absolute path inside the repository directory.
    pub path: PathBuf,
    /// Size in bytes at the time of the stat.
    pub size: u64,
}

/// A flat directory of package artifacts.
///
/// # Examples
///
/// ```no_run
/// use pkgrepo_storage::RepoDir;
///
/// # async fn example() -> pkgrepo_storage::error::Result<()> {
/// let repo = RepoDir::new("/srv/pkgsrc/packages/All")?;
/// for filename in repo.list().await? {
///     let file = repo.stat(&filename).await?;
///     println!("{} ({} bytes)", file.filename, file.size);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RepoDir {
    root: PathBuf,
    extensions: Vec<String>,
}
impl RepoDir {
    /// Open (creating if needed) a repository directory.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidPath`] if `root` is relative or names
    /// something other than a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Only ever happens once at startup; not worth an async constructor.
            std::fs::create_dir_all(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self {
            root,
            extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
        })
    }

    /// Replace the recognised package extensions (leading dots are ignored).
    pub fn with_extensions(mut self, extensions: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a filename is a package artifact: it carries a recognised
    /// extension and is not one of the generated `pkg_summary.*` files.
    pub fn is_artifact(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        if lower.starts_with(SUMMARY_STEM) {
            return false;
        }
        self.extensions.iter().any(|ext| {
            lower.len() > ext.len() + 1 && lower.ends_with(ext.as_str()) && lower[..lower.len() - ext.len()].ends_with('.')
        })
    }

    /// Resolve a filename to its absolute location in the repository.
    ///
    /// Anything that isn't a plain filename (separators, `..`, null bytes)
    /// is rejected so that request input can be passed straight through.
    pub fn path_for_filename(&self, filename: impl AsRef<Path>) -> Result<PathBuf> {
        Ok(self.root.join(validate_filename(filename)?))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    async fn process_entry(&self, entry: DirEntry) -> Result<Option<String>> {
        let path = entry.path();
        let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!(path = %path.display(), "Skipping non UTF-8 filename");
            return Ok(None);
        };
        if !self.is_artifact(&filename) {
            return Ok(None);
        }
        // Follows symlinks; a dangling link is silently dropped below.
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(filename)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => exn::bail!(Self::map_io_error(e, &path)),
        }
    }

    /// Stream the filenames of every artifact in the directory, in
    /// filesystem order. Unreadable entries are yielded as errors without
    /// ending the stream.
    pub fn list_stream(&self) -> ArtifactStream<'_> {
        Box::pin(stream! {
            let mut entries = match fs::read_dir(&self.root).await {
                Ok(entries) => entries,
                Err(e) => {
                    yield Err(exn::Exn::from(Self::map_io_error(e, &self.root)));
                    return;
                },
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &self.root))); continue; },
                };
                match self.process_entry(entry).await {
                    Ok(Some(filename)) => yield Ok(filename),
                    Ok(None) => {},
                    Err(e) => yield Err(e),
                }
            }
        })
    }

    /// Every artifact filename, sorted. Fails on the first unreadable entry.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut filenames: Vec<String> = self.list_stream().try_collect().await?;
        filenames.sort();
        Ok(filenames)
    }

    #[instrument(level = "trace", skip(self))]
    pub async fn stat(&self, filename: &str) -> Result<ArtifactFile> {
        let path = self.path_for_filename(filename)?;
        let metadata = fs::metadata(&path).await.map_err(|e| Self::map_io_error(e, &path))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotAnArtifact(path));
        }
        Ok(ArtifactFile {
            filename: filename.to_string(),
            path,
            size: metadata.len(),
        })
    }

    pub async fn exists(&self, filename: &str) -> Result<bool> {
        let path = self.path_for_filename(filename)?;
        Ok(fs::try_exists(&path).await.map_err(ErrorKind::Io)?)
    }

    /// Delete an artifact. Returns `false` when there was nothing to delete.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete(&self, filename: &str) -> Result<bool> {
        let path = self.path_for_filename(filename)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => exn::bail!(Self::map_io_error(e, &path)),
        }
    }

    /// Move a staged file (e.g. a finished upload) into the repository under
    /// `filename`, replacing whatever was there.
    ///
    /// Renames when possible; staging directories on another filesystem fall
    /// back to copy-then-remove.
    #[instrument(level = "debug", skip(self), fields(staged = %staged.display()))]
    pub async fn install(&self, staged: &Path, filename: &str) -> Result<ArtifactFile> {
        if !self.is_artifact(filename) {
            exn::bail!(ErrorKind::NotAnArtifact(PathBuf::from(filename)));
        }
        let target = self.path_for_filename(filename)?;
        match fs::rename(staged, &target).await {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                fs::copy(staged, &target).await.map_err(|e| Self::map_io_error(e, &target))?;
                fs::remove_file(staged).await.map_err(|e| Self::map_io_error(e, staged))?;
            },
            Err(e) => exn::bail!(Self::map_io_error(e, staged)),
        }
        self.stat(filename).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn repo() -> (tempfile::TempDir, RepoDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let repo = RepoDir::new(temp_dir.path()).unwrap();
        (temp_dir, repo)
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(RepoDir::new(temp_dir.path()).is_ok());
        assert!(RepoDir::new("relative/path").is_err());
    }

    #[test]
    fn test_new_creates_missing_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("packages/All");
        RepoDir::new(&root).unwrap();
        assert!(root.is_dir());
    }

    #[rstest]
    #[case("bash-5.2.tgz", true)]
    #[case("BASH-5.2.TGZ", true)]
    #[case("xz-5.4.txz", true)]
    #[case("pkg_summary.gz", false)]
    #[case("pkg_summary.bz2", false)]
    #[case("pkg_summary.tgz", false)]
    #[case("README", false)]
    #[case(".tgz", false)]
    #[case("notes.tgz.txt", false)]
    #[case("faketgz", false)]
    fn test_is_artifact(#[case] filename: &str, #[case] expected: bool) {
        let (_dir, repo) = repo();
        assert_eq!(repo.is_artifact(filename), expected);
    }

    #[test]
    fn test_custom_extensions() {
        let (_dir, repo) = repo();
        let repo = repo.with_extensions([".tar.gz", "deb"]);
        assert!(repo.is_artifact("foo-1.0.tar.gz"));
        assert!(repo.is_artifact("foo_1.0_amd64.deb"));
        assert!(!repo.is_artifact("foo-1.0.tgz"));
    }

    #[test]
    fn test_path_for_filename() {
        let (dir, repo) = repo();
        assert_eq!(repo.path_for_filename("zsh-5.9.tgz").unwrap(), dir.path().join("zsh-5.9.tgz"));
        assert!(repo.path_for_filename("../zsh-5.9.tgz").is_err());
        assert!(repo.path_for_filename("sub/zsh-5.9.tgz").is_err());
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let (dir, repo) = repo();
        for name in ["zsh-5.9.tgz", "bash-5.2.tgz", "pkg_summary.gz", "README"] {
            std::fs::write(dir.path().join(name), b"data").unwrap();
        }
        std::fs::create_dir(dir.path().join("subdir.tgz")).unwrap();
        assert_eq!(repo.list().await.unwrap(), vec!["bash-5.2.tgz", "zsh-5.9.tgz"]);
    }

    #[tokio::test]
    async fn test_stat() {
        let (dir, repo) = repo();
        std::fs::write(dir.path().join("bash-5.2.tgz"), b"Hello, world!").unwrap();
        let file = repo.stat("bash-5.2.tgz").await.unwrap();
        assert_eq!(file.size, 13);
        assert_eq!(file.path, dir.path().join("bash-5.2.tgz"));
        let err = repo.stat("missing-1.0.tgz").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (dir, repo) = repo();
        std::fs::write(dir.path().join("bash-5.2.tgz"), b"data").unwrap();
        assert!(repo.delete("bash-5.2.tgz").await.unwrap());
        assert!(!repo.exists("bash-5.2.tgz").await.unwrap());
        assert!(!repo.delete("bash-5.2.tgz").await.unwrap());
    }

    #[tokio::test]
    async fn test_install_moves_staged_file() {
        let (_dir, repo) = repo();
        let staging = tempfile::tempdir().unwrap();
        let staged = staging.path().join("upload-0001");
        std::fs::write(&staged, b"package bytes").unwrap();
        let file = repo.install(&staged, "bash-5.2.tgz").await.unwrap();
        assert_eq!(file.size, 13);
        assert!(!staged.exists());
        assert!(repo.exists("bash-5.2.tgz").await.unwrap());
    }

    #[tokio::test]
    async fn test_install_rejects_non_artifacts() {
        let (_dir, repo) = repo();
        let staging = tempfile::tempdir().unwrap();
        let staged = staging.path().join("upload-0002");
        std::fs::write(&staged, b"data").unwrap();
        assert!(repo.install(&staged, "pkg_summary.gz").await.is_err());
        assert!(repo.install(&staged, "../escape.tgz").await.is_err());
        assert!(staged.exists());
    }
}

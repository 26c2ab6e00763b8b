//! Pulling package files from an upstream repository.
//!
//! The transfer itself is delegated to an external command (`rsync` by
//! default) invoked as `<command> <args...> <upstream> <repository dir>/`.
//! Whatever the transfer does, a resync follows, so files that made it
//! across are indexed and files it removed are noticed.

use crate::error::{ErrorKind, Result};
use crate::reconcile::error::{ErrorKind as ReconcileErrorKind, Result as ReconcileResult};
use crate::{PackageRepository, ResyncStats};
use exn::ResultExt;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::instrument;

const DEFAULT_COMMAND: &str = "rsync";
const DEFAULT_ARGS: &[&str] = &["-irz", "--size-only"];

#[derive(Debug, Clone)]
pub struct Mirror {
    command: PathBuf,
    args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorStats {
    /// Whether the transfer command ran and exited successfully. `false`
    /// when there was no upstream to mirror from.
    pub transferred: bool,
    pub resync: ResyncStats,
}

impl Default for Mirror {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND, DEFAULT_ARGS.iter().copied())
    }
}

impl Mirror {
    pub fn new(command: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Destination argument: the repository directory with a trailing
    /// separator, so that rsync copies the contents of `upstream` into it.
    fn destination(root: &Path) -> OsString {
        let mut destination = root.as_os_str().to_os_string();
        if !destination.to_string_lossy().ends_with(std::path::MAIN_SEPARATOR) {
            destination.push(std::path::MAIN_SEPARATOR_STR);
        }
        destination
    }

    async fn transfer(&self, upstream: &str, root: &Path) -> ReconcileResult<bool> {
        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(upstream)
            .arg(Self::destination(root))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .or_raise(|| ReconcileErrorKind::Command)?;
        let changes = String::from_utf8_lossy(&output.stdout).lines().filter(|l| !l.trim().is_empty()).count();
        if output.status.success() {
            tracing::info!(upstream, changes, "Mirror transfer complete");
            return Ok(true);
        }
        tracing::error!(
            upstream,
            code = ?output.status.code(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "Mirror command exited with non-zero status"
        );
        Ok(false)
    }

    /// Mirror `upstream` into `repo`'s directory, then resync `repo`.
    ///
    /// A transfer that fails to start or exits unsuccessfully is logged; the
    /// resync runs regardless. Only a failing resync is an error. A dry-run
    /// repository skips the transfer.
    #[instrument(skip(self, repo), fields(repo = %repo.id(), command = %self.command.display()))]
    pub async fn run(&self, repo: &PackageRepository, upstream: Option<&str>) -> Result<MirrorStats> {
        let transferred = match upstream.filter(|u| !u.is_empty()) {
            Some(upstream) if repo.cache().is_dry_run() => {
                tracing::info!(repo = %repo.id(), upstream, "Dry run; mirror transfer skipped");
                false
            },
            Some(upstream) => match self.transfer(upstream, repo.dir().root()).await {
                Ok(success) => success,
                Err(error) => {
                    tracing::error!(repo = %repo.id(), upstream, error = ?error, "Could not run mirror command");
                    false
                },
            },
            None => {
                tracing::debug!(repo = %repo.id(), "No upstream configured; resyncing only");
                false
            },
        };
        let resync = repo.resync().await.or_raise(|| ErrorKind::Mirror)?;
        Ok(MirrorStats { transferred, resync })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn test_destination_has_trailing_separator() {
        assert_eq!(Mirror::destination(Path::new("/srv/All")), OsString::from("/srv/All/"));
        assert_eq!(Mirror::destination(Path::new("/srv/All/")), OsString::from("/srv/All/"));
    }

    #[tokio::test]
    async fn test_mirror_then_resync() {
        let fixture = Fixture::new().await;
        let upstream = tempfile::tempdir().unwrap();
        std::fs::write(upstream.path().join("zsh-5.9.tgz"), b"zsh").unwrap();
        fixture.source.insert("zsh-5.9.tgz", "PKGNAME=zsh-5.9\nCATEGORIES=shells\n");
        // Stand-in for rsync: copy everything from $0 into $1.
        let mirror = Mirror::new("/bin/sh", ["-c", r#"cp "$0"/* "$1""#]);
        let stats = mirror.run(&fixture.repo, upstream.path().to_str()).await.unwrap();
        assert!(stats.transferred);
        assert_eq!(stats.resync.scan.registered, 1);
        assert_eq!(stats.resync.extract.extracted, 1);
        assert_eq!(fixture.repo.list_artifacts(Some("shells")).await.unwrap(), vec!["zsh-5.9.tgz"]);
    }

    #[tokio::test]
    async fn test_failed_transfer_still_resyncs() {
        let fixture = Fixture::new().await;
        fixture.add("a-1.0.tgz", "a-1.0", "pkgtools", 10);
        let mirror = Mirror::new("/bin/sh", ["-c", "exit 23"]);
        let stats = mirror.run(&fixture.repo, Some("rsync://example.invalid/All/")).await.unwrap();
        assert!(!stats.transferred);
        assert_eq!(stats.resync.extract.extracted, 1);
    }

    #[tokio::test]
    async fn test_missing_command_still_resyncs() {
        let fixture = Fixture::new().await;
        fixture.add("a-1.0.tgz", "a-1.0", "pkgtools", 10);
        let mirror = Mirror::new("/nonexistent/rsync", DEFAULT_ARGS.iter().copied());
        let stats = mirror.run(&fixture.repo, Some("rsync://example.invalid/All/")).await.unwrap();
        assert!(!stats.transferred);
        assert_eq!(stats.resync.scan.registered, 1);
    }

    #[tokio::test]
    async fn test_dry_run_skips_transfer() {
        let fixture = Fixture::with_dry_run(true).await;
        let upstream = tempfile::tempdir().unwrap();
        std::fs::write(upstream.path().join("zsh-5.9.tgz"), b"zsh").unwrap();
        let mirror = Mirror::new("/bin/sh", ["-c", r#"cp "$0"/* "$1""#]);
        let stats = mirror.run(&fixture.repo, upstream.path().to_str()).await.unwrap();
        assert!(!stats.transferred);
        assert!(!fixture.path("zsh-5.9.tgz").exists());
    }

    #[tokio::test]
    async fn test_no_upstream_only_resyncs() {
        let fixture = Fixture::new().await;
        fixture.add("a-1.0.tgz", "a-1.0", "pkgtools", 10);
        let stats = Mirror::default().run(&fixture.repo, None).await.unwrap();
        assert!(!stats.transferred);
        assert_eq!(stats.resync.scan.registered, 1);
    }
}

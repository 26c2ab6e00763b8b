use crate::error::{ErrorKind, Result};
use crate::models::PackageInfo;
use crate::parse::parse;
use crate::source::MetadataSource;
use async_trait::async_trait;
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::instrument;

const DEFAULT_PROGRAM: &str = "pkg_info";
const DEFAULT_ARGS: &[&str] = &["-X"];

/// Runs an external `pkg_info`-compatible command over a batch of package
/// files and parses its summary output.
///
/// The command line is `<program> <args...> <paths...>`.
#[derive(Debug, Clone)]
pub struct PkgInfo {
    program: PathBuf,
    args: Vec<String>,
}
impl PkgInfo {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Locate `pkg_info` on `PATH` and use it with `-X`.
    pub fn discover() -> Result<Self> {
        match which::which(DEFAULT_PROGRAM) {
            Ok(program) => {
                tracing::debug!(program = %program.display(), "Discovered metadata extractor");
                Ok(Self::new(program, DEFAULT_ARGS.iter().copied()))
            },
            Err(_) => exn::bail!(ErrorKind::NotFound(DEFAULT_PROGRAM.to_string())),
        }
    }

    /// Resolve a configured program (bare names are looked up on `PATH`),
    /// falling back to [`discover`](Self::discover) when none is configured.
    pub fn from_config(program: Option<&Path>, args: Option<&[String]>) -> Result<Self> {
        let Some(program) = program else {
            let discovered = Self::discover()?;
            return Ok(match args {
                Some(args) => Self::new(discovered.program, args.iter().cloned()),
                None => discovered,
            });
        };
        let resolved = which::which(program)
            .or_raise(|| ErrorKind::NotFound(program.display().to_string()))?;
        Ok(match args {
            Some(args) => Self::new(resolved, args.iter().cloned()),
            None => Self::new(resolved, DEFAULT_ARGS.iter().copied()),
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl MetadataSource for PkgInfo {
    fn name(&self) -> &str {
        DEFAULT_PROGRAM
    }

    #[instrument(skip(self, paths), fields(program = %self.program.display(), batch_size = paths.len()))]
    async fn extract(&self, paths: &[PathBuf]) -> Result<Vec<PackageInfo>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let output = Command::new(&self.program)
            .args(&self.args)
            .args(paths)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .or_raise(|| ErrorKind::Spawn)?;
        if !output.status.success() {
            tracing::warn!(
                code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Metadata extractor exited unsuccessfully"
            );
            exn::bail!(ErrorKind::ExtractorFailed(output.status.code()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse(&stdout, paths.len())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> PkgInfo {
        PkgInfo::new("/bin/sh", ["-c", script, "extractor"])
    }

    #[tokio::test]
    async fn test_one_block_per_path() {
        // Echo a block per argument, like `pkg_info -X` does.
        let source = sh(r#"for f in "$@"; do n=$(basename "$f" .tgz); printf 'PKGNAME=%s\nCATEGORIES=misc\n\n' "$n"; done"#);
        let paths = vec![PathBuf::from("/repo/a-1.0.tgz"), PathBuf::from("/repo/b-2.0.tgz")];
        let infos = source.extract(&paths).await.unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].name.as_ref().unwrap().full, "a-1.0");
        assert_eq!(infos[1].base_name(), Some("b"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_batch() {
        let source = sh("echo 'pkg_info: cannot open' >&2; exit 2");
        let err = source.extract(&[PathBuf::from("/repo/a-1.0.tgz")]).await.unwrap_err();
        assert_eq!(*err, ErrorKind::ExtractorFailed(Some(2)));
    }

    #[tokio::test]
    async fn test_short_output_fails_batch() {
        let source = sh("printf 'PKGNAME=a-1.0\\n'");
        let paths = vec![PathBuf::from("/repo/a-1.0.tgz"), PathBuf::from("/repo/b-2.0.tgz")];
        let err = source.extract(&paths).await.unwrap_err();
        assert_eq!(*err, ErrorKind::BlockCountMismatch { expected: 2, found: 1 });
    }

    #[tokio::test]
    async fn test_missing_program() {
        let source = PkgInfo::new("/nonexistent/pkg_info", ["-X"]);
        let err = source.extract(&[PathBuf::from("/repo/a-1.0.tgz")]).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Spawn);
    }

    #[tokio::test]
    async fn test_empty_batch_does_not_spawn() {
        let source = PkgInfo::new("/nonexistent/pkg_info", ["-X"]);
        assert!(source.extract(&[]).await.unwrap().is_empty());
    }
}

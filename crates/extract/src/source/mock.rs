//! In-process metadata source for testing.

use crate::error::{ErrorKind, Result};
use crate::models::PackageInfo;
use crate::parse::parse;
use crate::source::MetadataSource;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Metadata source that answers from a table of canned blocks, keyed by
/// filename.
///
/// The canned blocks are joined into extractor-style output and then run
/// through the real parser, so a path without a block produces the same
/// block-count failure a misbehaving `pkg_info` would.
///
/// # Examples
///
/// ```
/// use pkgrepo_extract::source::{MetadataSource, MockSource};
/// use std::path::PathBuf;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let source = MockSource::with_blocks([
///     ("zsh-5.9.tgz", "PKGNAME=zsh-5.9\nCATEGORIES=shells\n"),
/// ]);
/// let infos = source.extract(&[PathBuf::from("/repo/zsh-5.9.tgz")]).await.unwrap();
/// assert_eq!(infos[0].categories, vec!["shells"]);
/// assert_eq!(source.invocations(), 1);
/// # }
/// ```
#[derive(Default)]
pub struct MockSource {
    blocks: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    batches: Mutex<Vec<Vec<String>>>,
    invocations: AtomicUsize,
}

fn filename(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}

impl MockSource {
    pub fn with_blocks(blocks: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        let source = Self::default();
        for (name, block) in blocks {
            source.insert(name, block);
        }
        source
    }

    /// Add or replace the block returned for `filename`.
    pub fn insert(&self, filename: impl Into<String>, block: impl Into<String>) {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner).insert(filename.into(), block.into());
    }

    /// Any batch containing `filename` fails as if the extractor exited
    /// with a non-zero status.
    pub fn fail_on(&self, filename: impl Into<String>) {
        self.failing.lock().unwrap_or_else(PoisonError::into_inner).insert(filename.into());
    }

    /// Stop failing batches containing `filename`.
    pub fn recover(&self, filename: &str) {
        self.failing.lock().unwrap_or_else(PoisonError::into_inner).remove(filename);
    }

    /// Number of times [`extract`](MetadataSource::extract) was called.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Filenames of every batch seen so far, in call order.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl MetadataSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn extract(&self, paths: &[PathBuf]) -> Result<Vec<PackageInfo>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let names: Vec<String> = paths.iter().map(|p| filename(p)).collect();
        self.batches.lock().unwrap_or_else(PoisonError::into_inner).push(names.clone());
        {
            let failing = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
            if names.iter().any(|name| failing.contains(name)) {
                exn::bail!(ErrorKind::ExtractorFailed(Some(1)));
            }
        }
        let output = {
            let blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
            names
                .iter()
                .filter_map(|name| blocks.get(name))
                .fold(String::new(), |mut acc, block| {
                    acc.push_str(block);
                    acc.push('\n');
                    acc
                })
        };
        parse(&output, paths.len())
    }
}

//! The repository summary (`pkg_summary`) that package clients download.
//!
//! It is assembled from the cache on every request and never stored.

use crate::PackageRepository;
use crate::error::{Error, ErrorKind, Result};
use bzip2::{Compression as BzCompression, write::BzEncoder};
use exn::ResultExt;
use flate2::{Compression as GzCompression, write::GzEncoder};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Write;
use std::str::FromStr;
use time::UtcDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tracing::instrument;

/// `Last-Modified` header format (IMF-fixdate).
const HTTP_DATE: &[BorrowedFormatItem<'static>] =
    format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SummaryFormat {
    Gzip,
    Bzip2,
}
impl SummaryFormat {
    /// Name the summary is served under in this format.
    pub fn filename(&self) -> &'static str {
        match self {
            Self::Gzip => "pkg_summary.gz",
            Self::Bzip2 => "pkg_summary.bz2",
        }
    }

    fn compress(&self, input: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), GzCompression::default());
                encoder.write_all(input)?;
                encoder.finish()
            },
            Self::Bzip2 => {
                let mut encoder = BzEncoder::new(Vec::new(), BzCompression::default());
                encoder.write_all(input)?;
                encoder.finish()
            },
        }
    }
}
impl Display for SummaryFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.filename())
    }
}
impl FromStr for SummaryFormat {
    type Err = Error;
    /// Accepts the served filename (`pkg_summary.gz`) or the bare extension
    /// (`gz`, `gzip`, `bz2`, `bzip2`).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let extension = s.strip_prefix("pkg_summary.").unwrap_or(s);
        match extension.to_lowercase().as_str() {
            "gz" | "gzip" => Ok(Self::Gzip),
            "bz2" | "bzip2" => Ok(Self::Bzip2),
            _ => exn::bail!(ErrorKind::Summary),
        }
    }
}

/// A compressed summary, fully buffered so its length is known before it
/// is sent.
#[derive(Debug, Clone)]
pub struct CompressedSummary {
    pub bytes: Vec<u8>,
    pub format: SummaryFormat,
    pub generated_at: UtcDateTime,
}
impl CompressedSummary {
    pub fn content_length(&self) -> u64 {
        u64::try_from(self.bytes.len()).unwrap_or(u64::MAX)
    }

    /// Generation time formatted for a `Last-Modified` header.
    pub fn last_modified(&self) -> Result<String> {
        self.generated_at.format(HTTP_DATE).or_raise(|| ErrorKind::Summary)
    }
}

impl PackageRepository {
    /// Every fresh record's metadata block, in filename order, each followed
    /// by a blank line.
    #[instrument(level = "debug", skip(self), fields(repo = %self.id))]
    pub async fn summary(&self) -> Result<String> {
        let blocks = self.cache.list_raw_info().await.or_raise(|| ErrorKind::Summary)?;
        let mut summary = String::with_capacity(blocks.iter().map(|b| b.len() + 1).sum());
        for block in &blocks {
            summary.push_str(block);
            summary.push('\n');
        }
        Ok(summary)
    }

    pub async fn compressed_summary(&self, format: SummaryFormat) -> Result<CompressedSummary> {
        let summary = self.summary().await?;
        let generated_at = UtcDateTime::now();
        // Compression is CPU-bound; keep it off the async workers.
        let bytes = tokio::task::spawn_blocking(move || format.compress(summary.as_bytes()))
            .await
            .or_raise(|| ErrorKind::Summary)?
            .or_raise(|| ErrorKind::Summary)?;
        tracing::debug!(repo = %self.id, %format, size = bytes.len(), "Compressed summary");
        Ok(CompressedSummary { bytes, format, generated_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use rstest::rstest;
    use std::io::Read;

    #[rstest]
    #[case("pkg_summary.gz", SummaryFormat::Gzip)]
    #[case("pkg_summary.bz2", SummaryFormat::Bzip2)]
    #[case("gzip", SummaryFormat::Gzip)]
    #[case("BZ2", SummaryFormat::Bzip2)]
    fn test_format_from_str(#[case] input: &str, #[case] expected: SummaryFormat) {
        assert_eq!(input.parse::<SummaryFormat>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_format() {
        assert!("pkg_summary.xz".parse::<SummaryFormat>().is_err());
    }

    #[tokio::test]
    async fn test_summary_contains_each_block_once() {
        let fixture = Fixture::new().await;
        fixture.add("b-2.0.tgz", "b-2.0", "pkgtools shells", 10);
        fixture.add("a-1.0.tgz", "a-1.0", "pkgtools", 10);
        fixture.add("c-3.0.tgz", "c-3.0", "devel", 10);
        fixture.repo.resync().await.unwrap();
        fixture.repo.remove_file("c-3.0.tgz").await.unwrap();
        let summary = fixture.repo.summary().await.unwrap();
        assert_eq!(
            summary,
            "PKGNAME=a-1.0\nCATEGORIES=pkgtools\n\nPKGNAME=b-2.0\nCATEGORIES=pkgtools shells\n\n"
        );
    }

    #[tokio::test]
    async fn test_empty_summary() {
        let fixture = Fixture::new().await;
        assert_eq!(fixture.repo.summary().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_compressed_summaries_decompress() {
        let fixture = Fixture::new().await;
        fixture.add("a-1.0.tgz", "a-1.0", "pkgtools", 10);
        fixture.repo.resync().await.unwrap();
        let plain = fixture.repo.summary().await.unwrap();

        let gz = fixture.repo.compressed_summary(SummaryFormat::Gzip).await.unwrap();
        assert_eq!(gz.content_length(), gz.bytes.len() as u64);
        let mut decoded = String::new();
        flate2::read::GzDecoder::new(gz.bytes.as_slice()).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, plain);

        let bz = fixture.repo.compressed_summary(SummaryFormat::Bzip2).await.unwrap();
        let mut decoded = String::new();
        bzip2::read::BzDecoder::new(bz.bytes.as_slice()).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn test_last_modified_format() {
        let summary = CompressedSummary {
            bytes: Vec::new(),
            format: SummaryFormat::Gzip,
            generated_at: UtcDateTime::from_unix_timestamp(784111777).unwrap(),
        };
        assert_eq!(summary.last_modified().unwrap(), "Sun, 06 Nov 1994 08:49:37 GMT");
    }
}

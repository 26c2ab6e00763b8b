//! Parsing of `pkg_info -X` style output.
//!
//! The output is a sequence of blocks, one per package, separated by blank
//! lines. Every line in a block is a `KEY=value` pair; keys may repeat
//! (`DESCRIPTION` usually does).

use crate::error::{ErrorKind, Result};
use crate::models::{PackageInfo, PackageName};
use tracing::instrument;

const KEY_PKGNAME: &str = "PKGNAME";
const KEY_CATEGORIES: &str = "CATEGORIES";

/// Split output into blocks of non-blank lines. Runs of blank lines count as
/// a single separator; leading and trailing blank lines are ignored.
fn split_blocks(output: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn parse_lines(lines: &[&str]) -> Result<PackageInfo> {
    let mut name = None;
    let mut categories: Vec<String> = Vec::new();
    let mut raw = String::new();
    for line in lines {
        let Some((key, value)) = line.split_once('=') else {
            exn::bail!(ErrorKind::MalformedOutput(line.to_string()));
        };
        match key.trim() {
            KEY_PKGNAME => name = Some(PackageName::new(value.trim())),
            KEY_CATEGORIES => {
                categories.clear();
                for category in value.split_whitespace() {
                    if !categories.iter().any(|c| c == category) {
                        categories.push(category.to_string());
                    }
                }
            },
            _ => {},
        }
        raw.push_str(line);
        raw.push('\n');
    }
    Ok(PackageInfo { name, categories, raw })
}

/// Parse a single metadata block.
pub fn parse_block(block: &str) -> Result<PackageInfo> {
    let lines: Vec<&str> = block.lines().filter(|line| !line.trim().is_empty()).collect();
    if lines.is_empty() {
        exn::bail!(ErrorKind::BlockCountMismatch { expected: 1, found: 0 });
    }
    parse_lines(&lines)
}

/// Parse the output of one extractor invocation into exactly `expected`
/// records, in the order the paths were given.
///
/// # Errors
///
/// - [`ErrorKind::BlockCountMismatch`] if the number of blocks differs from
///   `expected`; records are never attributed by guesswork.
/// - [`ErrorKind::MalformedOutput`] if any line is not `KEY=value`.
#[instrument(level = "debug", skip(output), fields(output_size = output.len()))]
pub fn parse(output: &str, expected: usize) -> Result<Vec<PackageInfo>> {
    let blocks = split_blocks(output);
    if blocks.len() != expected {
        exn::bail!(ErrorKind::BlockCountMismatch { expected, found: blocks.len() });
    }
    blocks.iter().map(|lines| parse_lines(lines)).collect()
}

//! Package metadata extraction.
//!
//! The repository never reads package archives itself. Instead it hands a
//! batch of paths to an external extractor (`pkg_info -X` by default) and
//! parses the summary text that comes back:
//!
//! ```text
//! PKGNAME=bash-5.2.21
//! CATEGORIES=shells
//! COMMENT=The GNU Bourne Again Shell
//!
//! PKGNAME=pkgin-23.8.1
//! CATEGORIES=pkgtools
//! ```
//!
//! One block per path, in the order given, separated by a blank line. Only
//! `PKGNAME` and `CATEGORIES` are interpreted; the block text is retained
//! verbatim for the repository summary.

pub mod error;
pub mod models;
mod parse;
pub mod source;

pub use crate::parse::{parse, parse_block};
use std::sync::Arc;

pub type SourceHandle = Arc<dyn source::MetadataSource + Send + Sync>;

//! Access to the on-disk package repository directory.
//!
//! A repository is a single flat directory of package artifacts (plus the
//! generated `pkg_summary.*` files). This crate only knows about files: which
//! ones count as artifacts, how big they are, and how to move them in or out
//! of the directory safely. Everything it knows about a file is rebuildable
//! from the filesystem itself.

mod dir;
pub mod error;
mod path;

pub use crate::dir::{ArtifactFile, ArtifactStream, DEFAULT_EXTENSIONS, RepoDir};
pub use crate::path::{validate as validate_path, validate_filename};

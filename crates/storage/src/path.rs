//! Path validation.
//!
//! Filenames arrive from uploads, HTTP routes and mirror listings; none of
//! them may address anything outside the repository directory.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Normalizes a relative path, rejecting anything that would climb out of
/// the repository root.
///
/// > **Note:** Null bytes are rejected explicitly; they survive
/// >           `Path::components()` on Unix but truncate C-level syscalls.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use pkgrepo_storage::validate_path;
/// assert!(validate_path("All/bash-5.2.tgz").is_ok());
/// assert!(validate_path("a/../bash-5.2.tgz").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(validate_path("./x//y/../bash-5.2.tgz").unwrap(), Path::new("x/bash-5.2.tgz"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => {
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Validates a bare filename: exactly one normal path component, unchanged
/// by normalization, and valid UTF-8 (the cache keys on it as text).
///
/// ```
/// use pkgrepo_storage::validate_filename;
/// assert_eq!(validate_filename("bash-5.2.tgz").unwrap(), "bash-5.2.tgz");
/// assert!(validate_filename("All/bash-5.2.tgz").is_err());
/// assert!(validate_filename("..").is_err());
/// ```
pub fn validate_filename(filename: impl AsRef<Path>) -> Result<String> {
    let filename = filename.as_ref();
    let normalized = validate(filename)?;
    // Compare the raw bytes; `Path` equality ignores trailing separators.
    if normalized.components().count() != 1 || normalized.as_os_str() != filename.as_os_str() {
        exn::bail!(ErrorKind::InvalidPath(filename.to_path_buf()));
    }
    match normalized.to_str() {
        Some(name) => Ok(name.to_string()),
        None => exn::bail!(ErrorKind::InvalidPath(filename.to_path_buf())),
    }
}

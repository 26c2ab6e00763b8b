//! SQLite cache database for package repository metadata.
//!
//! Each package repository gets its own cache database that records what is
//! known about every package file in the repository directory. The database
//! is not the source of truth for *which* files exist (the directory is),
//! but it is the source of truth for "have we already processed this exact
//! file". If it is deleted, a resync rebuilds it.
//!
//! # Architecture
//! The cache stores two entity types:
//! - **Artifacts**: one row per filename with the size last observed and,
//!   once extraction has run, the package identifier and raw metadata. An
//!   artifact with empty raw metadata is *pending*.
//! - **Categories**: `(filename, category)` memberships, replaced wholesale
//!   whenever extraction for an artifact completes, and removed with the
//!   artifact by cascade.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{Artifact, PendingArtifact, StoreStats};
pub use crate::repo::Repository;

mod artifact;

pub use self::artifact::{Artifact, PendingArtifact, StoreStats};
pub(crate) use self::artifact::{ArtifactRow, PendingRow, StatsRow};

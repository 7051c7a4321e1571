use chrono::{DateTime, Utc};
use project::{ProjectImage, ProjectState};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable copy of project state at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub(crate) id: SnapshotId,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) description: String,
    /// Model revision the image was taken at
    pub(crate) revision: u64,
    pub(crate) image: ProjectImage,
}

impl Snapshot {
    pub fn capture(state: &ProjectState, description: impl Into<String>) -> Self {
        Self {
            id: SnapshotId::new(),
            created_at: Utc::now(),
            description: description.into(),
            revision: state.revision(),
            image: ProjectImage::capture(state),
        }
    }

    pub fn id(&self) -> SnapshotId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn image(&self) -> &ProjectImage {
        &self.image
    }
}

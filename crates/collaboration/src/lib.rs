/// Collaborative editing layer
/// Routes local edits through significance classification and history, mirrors
/// them into the shared document, and ingests remote changes.
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod channel;
pub use channel::*;

mod document;
pub use document::*;

mod codec;
pub use codec::*;

mod significance;
pub use significance::*;

mod mirror;
pub use mirror::*;

mod ingest;
pub use ingest::*;

mod gateway;
pub use gateway::*;

mod presence;
pub use presence::*;

mod sync;
pub use sync::*;

mod config;
pub use config::*;

mod room;
pub use room::*;

#[derive(Debug, Error)]
pub enum CollaborationError {
    #[error("no shared channel attached")]
    ChannelUnavailable,

    #[error("cannot decode {container} entry: {message}")]
    Decode { container: Container, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("invalid operation: {0}")]
    InvalidOp(String),
}

pub type Result<T> = std::result::Result<T, CollaborationError>;

/// Participant identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub uuid::Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room name shared by every participant editing the same project
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

pub const DEFAULT_ROOM: &str = "daw-room";

impl RoomId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM)
    }
}

impl From<&str> for RoomId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

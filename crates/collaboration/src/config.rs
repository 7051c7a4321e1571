use history::HistoryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{CollaborationError, Result, SignificanceConfig, DEFAULT_ROOM};

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:1234";

/// Settings for one participant's collaboration layer.
///
/// Every field has a default, so a partial JSON document is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaborationConfig {
    pub server_url: String,
    pub default_room: String,
    pub history: HistoryConfig,
    pub significance: SignificanceConfig,
}

impl Default for CollaborationConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            default_room: DEFAULT_ROOM.to_string(),
            history: HistoryConfig::default(),
            significance: SignificanceConfig::default(),
        }
    }
}

impl CollaborationConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CollaborationError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }
}
